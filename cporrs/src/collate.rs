//! Locale-aware ordering for filter values.
//!
//! Distinct-value lists are shown to users in Brazilian-Portuguese order:
//! case-insensitive on the primary pass, diacritic-insensitive on the
//! secondary pass, code-point order as the final tiebreak. Implemented as a
//! fold to a collation key rather than a full UCA tailoring; the three-level
//! compare below is stable for the column values this portal sees.

use std::cmp::Ordering;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Primary collation key: lowercased, diacritics stripped.
pub fn collation_key(s: &str) -> String {
    s.nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Three-level compare: folded key, then case-folded-with-diacritics, then
/// raw code points.
pub fn compare(a: &str, b: &str) -> Ordering {
    collation_key(a)
        .cmp(&collation_key(b))
        .then_with(|| a.to_lowercase().cmp(&b.to_lowercase()))
        .then_with(|| a.cmp(b))
}

/// Sort a list of values in place with the portal collation.
pub fn sort(values: &mut [String]) {
    values.sort_by(|a, b| compare(a, b));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_primary() {
        let mut v = vec!["banana".to_string(), "Abacaxi".to_string(), "acerola".to_string()];
        sort(&mut v);
        assert_eq!(v, vec!["Abacaxi", "acerola", "banana"]);
    }

    #[test]
    fn diacritics_sort_with_base_letter() {
        let mut v = vec!["Órgão".to_string(), "Orçamento".to_string(), "Ouvidoria".to_string()];
        sort(&mut v);
        assert_eq!(v, vec!["Orçamento", "Órgão", "Ouvidoria"]);
    }

    #[test]
    fn stable_under_repeat() {
        let mut a = vec!["São Paulo".to_string(), "Santos".to_string(), "sao bernardo".to_string()];
        let mut b = a.clone();
        sort(&mut a);
        sort(&mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn key_strips_accents() {
        assert_eq!(collation_key("Execução"), "execucao");
        assert_eq!(collation_key("MÉDIA"), "media");
    }
}
