//! Column typing and name normalization.
//!
//! All three decode paths produce a raw string grid; this module turns it
//! into typed column vectors plus the candidate schema. Inference samples up
//! to the first 500 non-empty values per column: >=90% integers makes the
//! column integer, >=90% reals makes it real, >=80% dates makes it date,
//! anything else stays text. Numeric columns holding only 0/1 (at least 4
//! values) are reclassified as boolean flags rather than measures.

use chrono::NaiveDate;

use crate::collate;
use crate::error::{PortalError, Result};
use crate::model::{parse_numeric, Column, ColumnKind, SchemaField, Table, Value};

const SAMPLE_LIMIT: usize = 500;
const INT_THRESHOLD: f64 = 0.9;
const REAL_THRESHOLD: f64 = 0.9;
const DATE_THRESHOLD: f64 = 0.8;

/// Column names that look numeric but identify things rather than measure
/// them. Matched against the normalized key.
fn is_identifier_key(key: &str) -> bool {
    key == "id"
        || key.starts_with("id_")
        || key.ends_with("_id")
        || key.contains("cnpj")
        || key.contains("cpf")
        || key.contains("pi_")
        || key.contains("contrato")
}

/// Trim and collapse internal whitespace, preserving accents.
pub fn normalize_label(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Derive the stable key: lowercase, fold diacritics, non-alphanumerics
/// become `_`, runs of `_` collapse. Normalizing twice equals normalizing
/// once.
pub fn normalize_key(label: &str) -> String {
    let folded = collate::collation_key(label);
    let mut key = String::with_capacity(folded.len());
    let mut last_underscore = true; // suppress leading '_'
    for c in folded.chars() {
        if c.is_ascii_alphanumeric() {
            key.push(c);
            last_underscore = false;
        } else if !last_underscore {
            key.push('_');
            last_underscore = true;
        }
    }
    while key.ends_with('_') {
        key.pop();
    }
    if key.is_empty() {
        "coluna".to_string()
    } else {
        key
    }
}

/// Parse the date formats the portal accepts: ISO-8601 (date or datetime
/// prefix) and `dd/mm/yyyy`.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%d/%m/%Y") {
        return Some(d);
    }
    // ISO datetime: take the date prefix.
    if let (Some(prefix), Some(rest)) = (s.get(..10), s.get(10..)) {
        if let Ok(d) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
            if rest.is_empty() || rest.starts_with('T') || rest.starts_with(' ') {
                return Some(d);
            }
        }
    }
    None
}

fn parse_integer(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok()
}

fn infer_kind(cells: &[String]) -> ColumnKind {
    let sample: Vec<&str> = cells
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .take(SAMPLE_LIMIT)
        .collect();
    if sample.is_empty() {
        return ColumnKind::Text;
    }
    let total = sample.len() as f64;

    let ints = sample.iter().filter(|s| parse_integer(s).is_some()).count() as f64;
    if ints / total >= INT_THRESHOLD {
        // 0/1-only integer columns of sufficient size are flags.
        if sample.len() >= 4 && sample.iter().all(|s| matches!(s.trim(), "0" | "1")) {
            return ColumnKind::Boolean;
        }
        return ColumnKind::Integer;
    }

    let reals = sample.iter().filter(|s| parse_numeric(s).is_some()).count() as f64;
    if reals / total >= REAL_THRESHOLD {
        return ColumnKind::Real;
    }

    let dates = sample.iter().filter(|s| parse_date(s).is_some()).count() as f64;
    if dates / total >= DATE_THRESHOLD {
        return ColumnKind::Date;
    }

    ColumnKind::Text
}

fn type_cell(raw: &str, kind: ColumnKind) -> Value {
    let s = raw.trim();
    if s.is_empty() {
        return Value::Absent;
    }
    match kind {
        ColumnKind::Integer => match parse_integer(s) {
            Some(i) => Value::Integer(i),
            None => Value::Text(s.to_string()),
        },
        ColumnKind::Real => match parse_numeric(s) {
            Some(f) => Value::Real(f),
            None => Value::Text(s.to_string()),
        },
        ColumnKind::Date => match parse_date(s) {
            Some(d) => Value::Date(d),
            None => Value::Text(s.to_string()),
        },
        ColumnKind::Boolean => Value::Bool(s == "1"),
        ColumnKind::Text => Value::Text(s.to_string()),
    }
}

/// Build the typed table and candidate schema from a raw string grid.
pub fn build_table(header: Vec<String>, rows: Vec<Vec<String>>) -> Result<(Table, Vec<SchemaField>)> {
    let row_count = rows.len();
    let mut taken: Vec<String> = Vec::with_capacity(header.len());
    let mut columns = Vec::with_capacity(header.len());
    let mut schema = Vec::with_capacity(header.len());

    for (idx, raw_label) in header.iter().enumerate() {
        let mut label = normalize_label(raw_label);
        if label.is_empty() {
            label = format!("Coluna {}", idx + 1);
        }
        let base_key = normalize_key(&label);
        let key = disambiguate(&base_key, &taken)?;
        taken.push(key.clone());

        let cells: Vec<String> = rows
            .iter()
            .map(|r| r.get(idx).cloned().unwrap_or_default())
            .collect();
        let kind = infer_kind(&cells);
        let values: Vec<Value> = cells.iter().map(|c| type_cell(c, kind)).collect();

        let is_measure = matches!(kind, ColumnKind::Integer | ColumnKind::Real)
            && !is_identifier_key(&key);
        schema.push(SchemaField {
            key: key.clone(),
            label: label.clone(),
            kind,
            is_measure,
            calculated: false,
        });
        columns.push(Column {
            label,
            key,
            kind,
            values,
        });
    }

    Ok((Table { columns, row_count }, schema))
}

fn disambiguate(base: &str, taken: &[String]) -> Result<String> {
    if !taken.iter().any(|k| k == base) {
        return Ok(base.to_string());
    }
    for suffix in 2..100 {
        let candidate = format!("{base}_{suffix}");
        if !taken.iter().any(|k| k == &candidate) {
            return Ok(candidate);
        }
    }
    Err(PortalError::SchemaConflict(format!(
        "column key '{base}' repeats beyond the suffix range"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_normalization_is_idempotent() {
        let once = normalize_key("Valor Médio (R$)");
        let twice = normalize_key(&once);
        assert_eq!(once, twice);
        assert_eq!(once, "valor_medio_r");
    }

    #[test]
    fn label_collapses_whitespace() {
        assert_eq!(normalize_label("  Unidade   Gestora \t X "), "Unidade Gestora X");
    }

    #[test]
    fn duplicate_headers_get_suffixes() {
        let header = vec!["Valor".into(), "valor".into(), "VALOR".into()];
        let rows = vec![vec!["1".into(), "2".into(), "3".into()]];
        let (table, _) = build_table(header, rows).unwrap();
        let keys: Vec<_> = table.columns.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["valor", "valor_2", "valor_3"]);
    }

    #[test]
    fn integer_column_inferred() {
        let cells: Vec<String> = vec!["1".into(), "2".into(), "".into(), "3".into()];
        assert_eq!(infer_kind(&cells), ColumnKind::Integer);
    }

    #[test]
    fn real_column_with_currency() {
        let cells: Vec<String> = vec!["R$ 10,50".into(), "1.234,56".into(), "3".into()];
        assert_eq!(infer_kind(&cells), ColumnKind::Real);
    }

    #[test]
    fn date_column_mixed_formats() {
        let cells: Vec<String> =
            vec!["2024-01-31".into(), "31/12/2024".into(), "2024-06-01".into()];
        assert_eq!(infer_kind(&cells), ColumnKind::Date);
    }

    #[test]
    fn binary_flags_are_boolean() {
        let cells: Vec<String> = vec!["0".into(), "1".into(), "1".into(), "0".into()];
        assert_eq!(infer_kind(&cells), ColumnKind::Boolean);
        // Too few values stay integer.
        let few: Vec<String> = vec!["0".into(), "1".into()];
        assert_eq!(infer_kind(&few), ColumnKind::Integer);
    }

    #[test]
    fn identifier_columns_are_not_measures() {
        let header = vec!["ID".into(), "CNPJ Fornecedor".into(), "Valor".into()];
        let rows = vec![
            vec!["1".into(), "123456".into(), "10.5".into()],
            vec!["2".into(), "654321".into(), "11.5".into()],
        ];
        let (_, schema) = build_table(header, rows).unwrap();
        assert!(!schema[0].is_measure);
        assert!(!schema[1].is_measure);
        assert!(schema[2].is_measure);
    }

    #[test]
    fn iso_datetime_parses_as_date() {
        assert_eq!(
            parse_date("2024-05-01T13:45:00"),
            NaiveDate::from_ymd_opt(2024, 5, 1)
        );
        assert_eq!(parse_date("15/03/2025"), NaiveDate::from_ymd_opt(2025, 3, 15));
        assert_eq!(parse_date("not a date"), None);
    }
}
