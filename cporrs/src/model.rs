//! Column-oriented table model shared by the loader, the pivot planner and
//! the contracts normalizer.
//!
//! Uploaded workbooks are stored as one dense value vector per column plus a
//! row count; rows are implicit by index. Missing cells are the tagged
//! [`Value::Absent`] variant so every consumer handles them uniformly.

use std::cmp::Ordering;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Inferred kind of a column, decided once at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Text,
    Integer,
    Real,
    Date,
    Boolean,
}

impl ColumnKind {
    /// Label used in the upload response's `schema: {field: dtype}` map.
    pub fn dtype(&self) -> &'static str {
        match self {
            ColumnKind::Text => "text",
            ColumnKind::Integer => "integer",
            ColumnKind::Real => "real",
            ColumnKind::Date => "date",
            ColumnKind::Boolean => "boolean",
        }
    }
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Absent,
    Text(String),
    Integer(i64),
    Real(f64),
    Date(NaiveDate),
    Bool(bool),
}

impl Value {
    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    /// Numeric coercion used at aggregation time. Booleans coerce to 0/1 so
    /// they can participate in sums; text is re-parsed with the same rules
    /// the loader applies (`,`/`.` decimal separators, `R$` prefix).
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Absent => None,
            Value::Integer(i) => Some(*i as f64),
            Value::Real(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) => parse_numeric(s),
            Value::Date(_) => None,
        }
    }

    /// Natural ordering: absent sorts last, numbers before text, text by
    /// code point. Used by min/max and by header sorting.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Absent, Value::Absent) => Ordering::Equal,
            (Value::Absent, _) => Ordering::Greater,
            (_, Value::Absent) => Ordering::Less,
            _ => match (self.as_number(), other.as_number()) {
                (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => self.to_string().cmp(&other.to_string()),
            },
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Absent => serde_json::Value::Null,
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Real(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
            Value::Bool(b) => serde_json::Value::Bool(*b),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Absent => Ok(()),
            Value::Text(s) => f.write_str(s),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(v) => {
                if v.fract() == 0.0 && v.abs() < 1e15 {
                    write!(f, "{}", *v as i64)
                } else {
                    write!(f, "{v}")
                }
            }
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Parse a numeric string accepting both `,` and `.` decimal separators and
/// an optional `R$` currency prefix. `"1.234,56"` and `"1,234.56"` both map
/// to 1234.56.
pub fn parse_numeric(raw: &str) -> Option<f64> {
    let mut s = raw.trim();
    if s.is_empty() {
        return None;
    }
    s = s.strip_prefix("R$").unwrap_or(s).trim();
    let negative = s.starts_with('-');
    if negative {
        s = s[1..].trim();
    }

    let cleaned: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') {
        return None;
    }

    let last_comma = cleaned.rfind(',');
    let last_dot = cleaned.rfind('.');
    let normalized = match (last_comma, last_dot) {
        // Both present: the rightmost one is the decimal separator.
        (Some(c), Some(d)) if c > d => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (Some(c), None) => {
            // A single comma is decimal; multiple commas are thousands marks.
            if cleaned.matches(',').count() == 1 && cleaned.len() - c <= 3 + 1 {
                cleaned.replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
        (None, Some(_)) => {
            if cleaned.matches('.').count() > 1 {
                cleaned.replace('.', "")
            } else {
                cleaned
            }
        }
        (None, None) => cleaned,
    };

    normalized
        .parse::<f64>()
        .ok()
        .map(|v| if negative { -v } else { v })
        .filter(|v| v.is_finite())
}

/// One column of a table: original label, normalized key, inferred kind and
/// the dense value vector.
#[derive(Debug, Clone)]
pub struct Column {
    pub label: String,
    pub key: String,
    pub kind: ColumnKind,
    pub values: Vec<Value>,
}

/// An ordered sequence of columns with an explicit row count.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub columns: Vec<Column>,
    pub row_count: usize,
}

impl Table {
    pub fn column(&self, key: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.key == key)
    }

    pub fn column_index(&self, key: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.key == key)
    }

    pub fn value(&self, key: &str, row: usize) -> Option<&Value> {
        self.column(key).and_then(|c| c.values.get(row))
    }
}

/// Schema entry for one column as exposed to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaField {
    pub key: String,
    pub label: String,
    pub kind: ColumnKind,
    #[serde(rename = "isMeasure")]
    pub is_measure: bool,
    pub calculated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_numbers() {
        assert_eq!(parse_numeric("10"), Some(10.0));
        assert_eq!(parse_numeric("10.5"), Some(10.5));
        assert_eq!(parse_numeric("-3"), Some(-3.0));
    }

    #[test]
    fn parse_brazilian_format() {
        assert_eq!(parse_numeric("1.234,56"), Some(1234.56));
        assert_eq!(parse_numeric("R$ 1.234,56"), Some(1234.56));
        assert_eq!(parse_numeric("10,5"), Some(10.5));
    }

    #[test]
    fn parse_us_format() {
        assert_eq!(parse_numeric("1,234.56"), Some(1234.56));
        assert_eq!(parse_numeric("1,234,567"), Some(1_234_567.0));
    }

    #[test]
    fn parse_rejects_non_numeric() {
        assert_eq!(parse_numeric("abc"), None);
        assert_eq!(parse_numeric(""), None);
        assert_eq!(parse_numeric("12a"), None);
    }

    #[test]
    fn absent_sorts_last() {
        assert_eq!(Value::Absent.compare(&Value::Integer(1)), Ordering::Greater);
        assert_eq!(Value::Integer(1).compare(&Value::Absent), Ordering::Less);
    }

    #[test]
    fn numbers_before_text() {
        let n = Value::Integer(2);
        let t = Value::Text("abacate".into());
        assert_eq!(n.compare(&t), Ordering::Less);
    }

    #[test]
    fn real_display_trims_integral() {
        assert_eq!(Value::Real(10.0).to_string(), "10");
        assert_eq!(Value::Real(10.5).to_string(), "10.5");
    }
}
