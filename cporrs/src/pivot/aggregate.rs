//! Aggregator catalog and group-slice application.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{PortalError, Result};
use crate::model::Value;
use crate::pivot::query::ValueFormat;

/// The aggregators the workbench offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregator {
    #[serde(rename = "sum")]
    Sum,
    #[serde(rename = "avg")]
    Avg,
    #[serde(rename = "count")]
    Count,
    #[serde(rename = "distinctCount")]
    DistinctCount,
    #[serde(rename = "min")]
    Min,
    #[serde(rename = "max")]
    Max,
}

/// Measure names that read as money. Drives the `currency` format hint.
const CURRENCY_HINTS: [&str; 5] = ["valor", "saldo", "empenho", "executado", "estimado"];

pub fn is_currency_measure(key_or_label: &str) -> bool {
    let folded = crate::collate::collation_key(key_or_label);
    CURRENCY_HINTS.iter().any(|h| folded.contains(h))
}

impl Aggregator {
    pub const ALL: [Aggregator; 6] = [
        Aggregator::Sum,
        Aggregator::Avg,
        Aggregator::Count,
        Aggregator::DistinctCount,
        Aggregator::Min,
        Aggregator::Max,
    ];

    pub fn parse(id: &str) -> Result<Aggregator> {
        match id {
            "sum" => Ok(Aggregator::Sum),
            "avg" => Ok(Aggregator::Avg),
            "count" => Ok(Aggregator::Count),
            "distinctCount" => Ok(Aggregator::DistinctCount),
            "min" => Ok(Aggregator::Min),
            "max" => Ok(Aggregator::Max),
            other => Err(PortalError::UnknownAggregator(other.to_string())),
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Aggregator::Sum => "sum",
            Aggregator::Avg => "avg",
            Aggregator::Count => "count",
            Aggregator::DistinctCount => "distinctCount",
            Aggregator::Min => "min",
            Aggregator::Max => "max",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Aggregator::Sum => "Soma",
            Aggregator::Avg => "Média",
            Aggregator::Count => "Contagem",
            Aggregator::DistinctCount => "Contagem Distinta",
            Aggregator::Min => "Mínimo",
            Aggregator::Max => "Máximo",
        }
    }

    /// Additive aggregators let totals be derived by summing visible cells;
    /// the rest must be recomputed from the underlying rows.
    pub fn is_additive(&self) -> bool {
        matches!(self, Aggregator::Sum | Aggregator::Count)
    }

    /// Format of this aggregator's output for a given measure. Counting is
    /// always a plain number; the value-preserving aggregators inherit the
    /// measure's currency reading.
    pub fn format_for(&self, measure: &str) -> ValueFormat {
        match self {
            Aggregator::Count | Aggregator::DistinctCount => ValueFormat::Number,
            _ => {
                if is_currency_measure(measure) {
                    ValueFormat::Currency
                } else {
                    ValueFormat::Number
                }
            }
        }
    }

    /// Apply over the values at `rows` of a column vector. `None` means the
    /// aggregate is absent (e.g. avg of an all-absent group).
    pub fn apply(&self, values: &[Value], rows: &[usize]) -> Option<f64> {
        match self {
            Aggregator::Sum => {
                let mut total = 0.0;
                for &r in rows {
                    if let Some(v) = values[r].as_number() {
                        total += v;
                    }
                }
                Some(total)
            }
            Aggregator::Avg => {
                let mut total = 0.0;
                let mut n = 0usize;
                for &r in rows {
                    if let Some(v) = values[r].as_number() {
                        total += v;
                        n += 1;
                    }
                }
                if n == 0 {
                    None
                } else {
                    Some(total / n as f64)
                }
            }
            Aggregator::Count => {
                Some(rows.iter().filter(|&&r| !values[r].is_absent()).count() as f64)
            }
            Aggregator::DistinctCount => {
                let mut seen = HashSet::new();
                for &r in rows {
                    if !values[r].is_absent() {
                        seen.insert(values[r].to_string());
                    }
                }
                Some(seen.len() as f64)
            }
            Aggregator::Min => extreme(values, rows, std::cmp::Ordering::Less),
            Aggregator::Max => extreme(values, rows, std::cmp::Ordering::Greater),
        }
    }
}

/// Pick the extreme non-absent value under the natural ordering (numbers
/// first, then lexicographic) and coerce it to a number.
fn extreme(values: &[Value], rows: &[usize], keep_when: std::cmp::Ordering) -> Option<f64> {
    let mut best: Option<&Value> = None;
    for &r in rows {
        let candidate = &values[r];
        if candidate.is_absent() {
            continue;
        }
        best = match best {
            Some(current) if candidate.compare(current) != keep_when => Some(current),
            _ => Some(candidate),
        };
    }
    best.and_then(Value::as_number)
}

/// Catalog entry for the upload response's aggregator menu.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorInfo {
    pub id: String,
    pub label: String,
    pub format: ValueFormat,
}

/// Build the aggregator menu for a dataset from its applicable subset: the
/// format flag reflects whether any measure reads as currency.
pub fn catalog(aggregators: &[Aggregator], measure_names: &[String]) -> Vec<AggregatorInfo> {
    let any_currency = measure_names.iter().any(|m| is_currency_measure(m));
    aggregators
        .iter()
        .map(|agg| {
            let format = match agg {
                Aggregator::Count | Aggregator::DistinctCount => ValueFormat::Number,
                _ if any_currency => ValueFormat::Currency,
                _ => ValueFormat::Number,
            };
            AggregatorInfo {
                id: agg.id().to_string(),
                label: agg.label().to_string(),
                format,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(vals: &[Option<f64>]) -> Vec<Value> {
        vals.iter()
            .map(|v| match v {
                Some(f) => Value::Real(*f),
                None => Value::Absent,
            })
            .collect()
    }

    #[test]
    fn sum_ignores_absent() {
        let values = col(&[Some(1.0), None, Some(2.5)]);
        let rows = [0, 1, 2];
        assert_eq!(Aggregator::Sum.apply(&values, &rows), Some(3.5));
    }

    #[test]
    fn avg_of_all_absent_is_absent() {
        let values = col(&[None, None]);
        assert_eq!(Aggregator::Avg.apply(&values, &[0, 1]), None);
        assert_eq!(Aggregator::Sum.apply(&values, &[0, 1]), Some(0.0));
    }

    #[test]
    fn count_and_distinct() {
        let values = vec![
            Value::Text("a".into()),
            Value::Text("a".into()),
            Value::Text("b".into()),
            Value::Absent,
        ];
        let rows = [0, 1, 2, 3];
        assert_eq!(Aggregator::Count.apply(&values, &rows), Some(3.0));
        assert_eq!(Aggregator::DistinctCount.apply(&values, &rows), Some(2.0));
    }

    #[test]
    fn min_max_over_numbers() {
        let values = col(&[Some(5.0), Some(-1.0), Some(3.0)]);
        let rows = [0, 1, 2];
        assert_eq!(Aggregator::Min.apply(&values, &rows), Some(-1.0));
        assert_eq!(Aggregator::Max.apply(&values, &rows), Some(5.0));
    }

    #[test]
    fn currency_heuristic() {
        assert!(is_currency_measure("valor_estimado"));
        assert!(is_currency_measure("Saldo Atual"));
        assert!(is_currency_measure("EXECUTADO"));
        assert!(!is_currency_measure("units"));
        assert_eq!(
            Aggregator::Sum.format_for("valor_total"),
            ValueFormat::Currency
        );
        assert_eq!(Aggregator::Count.format_for("valor_total"), ValueFormat::Number);
    }

    #[test]
    fn unknown_aggregator_rejected() {
        assert!(matches!(
            Aggregator::parse("median"),
            Err(PortalError::UnknownAggregator(_))
        ));
    }
}
