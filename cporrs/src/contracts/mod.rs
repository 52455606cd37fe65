//! Contracts workbook normalization.
//!
//! A contracts upload is an ordinary dataset whose columns carry known
//! semantics: description, unit code (UGR), internal plan (PI), supplier,
//! contract number, status, vigency end, a monthly average, 12 per-month
//! value columns, an annual estimate, an executed total and the committed
//! (empenho/RAP) fields. This module locates those columns by header
//! heuristics, coerces the numerics and filters out the "Total" summary rows
//! spreadsheets love to carry.

pub mod dashboard;
pub mod snapshot;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::collate;
use crate::error::{PortalError, Result};
use crate::loader::infer::parse_date;
use crate::model::{Table, Value};

/// Derived lifecycle of a contract relative to a reference date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Lifecycle {
    NoDate,
    Future,
    OnTrack,
    ExpiredCurrent,
    ExpiredPrevious,
}

impl Lifecycle {
    pub fn classify(end_date: Option<NaiveDate>, today: NaiveDate) -> Lifecycle {
        match end_date {
            None => Lifecycle::NoDate,
            Some(end) if end.year() > today.year() => Lifecycle::Future,
            Some(end) if end.year() < today.year() => Lifecycle::ExpiredPrevious,
            Some(end) if end < today => Lifecycle::ExpiredCurrent,
            Some(_) => Lifecycle::OnTrack,
        }
    }
}

/// One normalized contract row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractRow {
    pub description: String,
    pub ugr: String,
    pub pi: String,
    pub supplier: String,
    pub contract: String,
    pub status: String,
    pub end_date: Option<NaiveDate>,
    pub monthly_average: f64,
    pub months: [f64; 12],
    pub estimated: f64,
    pub executed: f64,
    pub committed: f64,
    pub execution_rate: f64,
}

impl ContractRow {
    pub fn lifecycle(&self, today: NaiveDate) -> Lifecycle {
        Lifecycle::classify(self.end_date, today)
    }

    /// A contract counts as expired when its vigency passed or its status
    /// says so ("VENCIDO" but not "VENCENDO").
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        if let Some(end) = self.end_date {
            if end < today {
                return true;
            }
        }
        let status = collate::collation_key(&self.status);
        status.contains("venc") && !status.contains("vencendo")
    }

    pub fn days_until_end(&self, today: NaiveDate) -> Option<i64> {
        self.end_date.map(|end| (end - today).num_days())
    }
}

/// Where each semantic column was found, by normalized key.
#[derive(Debug, Clone, Default)]
pub struct ContractColumns {
    pub description: Option<String>,
    pub ugr: Option<String>,
    pub pi: Option<String>,
    pub supplier: Option<String>,
    pub contract: Option<String>,
    pub status: Option<String>,
    pub end_date: Option<String>,
    pub monthly_average: Option<String>,
    pub months: [Option<String>; 12],
    pub estimated: Option<String>,
    pub executed: Option<String>,
    pub committed_current: Option<String>,
    pub committed_carry: Option<String>,
}

/// A normalized contracts workbook: rows plus the column map and the
/// non-fatal anomalies found along the way. `kept_rows` holds the source
/// table indices that survived the total-row filter.
#[derive(Debug, Clone)]
pub struct ContractsData {
    pub rows: Vec<ContractRow>,
    pub columns: ContractColumns,
    pub kept_rows: Vec<usize>,
    pub warnings: Vec<String>,
}

/// Project a table onto the given row indices, preserving column order.
pub fn retain_rows(table: &Table, keep: &[usize]) -> Table {
    Table {
        columns: table
            .columns
            .iter()
            .map(|c| crate::model::Column {
                label: c.label.clone(),
                key: c.key.clone(),
                kind: c.kind,
                values: keep.iter().map(|&r| c.values[r].clone()).collect(),
            })
            .collect(),
        row_count: keep.len(),
    }
}

/// Tunables that vary between deployments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractsConfig {
    /// Row-description prefixes that mark spreadsheet total rows.
    pub total_row_prefixes: Vec<String>,
    /// KPI window, in days, for "expiring soon".
    pub expiring_window_days: i64,
    /// List size for the expiring/expired alert feeds.
    pub alert_list_size: usize,
}

impl Default for ContractsConfig {
    fn default() -> Self {
        Self {
            total_row_prefixes: vec![
                "total da ".to_string(),
                "total de ".to_string(),
                "total ".to_string(),
            ],
            expiring_window_days: 60,
            alert_list_size: 10,
        }
    }
}

fn find_key(table: &Table, predicate: impl Fn(&str) -> bool) -> Option<String> {
    table
        .columns
        .iter()
        .find(|c| predicate(&c.key))
        .map(|c| c.key.clone())
}

/// Locate the semantic columns by key/label heuristics. Month columns are
/// recognized by a date-prefixed header label.
pub fn detect_columns(table: &Table, warnings: &mut Vec<String>) -> ContractColumns {
    let mut columns = ContractColumns {
        description: find_key(table, |k| k.contains("descricao") || k.contains("objeto")),
        ugr: find_key(table, |k| k.contains("ugr") || k.contains("unidade")),
        pi: find_key(table, |k| {
            k == "pi" || k.starts_with("pi_") || k.contains("plano_interno")
        }),
        supplier: find_key(table, |k| k.contains("fornecedor") || k.contains("razao_social")),
        contract: find_key(table, |k| k.contains("contrato") || k == "numero"),
        status: find_key(table, |k| k.contains("status") || k.contains("situacao")),
        end_date: find_key(table, |k| k.contains("vigencia") || k.contains("termino")),
        monthly_average: find_key(table, |k| k.contains("media")),
        estimated: find_key(table, |k| k.contains("estimado") || k.contains("anual")),
        executed: find_key(table, |k| k.contains("executado")),
        committed_current: find_key(table, |k| k.contains("empenho") && !k.contains("rap")),
        committed_carry: find_key(table, |k| k.contains("rap") || k.contains("restos")),
        ..Default::default()
    };

    for column in &table.columns {
        let prefix = column.label.get(..10).unwrap_or(&column.label);
        if let Some(date) = parse_date(prefix) {
            let slot = &mut columns.months[date.month0() as usize];
            if slot.is_none() {
                *slot = Some(column.key.clone());
            }
        }
    }
    for (i, slot) in columns.months.iter().enumerate() {
        if slot.is_none() {
            warnings.push(format!("month column {} not found", i + 1));
        }
    }
    if columns.description.is_none() {
        warnings.push("description column not found".to_string());
    }
    if columns.end_date.is_none() {
        warnings.push("vigency-end column not found".to_string());
    }

    columns
}

fn text_at(table: &Table, key: &Option<String>, row: usize) -> String {
    key.as_deref()
        .and_then(|k| table.value(k, row))
        .map(|v| v.to_string())
        .unwrap_or_default()
}

fn number_at(table: &Table, key: &Option<String>, row: usize) -> f64 {
    key.as_deref()
        .and_then(|k| table.value(k, row))
        .and_then(Value::as_number)
        .unwrap_or(0.0)
}

fn date_at(table: &Table, key: &Option<String>, row: usize) -> Option<NaiveDate> {
    match key.as_deref().and_then(|k| table.value(k, row)) {
        Some(Value::Date(d)) => Some(*d),
        Some(Value::Text(s)) => parse_date(s),
        _ => None,
    }
}

/// True for the spreadsheet summary rows the ingestion invariant excludes.
fn is_total_row(description: &str, ugr: &str, config: &ContractsConfig) -> bool {
    let folded = collate::collation_key(description.trim());
    if folded == "total" || folded == "total geral" {
        return true;
    }
    ugr.trim().is_empty()
        && config
            .total_row_prefixes
            .iter()
            .any(|prefix| folded.starts_with(prefix.as_str()))
}

/// Normalize a contracts table.
#[tracing::instrument(skip(table, config), fields(rows = table.row_count))]
pub fn normalize(table: &Table, config: &ContractsConfig) -> Result<ContractsData> {
    let mut warnings = Vec::new();
    let columns = detect_columns(table, &mut warnings);

    let mut rows = Vec::with_capacity(table.row_count);
    let mut kept_rows = Vec::with_capacity(table.row_count);
    let mut discarded = 0usize;
    for r in 0..table.row_count {
        let description = text_at(table, &columns.description, r);
        let ugr = text_at(table, &columns.ugr, r);
        if is_total_row(&description, &ugr, config) {
            discarded += 1;
            continue;
        }
        kept_rows.push(r);

        let mut months = [0.0f64; 12];
        let mut month_sum = 0.0;
        for (i, slot) in columns.months.iter().enumerate() {
            months[i] = number_at(table, slot, r);
            month_sum += months[i];
        }

        let estimated = number_at(table, &columns.estimated, r);
        let committed_current = number_at(table, &columns.committed_current, r);
        let committed_carry = number_at(table, &columns.committed_carry, r);

        let mut executed = number_at(table, &columns.executed, r);
        if executed == 0.0 {
            executed = if month_sum != 0.0 {
                month_sum
            } else {
                committed_current + committed_carry
            };
        }
        let committed = if committed_current != 0.0 {
            committed_current
        } else {
            committed_current + committed_carry
        };
        let execution_rate = if estimated > 0.0 {
            executed / estimated * 100.0
        } else {
            0.0
        };

        let end_date = date_at(table, &columns.end_date, r);
        if end_date.is_none() && columns.end_date.is_some() {
            let raw = text_at(table, &columns.end_date, r);
            if !raw.trim().is_empty() {
                warnings.push(format!("row {}: unparseable vigency date '{raw}'", r + 1));
            }
        }

        rows.push(ContractRow {
            description,
            ugr,
            pi: text_at(table, &columns.pi, r),
            supplier: text_at(table, &columns.supplier, r),
            contract: text_at(table, &columns.contract, r),
            status: text_at(table, &columns.status, r),
            end_date,
            monthly_average: number_at(table, &columns.monthly_average, r),
            months,
            estimated,
            executed,
            committed,
            execution_rate,
        });
    }

    if rows.is_empty() {
        return Err(PortalError::EmptyInput(
            "no contract rows left after normalization".to_string(),
        ));
    }

    tracing::info!(kept = rows.len(), discarded, "contracts normalized");
    Ok(ContractsData {
        rows,
        columns,
        kept_rows,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 15).unwrap()
    }

    #[test]
    fn lifecycle_state_machine() {
        let t = today();
        assert_eq!(Lifecycle::classify(None, t), Lifecycle::NoDate);
        let future = NaiveDate::from_ymd_opt(2026, 6, 30);
        assert_eq!(Lifecycle::classify(future, t), Lifecycle::Future);
        let on_track = NaiveDate::from_ymd_opt(2025, 3, 15);
        assert_eq!(Lifecycle::classify(on_track, t), Lifecycle::OnTrack);
        let expired_current = NaiveDate::from_ymd_opt(2025, 1, 2);
        assert_eq!(
            Lifecycle::classify(expired_current, t),
            Lifecycle::ExpiredCurrent
        );
        let expired_previous = NaiveDate::from_ymd_opt(2024, 12, 31);
        assert_eq!(
            Lifecycle::classify(expired_previous, t),
            Lifecycle::ExpiredPrevious
        );
    }

    #[test]
    fn total_rows_are_recognized() {
        let config = ContractsConfig::default();
        assert!(is_total_row("Total", "", &config));
        assert!(is_total_row("TOTAL GERAL", "X", &config));
        assert!(is_total_row("Total da UGR 170", "", &config));
        assert!(!is_total_row("Total da UGR 170", "170", &config));
        assert!(!is_total_row("Serviço total de limpeza", "", &config));
    }

    #[test]
    fn status_based_expiry() {
        let mut row = ContractRow {
            description: "x".into(),
            ugr: "1".into(),
            pi: String::new(),
            supplier: String::new(),
            contract: String::new(),
            status: "VENCIDO".into(),
            end_date: None,
            monthly_average: 0.0,
            months: [0.0; 12],
            estimated: 0.0,
            executed: 0.0,
            committed: 0.0,
            execution_rate: 0.0,
        };
        assert!(row.is_expired(today()));
        row.status = "VENCENDO".into();
        assert!(!row.is_expired(today()));
        row.status = "ATIVO".into();
        row.end_date = NaiveDate::from_ymd_opt(2024, 1, 1);
        assert!(row.is_expired(today()));
    }
}
