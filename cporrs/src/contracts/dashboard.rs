//! Dashboard derivations over normalized contract rows.
//!
//! Everything here is a pure function of `(rows, filters, scenario, today)`;
//! the HTTP layer owns the state and the clock.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::collate;
use crate::contracts::{ContractRow, ContractsConfig, Lifecycle};
use crate::store::DatasetSummary;

pub const MONTH_LABELS: [&str; 12] = [
    "Jan", "Fev", "Mar", "Abr", "Mai", "Jun", "Jul", "Ago", "Set", "Out", "Nov", "Dez",
];

/// Headline indicators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kpis {
    pub total_estimated: f64,
    pub total_executed: f64,
    pub total_committed: f64,
    pub balance: f64,
    pub execution_percent: f64,
    pub contract_count: usize,
    pub expiring_count: usize,
    pub expired_count: usize,
}

/// Grouped totals per unit code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UgrBreakdown {
    pub ugr: String,
    pub estimated: f64,
    pub executed: f64,
    pub committed: f64,
    pub execution_percent: f64,
    pub active_contracts: usize,
    pub expired_contracts: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

/// One entry of the expiring/expired feeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractAlert {
    pub contract: String,
    pub description: String,
    pub ugr: String,
    pub supplier: String,
    pub end_date: Option<NaiveDate>,
    pub days: i64,
    pub icon: String,
    pub motivo: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapRow {
    pub description: String,
    pub months: [f64; 12],
    /// 0-based month of the vigency end, when it falls in the current year.
    pub highlight_month: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlySeries {
    pub labels: Vec<String>,
    pub values: [f64; 12],
    pub mode: ChartMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartSlice {
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Charts {
    pub monthly: MonthlySeries,
    pub distribution: Vec<ChartSlice>,
    pub per_unit: Vec<ChartSlice>,
    pub planned_executed: Vec<ChartSlice>,
    pub heatmap: Vec<HeatmapRow>,
}

/// Exportable table row (also the snapshot's raw filter data).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRow {
    pub contract: String,
    pub description: String,
    pub ugr: String,
    pub pi: String,
    pub supplier: String,
    pub status: String,
    pub end_date: Option<NaiveDate>,
    pub estimated: f64,
    pub executed: f64,
    pub committed: f64,
    pub execution_rate: f64,
    pub lifecycle: Lifecycle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartMode {
    Total,
    Monthly,
}

impl Default for ChartMode {
    fn default() -> Self {
        ChartMode::Monthly
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioField {
    Estimated,
    Executed,
    Committed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioAdjustment {
    pub ugr: String,
    pub field: ScenarioField,
    pub delta: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioRequest {
    #[serde(default)]
    pub adjustments: Vec<ScenarioAdjustment>,
}

/// Echo of the adjustments plus the aggregate deltas and shifted KPIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioOutcome {
    pub adjustments: Vec<ScenarioAdjustment>,
    pub delta_planned: f64,
    pub delta_executed: f64,
    pub delta_committed: f64,
    pub kpis: Kpis,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardFilters {
    pub ugr: Vec<String>,
    pub pi: Vec<String>,
    pub fornecedor: Vec<String>,
    pub status: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardQuery {
    pub dataset_id: String,
    #[serde(default)]
    pub filters: DashboardFilters,
    #[serde(default)]
    pub scenario: Option<ScenarioRequest>,
    #[serde(default)]
    pub chart_mode: ChartMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOptions {
    pub ugr: Vec<String>,
    pub pi: Vec<String>,
    pub fornecedor: Vec<String>,
    pub status: Vec<String>,
}

/// The dashboard response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardView {
    pub dataset_id: String,
    pub datasets: Vec<DatasetSummary>,
    pub generated_at: DateTime<Utc>,
    pub kpis: Kpis,
    pub alerts: Vec<ContractAlert>,
    pub unit_breakdown: Vec<UgrBreakdown>,
    pub table: Vec<TableRow>,
    pub charts: Charts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<ScenarioOutcome>,
    pub filter_options: FilterOptions,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

fn matches_filter(allowed: &[String], value: &str) -> bool {
    allowed.is_empty() || allowed.iter().any(|a| a == value)
}

fn filtered<'a>(rows: &'a [ContractRow], filters: &DashboardFilters) -> Vec<&'a ContractRow> {
    rows.iter()
        .filter(|r| {
            matches_filter(&filters.ugr, &r.ugr)
                && matches_filter(&filters.pi, &r.pi)
                && matches_filter(&filters.fornecedor, &r.supplier)
                && matches_filter(&filters.status, &r.status)
        })
        .collect()
}

/// Base KPIs over a row slice.
pub fn kpis(rows: &[&ContractRow], today: NaiveDate, config: &ContractsConfig) -> Kpis {
    let total_estimated: f64 = rows.iter().map(|r| r.estimated).sum();
    let total_executed: f64 = rows.iter().map(|r| r.executed).sum();
    let total_committed: f64 = rows.iter().map(|r| r.committed).sum();

    let expiring_count = rows
        .iter()
        .filter(|r| {
            r.days_until_end(today)
                .map(|d| (0..=config.expiring_window_days).contains(&d))
                .unwrap_or(false)
        })
        .count();
    let expired_count = rows
        .iter()
        .filter(|r| r.end_date.map(|end| end < today).unwrap_or(false))
        .count();

    Kpis {
        total_estimated,
        total_executed,
        total_committed,
        balance: (total_estimated - total_executed).max(0.0),
        execution_percent: if total_estimated > 0.0 {
            total_executed / total_estimated * 100.0
        } else {
            0.0
        },
        contract_count: rows.len(),
        expiring_count,
        expired_count,
    }
}

/// Grouped totals and contract counts per UGR.
pub fn unit_breakdown(rows: &[&ContractRow], today: NaiveDate) -> Vec<UgrBreakdown> {
    let mut groups: BTreeMap<String, Vec<&ContractRow>> = BTreeMap::new();
    for row in rows {
        groups.entry(row.ugr.clone()).or_default().push(row);
    }
    let mut out: Vec<UgrBreakdown> = groups
        .into_iter()
        .map(|(ugr, members)| {
            let estimated: f64 = members.iter().map(|r| r.estimated).sum();
            let executed: f64 = members.iter().map(|r| r.executed).sum();
            let committed: f64 = members.iter().map(|r| r.committed).sum();
            let expired = members.iter().filter(|r| r.is_expired(today)).count();
            UgrBreakdown {
                ugr,
                estimated,
                executed,
                committed,
                execution_percent: if estimated > 0.0 {
                    executed / estimated * 100.0
                } else {
                    0.0
                },
                active_contracts: members.len() - expired,
                expired_contracts: expired,
            }
        })
        .collect();
    out.sort_by(|a, b| {
        b.estimated
            .partial_cmp(&a.estimated)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| collate::compare(&a.ugr, &b.ugr))
    });
    out
}

/// Sum of each month's column over the slice; cumulative in `Total` mode.
pub fn monthly_series(rows: &[&ContractRow], mode: ChartMode) -> MonthlySeries {
    let mut values = [0.0f64; 12];
    for row in rows {
        for (i, v) in row.months.iter().enumerate() {
            values[i] += v;
        }
    }
    if mode == ChartMode::Total {
        let mut running = 0.0;
        for v in values.iter_mut() {
            running += *v;
            *v = running;
        }
    }
    MonthlySeries {
        labels: MONTH_LABELS.iter().map(|s| s.to_string()).collect(),
        values,
        mode,
    }
}

/// Contracts ending within the window, most urgent first.
pub fn expiring_list(
    rows: &[&ContractRow],
    today: NaiveDate,
    config: &ContractsConfig,
) -> Vec<ContractAlert> {
    let mut entries: Vec<(i64, &ContractRow)> = rows
        .iter()
        .filter_map(|r| {
            let days = r.days_until_end(today)?;
            (0..=config.expiring_window_days)
                .contains(&days)
                .then_some((days, *r))
        })
        .collect();
    entries.sort_by_key(|(days, _)| *days);
    entries
        .into_iter()
        .take(config.alert_list_size)
        .map(|(days, r)| {
            let severity = if days <= 15 {
                Severity::Critical
            } else if days <= 30 {
                Severity::Warning
            } else {
                Severity::Info
            };
            ContractAlert {
                contract: r.contract.clone(),
                description: r.description.clone(),
                ugr: r.ugr.clone(),
                supplier: r.supplier.clone(),
                end_date: r.end_date,
                days,
                icon: match severity {
                    Severity::Critical => "🔴".to_string(),
                    Severity::Warning => "🟠".to_string(),
                    Severity::Info => "🟡".to_string(),
                },
                motivo: if days == 0 {
                    "Vence hoje".to_string()
                } else {
                    format!("Vence em {days} dias")
                },
                severity,
            }
        })
        .collect()
}

/// Contracts already past their vigency, most recently expired first.
pub fn expired_list(
    rows: &[&ContractRow],
    today: NaiveDate,
    config: &ContractsConfig,
) -> Vec<ContractAlert> {
    let mut entries: Vec<(i64, &ContractRow)> = rows
        .iter()
        .filter_map(|r| {
            let days = r.days_until_end(today)?;
            (days < 0).then_some((-days, *r))
        })
        .collect();
    entries.sort_by_key(|(days_ago, _)| *days_ago);
    entries
        .into_iter()
        .take(config.alert_list_size)
        .map(|(days_ago, r)| {
            let severity = match r.lifecycle(today) {
                Lifecycle::ExpiredCurrent => Severity::Critical,
                _ => Severity::Warning,
            };
            ContractAlert {
                contract: r.contract.clone(),
                description: r.description.clone(),
                ugr: r.ugr.clone(),
                supplier: r.supplier.clone(),
                end_date: r.end_date,
                days: -days_ago,
                icon: "❌".to_string(),
                motivo: format!("Vencido há {days_ago} dias"),
                severity,
            }
        })
        .collect()
}

/// Per-description monthly values; the vigency month is flagged when it
/// falls within the current year.
pub fn heatmap(rows: &[&ContractRow], today: NaiveDate) -> Vec<HeatmapRow> {
    let mut groups: BTreeMap<String, HeatmapRow> = BTreeMap::new();
    for row in rows {
        let entry = groups
            .entry(row.description.clone())
            .or_insert_with(|| HeatmapRow {
                description: row.description.clone(),
                months: [0.0; 12],
                highlight_month: None,
            });
        for (i, v) in row.months.iter().enumerate() {
            entry.months[i] += v;
        }
        if let Some(end) = row.end_date {
            if end.year() == today.year() {
                entry.highlight_month = Some(end.month0() as usize);
            }
        }
    }
    groups.into_values().collect()
}

/// Apply scenario deltas on top of already-aggregated KPIs.
pub fn scenario_outcome(
    request: &ScenarioRequest,
    base: &Kpis,
    breakdown: &[UgrBreakdown],
    warnings: &mut Vec<String>,
) -> ScenarioOutcome {
    let mut delta_planned = 0.0;
    let mut delta_executed = 0.0;
    let mut delta_committed = 0.0;
    for adjustment in &request.adjustments {
        if !breakdown.iter().any(|b| b.ugr == adjustment.ugr) {
            warnings.push(format!(
                "scenario adjustment for unknown UGR '{}' ignored",
                adjustment.ugr
            ));
            continue;
        }
        match adjustment.field {
            ScenarioField::Estimated => delta_planned += adjustment.delta,
            ScenarioField::Executed => delta_executed += adjustment.delta,
            ScenarioField::Committed => delta_committed += adjustment.delta,
        }
    }

    let total_estimated = base.total_estimated + delta_planned;
    let total_executed = base.total_executed + delta_executed;
    let kpis = Kpis {
        total_estimated,
        total_executed,
        total_committed: base.total_committed + delta_committed,
        balance: (total_estimated - total_executed).max(0.0),
        execution_percent: if total_estimated > 0.0 {
            total_executed / total_estimated * 100.0
        } else {
            0.0
        },
        ..base.clone()
    };

    ScenarioOutcome {
        adjustments: request.adjustments.clone(),
        delta_planned,
        delta_executed,
        delta_committed,
        kpis,
    }
}

fn distinct_sorted(values: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for v in values {
        if !v.trim().is_empty() && !out.contains(&v) {
            out.push(v);
        }
    }
    collate::sort(&mut out);
    out
}

/// Assemble the full dashboard view.
#[tracing::instrument(skip(rows, query, datasets, normalizer_warnings, config), fields(dataset = %query.dataset_id))]
pub fn build_view(
    rows: &[ContractRow],
    query: &DashboardQuery,
    datasets: Vec<DatasetSummary>,
    normalizer_warnings: &[String],
    today: NaiveDate,
    config: &ContractsConfig,
) -> DashboardView {
    let slice = filtered(rows, &query.filters);
    let mut warnings: Vec<String> = normalizer_warnings.to_vec();

    let base_kpis = kpis(&slice, today, config);
    let breakdown = unit_breakdown(&slice, today);

    let mut alerts = expiring_list(&slice, today, config);
    alerts.extend(expired_list(&slice, today, config));

    let scenario = query
        .scenario
        .as_ref()
        .filter(|s| !s.adjustments.is_empty())
        .map(|s| scenario_outcome(s, &base_kpis, &breakdown, &mut warnings));

    let charts = Charts {
        monthly: monthly_series(&slice, query.chart_mode),
        distribution: {
            let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
            for row in &slice {
                let label = match row.lifecycle(today) {
                    Lifecycle::NoDate => "Sem data",
                    Lifecycle::Future => "Vigente (próximos anos)",
                    Lifecycle::OnTrack => "Vigente",
                    Lifecycle::ExpiredCurrent => "Vencido no ano",
                    Lifecycle::ExpiredPrevious => "Vencido em anos anteriores",
                };
                *counts.entry(label).or_default() += 1;
            }
            counts
                .into_iter()
                .map(|(label, count)| ChartSlice {
                    label: label.to_string(),
                    value: count as f64,
                })
                .collect()
        },
        per_unit: breakdown
            .iter()
            .map(|b| ChartSlice {
                label: b.ugr.clone(),
                value: b.executed,
            })
            .collect(),
        planned_executed: vec![
            ChartSlice {
                label: "Planejado".to_string(),
                value: base_kpis.total_estimated,
            },
            ChartSlice {
                label: "Executado".to_string(),
                value: base_kpis.total_executed,
            },
            ChartSlice {
                label: "Empenhado".to_string(),
                value: base_kpis.total_committed,
            },
        ],
        heatmap: heatmap(&slice, today),
    };

    let table = slice
        .iter()
        .map(|r| TableRow {
            contract: r.contract.clone(),
            description: r.description.clone(),
            ugr: r.ugr.clone(),
            pi: r.pi.clone(),
            supplier: r.supplier.clone(),
            status: r.status.clone(),
            end_date: r.end_date,
            estimated: r.estimated,
            executed: r.executed,
            committed: r.committed,
            execution_rate: r.execution_rate,
            lifecycle: r.lifecycle(today),
        })
        .collect();

    // Options always come from the unfiltered rows so the UI can widen a
    // narrow selection again.
    let filter_options = FilterOptions {
        ugr: distinct_sorted(rows.iter().map(|r| r.ugr.clone())),
        pi: distinct_sorted(rows.iter().map(|r| r.pi.clone())),
        fornecedor: distinct_sorted(rows.iter().map(|r| r.supplier.clone())),
        status: distinct_sorted(rows.iter().map(|r| r.status.clone())),
    };

    DashboardView {
        dataset_id: query.dataset_id.clone(),
        datasets,
        generated_at: Utc::now(),
        kpis: base_kpis,
        alerts,
        unit_breakdown: breakdown,
        table,
        charts,
        scenario,
        filter_options,
        warnings,
    }
}
