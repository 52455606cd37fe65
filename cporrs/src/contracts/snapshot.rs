//! Write-through projection of the primary dashboard dataset.
//!
//! `dashboard_data.json` is both a cache and the integration surface read by
//! the auxiliary dashboards, so it must never be observed half-written: the
//! file is written to a temporary sibling and renamed into place.

use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::contracts::dashboard::{
    expired_list, expiring_list, kpis, monthly_series, unit_breakdown, ChartMode, ContractAlert,
    Kpis, MonthlySeries, TableRow, UgrBreakdown,
};
use crate::contracts::{ContractRow, ContractsConfig};
use crate::error::Result;

pub const SNAPSHOT_FILE: &str = "dashboard_data.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub kpis: Kpis,
    pub ugr_analysis: Vec<UgrBreakdown>,
    pub monthly_consumption: MonthlySeries,
    pub expiring_contracts_list: Vec<ContractAlert>,
    pub expired_contracts_list: Vec<ContractAlert>,
    pub raw_data_for_filters: Vec<TableRow>,
}

/// Project the unfiltered rows into the snapshot schema.
pub fn project(rows: &[ContractRow], today: NaiveDate, config: &ContractsConfig) -> DashboardSnapshot {
    let slice: Vec<&ContractRow> = rows.iter().collect();
    DashboardSnapshot {
        kpis: kpis(&slice, today, config),
        ugr_analysis: unit_breakdown(&slice, today),
        monthly_consumption: monthly_series(&slice, ChartMode::Monthly),
        expiring_contracts_list: expiring_list(&slice, today, config),
        expired_contracts_list: expired_list(&slice, today, config),
        raw_data_for_filters: slice
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
            .collect(),
    }
}

/// Serialize and atomically replace the snapshot file.
pub fn write_atomic(path: &Path, snapshot: &DashboardSnapshot) -> Result<()> {
    let json = serde_json::to_vec_pretty(snapshot)?;
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::NamedTempFile::new_in(parent)?;
    std::fs::write(tmp.path(), &json)?;
    tmp.persist(path)
        .map_err(|e| crate::error::PortalError::Io(e.error))?;
    tracing::debug!(path = %path.display(), bytes = json.len(), "dashboard snapshot written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(ugr: &str, estimated: f64, executed: f64, end: Option<NaiveDate>) -> ContractRow {
        ContractRow {
            description: format!("Contrato {ugr}"),
            ugr: ugr.to_string(),
            pi: String::new(),
            supplier: String::new(),
            contract: String::new(),
            status: String::new(),
            end_date: end,
            monthly_average: 0.0,
            months: [0.0; 12],
            estimated,
            executed,
            committed: 0.0,
            execution_rate: 0.0,
        }
    }

    #[test]
    fn snapshot_round_trips_through_file() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 15).unwrap();
        let rows = vec![
            row("X", 1000.0, 400.0, NaiveDate::from_ymd_opt(2024, 12, 31)),
            row("Y", 500.0, 500.0, NaiveDate::from_ymd_opt(2026, 6, 30)),
        ];
        let snapshot = project(&rows, today, &ContractsConfig::default());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SNAPSHOT_FILE);
        write_atomic(&path, &snapshot).unwrap();

        let loaded: DashboardSnapshot =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(loaded.kpis, snapshot.kpis);
        assert_eq!(loaded.raw_data_for_filters.len(), 2);
        assert_eq!(loaded.ugr_analysis.len(), 2);
    }
}
