//! Dashboard handlers: contracts upload, query, export and remote refresh.

use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::contracts::dashboard::{build_view, DashboardQuery, DashboardView};
use crate::contracts::{self, snapshot, ContractsData};
use crate::error::{PortalError, Result};
use crate::export::{self, ExportFormat, Grid, GridCell};
use crate::http::pivot::attachment;
use crate::http::{dataset_display_name, read_upload, SharedState};
use crate::loader;
use crate::store::DatasetSummary;

/// Load, normalize and register a contracts workbook. Returns the stored
/// dataset summary and the normalized rows.
fn ingest(
    state: &SharedState,
    filename: &str,
    bytes: &[u8],
) -> Result<(DatasetSummary, Arc<ContractsData>)> {
    let (table, schema) = loader::load(bytes, filename)?;
    let data = contracts::normalize(&table, &state.config.contracts)?;

    // The stored table drops the spreadsheet total rows so the pivot view of
    // this dataset matches the dashboard's numbers.
    let table = contracts::retain_rows(&table, &data.kept_rows);
    let dataset = state
        .store
        .put(&dataset_display_name(filename), table, schema);

    let data = Arc::new(data);
    state
        .contracts
        .write()
        .insert(dataset.id.clone(), Arc::clone(&data));

    Ok((
        DatasetSummary {
            id: dataset.id.clone(),
            name: dataset.name.clone(),
        },
        data,
    ))
}

/// Dashboard dataset ids currently registered, in store order.
fn dashboard_datasets(state: &SharedState) -> Vec<DatasetSummary> {
    let contracts = state.contracts.read();
    state
        .store
        .list()
        .into_iter()
        .filter(|d| contracts.contains_key(&d.id))
        .collect()
}

/// Make `summary` the primary dashboard dataset, dropping the previous one
/// and rewriting the on-disk projection.
fn promote_primary(
    state: &SharedState,
    summary: &DatasetSummary,
    data: &ContractsData,
) -> Result<()> {
    let previous = {
        let mut primary = state.primary_dashboard.write();
        let previous = primary.take();
        *primary = Some(summary.id.clone());
        previous
    };
    if let Some(old) = previous {
        if old != summary.id {
            state.store.delete(&old);
            state.contracts.write().remove(&old);
        }
    }

    let today = Utc::now().date_naive();
    let projection = snapshot::project(&data.rows, today, &state.config.contracts);
    snapshot::write_atomic(
        std::path::Path::new(&state.config.server.snapshot_file),
        &projection,
    )
}

pub(crate) async fn upload(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>> {
    let (filename, bytes) = read_upload(&mut multipart).await?;
    let (summary, data) = ingest(&state, &filename, &bytes)?;
    promote_primary(&state, &summary, &data)?;
    Ok(Json(json!({
        "dataset": summary,
        "datasets": dashboard_datasets(&state),
    })))
}

fn contracts_data(state: &SharedState, dataset_id: &str) -> Result<Arc<ContractsData>> {
    state
        .contracts
        .read()
        .get(dataset_id)
        .cloned()
        .ok_or_else(|| PortalError::UnknownDataset(dataset_id.to_string()))
}

pub(crate) async fn query(
    State(state): State<SharedState>,
    Json(query): Json<DashboardQuery>,
) -> Result<Json<DashboardView>> {
    let data = contracts_data(&state, &query.dataset_id)?;
    let view = build_view(
        &data.rows,
        &query,
        dashboard_datasets(&state),
        &data.warnings,
        Utc::now().date_naive(),
        &state.config.contracts,
    );
    Ok(Json(view))
}

#[derive(Debug, Deserialize)]
pub(crate) struct DashboardExportRequest {
    #[serde(flatten)]
    query: DashboardQuery,
    format: ExportFormat,
}

const TABLE_HEADERS: [&str; 11] = [
    "Contrato",
    "Descrição",
    "UGR",
    "PI",
    "Fornecedor",
    "Status",
    "Fim de Vigência",
    "Valor Estimado",
    "Executado",
    "Empenhado",
    "% Execução",
];

pub(crate) async fn export(
    State(state): State<SharedState>,
    Json(request): Json<DashboardExportRequest>,
) -> Result<Response> {
    let data = contracts_data(&state, &request.query.dataset_id)?;
    let view = build_view(
        &data.rows,
        &request.query,
        dashboard_datasets(&state),
        &data.warnings,
        Utc::now().date_naive(),
        &state.config.contracts,
    );

    let name = view.datasets
        .iter()
        .find(|d| d.id == request.query.dataset_id)
        .map(|d| d.name.clone())
        .unwrap_or_else(|| "contratos".to_string());
    let format = request.format;

    let bytes = crate::http::pivot::run_cancellable(&state, move |budget| {
        let headers: Vec<String> = TABLE_HEADERS.iter().map(|h| h.to_string()).collect();
        let body = view
            .table
            .iter()
            .map(|r| {
                vec![
                    GridCell::Text(r.contract.clone()),
                    GridCell::Text(r.description.clone()),
                    GridCell::Text(r.ugr.clone()),
                    GridCell::Text(r.pi.clone()),
                    GridCell::Text(r.supplier.clone()),
                    GridCell::Text(r.status.clone()),
                    GridCell::Text(
                        r.end_date
                            .map(|d| d.format("%d/%m/%Y").to_string())
                            .unwrap_or_default(),
                    ),
                    GridCell::Number(r.estimated),
                    GridCell::Number(r.executed),
                    GridCell::Number(r.committed),
                    GridCell::Number(r.execution_rate),
                ]
            })
            .collect();
        let grid = Grid::from_table("Contratos", &headers, body, true);
        export::render(&grid, format, budget)
    })
    .await?;

    Ok(attachment(bytes, &name, format))
}

/// Startup fetch of the primary workbook. A fetch failure is logged, not
/// fatal: the portal still serves uploads.
pub async fn boot_sync(state: &SharedState) -> Result<()> {
    if state.config.drive.file_id.is_none() || !state.config.drive.boot_sync {
        return Ok(());
    }
    let provider = match &state.provider {
        Some(p) => Arc::clone(p),
        None => return Ok(()),
    };
    let workbook = provider.fetch_workbook().await?;
    let (summary, data) = ingest(state, &workbook.filename, &workbook.bytes)?;
    promote_primary(state, &summary, &data)?;
    tracing::info!(dataset = %summary.id, "primary dashboard loaded at boot");
    Ok(())
}

pub(crate) async fn refresh_drive(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    if let Some(expected) = &state.config.drive.sync_token {
        let presented = headers
            .get("X-Portal-Token")
            .map(|v| v.as_bytes())
            .unwrap_or_default();
        if presented != expected.as_bytes() {
            return Err(PortalError::Forbidden(
                "missing or mismatched X-Portal-Token".to_string(),
            ));
        }
    }

    if state.config.drive.file_id.is_none() {
        return Err(PortalError::RemoteFetchFailed(
            "remote refresh is not configured".to_string(),
        ));
    }
    let provider = state.provider.clone().ok_or_else(|| {
        PortalError::RemoteFetchFailed("no workbook transport available".to_string())
    })?;

    let workbook = provider.fetch_workbook().await?;
    let (summary, data) = ingest(&state, &workbook.filename, &workbook.bytes)?;
    promote_primary(&state, &summary, &data)?;

    tracing::info!(dataset = %summary.id, "primary dashboard refreshed from remote");
    Ok(Json(json!({
        "dataset": summary,
        "datasets": dashboard_datasets(&state),
    })))
}
