//! HTTP facade: stateless handlers over the engine.
//!
//! Handlers validate, call into the engine, and serialize. All shared state
//! lives in [`AppState`]; the pivot planner runs against the dataset
//! snapshot captured at entry and never holds a lock.

pub mod dashboard;
pub mod pivot;

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::config::PortalConfig;
use crate::contracts::ContractsData;
use crate::drive::WorkbookProvider;
use crate::error::{PortalError, Result};
use crate::loader;
use crate::store::DatasetStore;

/// Everything the handlers share.
pub struct AppState {
    pub store: DatasetStore,
    pub config: PortalConfig,
    pub provider: Option<Arc<dyn WorkbookProvider>>,
    /// Normalized contract data per dashboard dataset id.
    pub contracts: RwLock<HashMap<String, Arc<ContractsData>>>,
    /// Dataset id backing the primary dashboard and its on-disk projection.
    pub primary_dashboard: RwLock<Option<String>>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: PortalConfig, provider: Option<Arc<dyn WorkbookProvider>>) -> SharedState {
        Arc::new(Self {
            store: DatasetStore::new(),
            config,
            provider,
            contracts: RwLock::new(HashMap::new()),
            primary_dashboard: RwLock::new(None),
        })
    }
}

impl IntoResponse for PortalError {
    fn into_response(self) -> Response {
        let status = match &self {
            PortalError::UnsupportedFormat(_)
            | PortalError::Malformed(_)
            | PortalError::EmptyInput(_)
            | PortalError::SchemaConflict(_)
            | PortalError::UnknownColumn(_)
            | PortalError::UnknownAggregator(_)
            | PortalError::NoMeasure
            | PortalError::InvalidExpression(_) => StatusCode::BAD_REQUEST,
            PortalError::UnknownDataset(_) => StatusCode::NOT_FOUND,
            PortalError::Forbidden(_) => StatusCode::FORBIDDEN,
            PortalError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            // Nginx's "client closed request"; there is no std constant.
            PortalError::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
            PortalError::RemoteFetchFailed(_) => StatusCode::BAD_GATEWAY,
            PortalError::Io(_)
            | PortalError::Json(_)
            | PortalError::Config(_)
            | PortalError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/upload", post(upload))
        .route("/api/datasets", get(list_datasets))
        .route("/api/dataset/{id}", axum::routing::delete(delete_dataset))
        .route("/api/dataset/{id}/calculations", post(update_calculations))
        .route("/api/filter-values", get(filter_values))
        .route("/api/pivot", post(pivot::run_pivot))
        .route("/api/export", post(pivot::export))
        .route("/api/dashboard/upload", post(dashboard::upload))
        .route("/api/dashboard/query", post(dashboard::query))
        .route("/api/dashboard/export", post(dashboard::export))
        .route("/api/dashboard/refresh-drive", post(dashboard::refresh_drive))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "datasets": state.store.len() }))
}

/// Pull the `file` field out of a multipart body.
pub(crate) async fn read_upload(multipart: &mut Multipart) -> Result<(String, Vec<u8>)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PortalError::Malformed(format!("invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(|n| n.to_string())
            .ok_or_else(|| PortalError::Malformed("file field has no filename".to_string()))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| PortalError::Malformed(format!("failed to read upload body: {e}")))?;
        return Ok((filename, bytes.to_vec()));
    }
    Err(PortalError::Malformed(
        "multipart body has no 'file' field".to_string(),
    ))
}

pub(crate) fn dataset_display_name(filename: &str) -> String {
    let stem = filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(filename);
    let stem = stem.trim();
    if stem.is_empty() {
        "dados".to_string()
    } else {
        stem.to_string()
    }
}

/// Upload response envelope shared by the workbench upload and the
/// calculations update.
pub(crate) fn dataset_envelope(dataset: &crate::store::Dataset) -> serde_json::Value {
    let schema_map: serde_json::Map<String, serde_json::Value> = dataset
        .schema
        .iter()
        .map(|f| (f.key.clone(), json!(f.kind.dtype())))
        .collect();
    json!({
        "datasetId": dataset.id,
        "name": dataset.name,
        "columns": dataset.schema.iter().map(|f| json!({ "key": f.key, "label": f.label })).collect::<Vec<_>>(),
        "dimensions": dataset.dimension_keys(),
        "measures": dataset.measure_keys(),
        "schema": schema_map,
        "rowCount": dataset.table.row_count,
        "aggregations": dataset.aggregator_catalog(),
        "availablePostColumns": dataset.available_post_columns(),
    })
}

async fn upload(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>> {
    let (filename, bytes) = read_upload(&mut multipart).await?;
    let (table, schema) = loader::load(&bytes, &filename)?;
    let dataset = state
        .store
        .put(&dataset_display_name(&filename), table, schema);
    Ok(Json(dataset_envelope(&dataset)))
}

async fn list_datasets(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(json!({ "datasets": state.store.list() }))
}

async fn delete_dataset(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> StatusCode {
    state.store.delete(&id);
    state.contracts.write().remove(&id);
    let mut primary = state.primary_dashboard.write();
    if primary.as_deref() == Some(id.as_str()) {
        *primary = None;
    }
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
pub(crate) struct CalculationsBody {
    #[serde(default)]
    pre: Vec<crate::pivot::CalculationSpec>,
    #[serde(default)]
    post: Vec<crate::pivot::CalculationSpec>,
}

async fn update_calculations(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(body): Json<CalculationsBody>,
) -> Result<Json<serde_json::Value>> {
    let (dataset, warnings) = state.store.update_calculations(&id, body.pre, body.post)?;
    let mut envelope = dataset_envelope(&dataset);
    if !warnings.is_empty() {
        envelope["warnings"] = json!(warnings);
    }
    Ok(Json(envelope))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilterValuesParams {
    dataset_id: String,
    field: String,
}

async fn filter_values(
    State(state): State<SharedState>,
    Query(params): Query<FilterValuesParams>,
) -> Result<Json<serde_json::Value>> {
    let dataset = state.store.get(&params.dataset_id)?;
    let values = dataset.filter_values(&params.field)?;
    Ok(Json(json!({ "values": values.as_ref() })))
}
