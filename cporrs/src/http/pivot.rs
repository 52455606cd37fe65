//! Pivot and export handlers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::error::{PortalError, Result};
use crate::export::{self, ExportFormat, Grid};
use crate::http::SharedState;
use crate::pivot::{self, ExecutionBudget, PivotQuery, PivotResult};
use crate::store::Dataset;

/// Trips the cancellation flag if the request future is dropped before the
/// blocking computation finished (client disconnect).
struct DisconnectGuard {
    flag: Arc<AtomicBool>,
    armed: bool,
}

impl DisconnectGuard {
    fn new(flag: Arc<AtomicBool>) -> Self {
        Self { flag, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if self.armed {
            self.flag.store(true, Ordering::Relaxed);
        }
    }
}

/// Run a CPU-bound job on the blocking pool, wiring client disconnect to the
/// budget's cancellation flag.
pub(crate) async fn run_cancellable<T, F>(state: &SharedState, job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&ExecutionBudget) -> Result<T> + Send + 'static,
{
    let budget = ExecutionBudget::new(
        state.config.pivot.soft_deadline_ms,
        state.config.pivot.hard_deadline_ms,
    );
    let guard = DisconnectGuard::new(budget.cancel_handle());
    let task = tokio::task::spawn_blocking(move || job(&budget));
    let result = task
        .await
        .map_err(|e| PortalError::Other(anyhow::anyhow!("pivot task failed: {e}")))?;
    guard.disarm();
    result
}

pub(crate) async fn run_pivot(
    State(state): State<SharedState>,
    Json(query): Json<PivotQuery>,
) -> Result<Json<PivotResult>> {
    let dataset = state.store.get(&query.dataset_id)?;
    let result =
        run_cancellable(&state, move |budget| pivot::execute(&dataset, &query, budget)).await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub(crate) struct ExportRequest {
    #[serde(flatten)]
    query: PivotQuery,
    format: ExportFormat,
}

fn row_dimension_labels(dataset: &Dataset, keys: &[String]) -> Vec<String> {
    keys.iter()
        .map(|k| {
            dataset
                .field(k)
                .map(|f| f.label.clone())
                .unwrap_or_else(|| k.clone())
        })
        .collect()
}

pub(crate) async fn export(
    State(state): State<SharedState>,
    Json(request): Json<ExportRequest>,
) -> Result<Response> {
    let dataset = state.store.get(&request.query.dataset_id)?;
    let format = request.format;
    let name = dataset.name.clone();

    let bytes = run_cancellable(&state, move |budget| {
        let result = pivot::execute(&dataset, &request.query, budget)?;
        let labels = row_dimension_labels(&dataset, &result.rows);
        let grid = Grid::from_pivot(&dataset.name, &result, &labels);
        export::render(&grid, format, budget)
    })
    .await?;

    Ok(attachment(bytes, &name, format))
}

pub(crate) fn attachment(bytes: Vec<u8>, name: &str, format: ExportFormat) -> Response {
    let filename = export::filename(name, format);
    (
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response()
}
