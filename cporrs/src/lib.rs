pub mod collate;
pub mod config;
pub mod contracts;
pub mod drive;
pub mod error;
pub mod export;
pub mod expr;
pub mod http;
pub mod loader;
pub mod model;
pub mod pivot;
pub mod store;

use std::sync::Arc;

use crate::error::Result;
use crate::store::Dataset;

/// Decode an uploaded workbook and register it with the store.
pub fn load_dataset(
    store: &DatasetStore,
    bytes: &[u8],
    filename: &str,
    name: &str,
) -> Result<Arc<Dataset>> {
    let (table, schema) = loader::load(bytes, filename)?;
    Ok(store.put(name, table, schema))
}

pub use config::PortalConfig;
pub use error::PortalError;
pub use export::{ExportFormat, Grid};
pub use http::{router, AppState, SharedState};
pub use model::{ColumnKind, SchemaField, Table, Value};
pub use pivot::{Aggregator, ExecutionBudget, PivotQuery, PivotResult};
pub use store::{DatasetStore, DatasetSummary};

// Contracts re-exports
pub use contracts::dashboard::{DashboardQuery, DashboardView};
pub use contracts::{ContractsConfig, ContractsData, Lifecycle};
