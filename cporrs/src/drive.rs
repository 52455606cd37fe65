//! Remote workbook provider boundary.
//!
//! The portal can pull its primary contracts workbook from a remote file
//! provider at startup and on demand. The transport is an external
//! collaborator hidden behind [`WorkbookProvider`]; the engine only depends
//! on "give me the current bytes of the configured workbook".

use async_trait::async_trait;

use crate::error::{PortalError, Result};

/// Bytes of a fetched workbook plus the filename the loader should use to
/// pick a decoder.
#[derive(Debug, Clone)]
pub struct FetchedWorkbook {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Unified interface to the remote file provider.
#[async_trait]
pub trait WorkbookProvider: Send + Sync {
    async fn fetch_workbook(&self) -> Result<FetchedWorkbook>;
}

/// Provider backed by a local path, typically a synced drive mount. Also the
/// provider used by integration tests.
pub struct PathProvider {
    path: std::path::PathBuf,
}

impl PathProvider {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl WorkbookProvider for PathProvider {
    async fn fetch_workbook(&self) -> Result<FetchedWorkbook> {
        let filename = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "workbook.xlsx".to_string());
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            PortalError::RemoteFetchFailed(format!(
                "could not read '{}': {e}",
                self.path.display()
            ))
        })?;
        tracing::info!(path = %self.path.display(), bytes = bytes.len(), "workbook fetched");
        Ok(FetchedWorkbook { filename, bytes })
    }
}

/// In-memory provider for tests.
pub struct StaticProvider {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
impl WorkbookProvider for StaticProvider {
    async fn fetch_workbook(&self) -> Result<FetchedWorkbook> {
        Ok(FetchedWorkbook {
            filename: self.filename.clone(),
            bytes: self.bytes.clone(),
        })
    }
}

/// Wire a provider from the configured file id. Ids that resolve to a local
/// path (a synced mount) use [`PathProvider`]; anything else needs a real
/// transport plugged in by the deployment.
pub fn provider_from_config(file_id: &str) -> Option<std::sync::Arc<dyn WorkbookProvider>> {
    let path = std::path::Path::new(file_id);
    if path.exists() {
        Some(std::sync::Arc::new(PathProvider::new(path)))
    } else {
        tracing::warn!(
            file_id,
            "no workbook transport available for this file id; remote refresh disabled"
        );
        None
    }
}
