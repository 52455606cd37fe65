//! Export pipeline: pivot results and dashboard slices flatten into one grid
//! shape rendered to Excel workbook bytes or PDF bytes.

pub mod excel;
pub mod grid;
pub mod pdf;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::pivot::ExecutionBudget;

pub use grid::{Grid, GridCell};

/// Output targets offered by the export endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Excel,
    Pdf,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Excel => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            ExportFormat::Pdf => "application/pdf",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Excel => "xlsx",
            ExportFormat::Pdf => "pdf",
        }
    }
}

/// Render a grid to the requested format.
pub fn render(grid: &Grid, format: ExportFormat, budget: &ExecutionBudget) -> Result<Vec<u8>> {
    match format {
        ExportFormat::Excel => excel::render(grid, budget),
        ExportFormat::Pdf => pdf::render(grid, budget),
    }
}

/// Attachment filename: dataset name plus the current timestamp.
pub fn filename(dataset_name: &str, format: ExportFormat) -> String {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let base: String = dataset_name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let base = base.trim_matches('_');
    let base = if base.is_empty() { "dados" } else { base };
    format!("{base}_{stamp}.{}", format.extension())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_are_safe() {
        let name = filename("Contratos 2025 / CPOR", ExportFormat::Excel);
        assert!(name.ends_with(".xlsx"));
        assert!(!name.contains('/'));
        assert!(!name.contains(' '));
        assert!(filename("", ExportFormat::Pdf).starts_with("dados_"));
    }
}
