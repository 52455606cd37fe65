//! Request and response payloads for the pivot workbench.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Hard cap on measures per query.
pub const MAX_MEASURES: usize = 6;

/// Stage at which a calculated column runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalcStage {
    /// Evaluated per raw row before grouping; becomes a measure.
    Pre,
    /// Evaluated per result row after aggregation; appended to the output.
    Post,
}

/// A calculated-column definition as sent by the workbench UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationSpec {
    pub id: String,
    pub name: String,
    pub stage: CalcStage,
    #[serde(default = "default_operation")]
    pub operation: String,
    pub expression: String,
    #[serde(default)]
    pub decimals: Option<u32>,
    #[serde(default)]
    pub result_key: Option<String>,
    /// Pre stage only: schema key of the materialized measure column.
    #[serde(default)]
    pub result_field: Option<String>,
}

fn default_operation() -> String {
    "expression".to_string()
}

impl CalculationSpec {
    /// Key under which this calculation's output is exposed.
    pub fn output_key(&self) -> String {
        self.result_key
            .clone()
            .or_else(|| self.result_field.clone())
            .unwrap_or_else(|| crate::loader::infer::normalize_key(&self.name))
    }
}

/// A pivot query bound to one dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotQuery {
    pub dataset_id: String,
    #[serde(default)]
    pub rows: Vec<String>,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub measures: Vec<String>,
    pub aggregator: String,
    #[serde(default)]
    pub filters: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub pre_calculations: Vec<CalculationSpec>,
    #[serde(default)]
    pub post_calculations: Vec<CalculationSpec>,
}

/// Number rendering hint for the front-end and the exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueFormat {
    Number,
    Currency,
}

/// Per-measure summary used when no row/column dimensions are selected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasureSummary {
    pub measure: String,
    pub label: String,
    pub value: Option<f64>,
}

/// Echo of the calculations that shaped a result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalculationsEcho {
    pub pre: Vec<CalculationSpec>,
    pub post: Vec<CalculationSpec>,
}

/// The materialized pivot matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotResult {
    pub rows: Vec<String>,
    pub columns: Vec<String>,
    pub row_headers: Vec<Vec<String>>,
    pub column_headers: Vec<Vec<String>>,
    /// Stable keys aligned with `column_headers`, post-calculation columns
    /// appended after the aggregated measure columns.
    pub column_keys: Vec<String>,
    pub values: Vec<Vec<f64>>,
    pub row_totals: Vec<f64>,
    pub column_totals: Vec<f64>,
    pub grand_total: Option<f64>,
    pub aggregator: String,
    pub value_format: ValueFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_values: Option<Vec<MeasureSummary>>,
    pub calculations: CalculationsEcho,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}
