//! Integration tests for the pivot engine.
//!
//! These exercise the public API: loader, DatasetStore, pivot::execute.

use std::sync::Arc;

use cpor::pivot::{self, ExecutionBudget, PivotQuery};
use cpor::store::Dataset;
use cpor::{DatasetStore, PortalError};

mod fixtures {
    use super::*;

    pub const SALES_CSV: &[u8] = b"region,product,units\nN,A,10\nN,B,5\nS,A,3\n";

    pub fn sales_dataset(store: &DatasetStore) -> Arc<Dataset> {
        cpor::load_dataset(store, SALES_CSV, "sales.csv", "sales").unwrap()
    }

    pub fn query(dataset: &Dataset, body: serde_json::Value) -> PivotQuery {
        let mut body = body;
        body["datasetId"] = serde_json::json!(dataset.id);
        serde_json::from_value(body).unwrap()
    }

    pub fn run(dataset: &Dataset, body: serde_json::Value) -> cpor::PivotResult {
        pivot::execute(dataset, &query(dataset, body), &ExecutionBudget::default()).unwrap()
    }
}

use fixtures::{query, run, sales_dataset};

#[test]
fn basic_pivot_matrix() {
    let store = DatasetStore::new();
    let dataset = sales_dataset(&store);
    let result = run(
        &dataset,
        serde_json::json!({
            "rows": ["region"],
            "columns": ["product"],
            "measures": ["units"],
            "aggregator": "sum",
        }),
    );

    assert_eq!(result.column_headers, vec![vec!["A"], vec!["B"]]);
    assert_eq!(result.row_headers, vec![vec!["N"], vec!["S"]]);
    assert_eq!(result.values, vec![vec![10.0, 5.0], vec![3.0, 0.0]]);
    assert_eq!(result.row_totals, vec![15.0, 3.0]);
    assert_eq!(result.column_totals, vec![13.0, 5.0]);
    assert_eq!(result.grand_total, Some(18.0));
    assert!(result.warnings.is_empty());
}

#[test]
fn post_calculation_share_of_itself() {
    let store = DatasetStore::new();
    let dataset = sales_dataset(&store);
    let result = run(
        &dataset,
        serde_json::json!({
            "rows": ["region"],
            "columns": ["product"],
            "measures": ["units"],
            "aggregator": "sum",
            "postCalculations": [{
                "id": "c1",
                "name": "share",
                "stage": "post",
                "expression": "{units}/{units} * 100",
            }],
        }),
    );

    // Two measure columns plus two appended share columns (one per product).
    assert_eq!(result.column_keys.len(), 4);
    for row in &result.values {
        assert_eq!(row.len(), 4);
        for (j, cell) in row.iter().enumerate().take(2) {
            let share = row[j + 2];
            if *cell != 0.0 {
                assert_eq!(share, 100.0);
            } else {
                assert_eq!(share, 0.0);
            }
        }
    }
    assert!(result.warnings.is_empty());
}

#[test]
fn filter_keeps_allowed_rows() {
    let store = DatasetStore::new();
    let dataset = sales_dataset(&store);
    let result = run(
        &dataset,
        serde_json::json!({
            "rows": ["region"],
            "columns": ["product"],
            "measures": ["units"],
            "aggregator": "sum",
            "filters": { "region": ["N"] },
        }),
    );

    assert_eq!(result.values, vec![vec![10.0, 5.0]]);
    assert_eq!(result.row_totals, vec![15.0]);
    assert_eq!(result.grand_total, Some(15.0));
}

#[test]
fn avg_aggregator_recomputes_totals_from_source_rows() {
    let store = DatasetStore::new();
    let dataset = sales_dataset(&store);
    let result = run(
        &dataset,
        serde_json::json!({
            "rows": ["region"],
            "columns": [],
            "measures": ["units"],
            "aggregator": "avg",
        }),
    );

    assert_eq!(result.row_totals, vec![7.5, 3.0]);
    assert_eq!(result.grand_total, Some(6.0));
}

#[test]
fn additive_totals_are_consistent() {
    let store = DatasetStore::new();
    let dataset = sales_dataset(&store);
    let result = run(
        &dataset,
        serde_json::json!({
            "rows": ["region"],
            "columns": ["product"],
            "measures": ["units"],
            "aggregator": "sum",
        }),
    );

    let grand = result.grand_total.unwrap();
    let row_sum: f64 = result.row_totals.iter().sum();
    let col_sum: f64 = result.column_totals.iter().sum();
    assert!((grand - row_sum).abs() < 1e-6 * grand.abs().max(1.0));
    assert!((grand - col_sum).abs() < 1e-6 * grand.abs().max(1.0));
}

#[test]
fn summary_without_dimensions_matches_column_sum() {
    let store = DatasetStore::new();
    let dataset = sales_dataset(&store);
    let result = run(
        &dataset,
        serde_json::json!({
            "measures": ["units"],
            "aggregator": "sum",
        }),
    );

    assert_eq!(result.grand_total, Some(18.0));
    assert_eq!(result.summary_value, Some(18.0));
    assert!(result.values.is_empty());
}

#[test]
fn identity_pre_calculation_copies_the_column() {
    let store = DatasetStore::new();
    let dataset = sales_dataset(&store);
    let result = run(
        &dataset,
        serde_json::json!({
            "rows": ["region"],
            "columns": ["product"],
            "measures": ["units_copy"],
            "aggregator": "sum",
            "preCalculations": [{
                "id": "c1",
                "name": "units copy",
                "stage": "pre",
                "expression": "{units}",
                "resultField": "units_copy",
            }],
        }),
    );

    assert_eq!(result.values, vec![vec![10.0, 5.0], vec![3.0, 0.0]]);
    assert_eq!(result.grand_total, Some(18.0));
}

#[test]
fn empty_allow_set_yields_no_rows() {
    let store = DatasetStore::new();
    let dataset = sales_dataset(&store);

    let sum = run(
        &dataset,
        serde_json::json!({
            "measures": ["units"],
            "aggregator": "sum",
            "filters": { "region": [] },
        }),
    );
    assert_eq!(sum.grand_total, Some(0.0));

    let avg = run(
        &dataset,
        serde_json::json!({
            "measures": ["units"],
            "aggregator": "avg",
            "filters": { "region": [] },
        }),
    );
    assert_eq!(avg.grand_total, None);
}

#[test]
fn too_many_measures_is_rejected() {
    let store = DatasetStore::new();
    let dataset = sales_dataset(&store);
    let q = query(
        &dataset,
        serde_json::json!({
            "measures": ["units", "units", "units", "units", "units", "units", "units"],
            "aggregator": "sum",
        }),
    );
    let err = pivot::execute(&dataset, &q, &ExecutionBudget::default()).unwrap_err();
    assert!(matches!(err, PortalError::Malformed(_)));
}

#[test]
fn error_taxonomy() {
    let store = DatasetStore::new();
    let dataset = sales_dataset(&store);
    let budget = ExecutionBudget::default();

    let no_measure = query(&dataset, serde_json::json!({ "aggregator": "sum" }));
    assert!(matches!(
        pivot::execute(&dataset, &no_measure, &budget),
        Err(PortalError::NoMeasure)
    ));

    let bad_agg = query(
        &dataset,
        serde_json::json!({ "measures": ["units"], "aggregator": "median" }),
    );
    assert!(matches!(
        pivot::execute(&dataset, &bad_agg, &budget),
        Err(PortalError::UnknownAggregator(_))
    ));

    let bad_column = query(
        &dataset,
        serde_json::json!({ "measures": ["unknown"], "aggregator": "sum" }),
    );
    assert!(matches!(
        pivot::execute(&dataset, &bad_column, &budget),
        Err(PortalError::UnknownColumn(_))
    ));

    let bad_expr = query(
        &dataset,
        serde_json::json!({
            "measures": ["units"],
            "aggregator": "sum",
            "postCalculations": [{
                "id": "c1",
                "name": "broken",
                "stage": "post",
                "expression": "{units} +",
            }],
        }),
    );
    assert!(matches!(
        pivot::execute(&dataset, &bad_expr, &budget),
        Err(PortalError::InvalidExpression(_))
    ));
}

#[test]
fn unknown_placeholder_degrades_to_zero_with_warning() {
    let store = DatasetStore::new();
    let dataset = sales_dataset(&store);
    let result = run(
        &dataset,
        serde_json::json!({
            "rows": ["region"],
            "columns": [],
            "measures": ["units"],
            "aggregator": "sum",
            "postCalculations": [{
                "id": "c1",
                "name": "broken ref",
                "stage": "post",
                "expression": "{nope} + 1",
            }],
        }),
    );
    // appended column evaluates to 0 + 1
    for row in &result.values {
        assert_eq!(row[1], 1.0);
    }
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].contains("nope"));
}

#[test]
fn multiple_measures_cross_product_headers() {
    let csv = b"region,units,peso\nN,10,1\nS,3,2\n";
    let store = DatasetStore::new();
    let dataset = cpor::load_dataset(&store, csv, "m.csv", "m").unwrap();
    let result = run(
        &dataset,
        serde_json::json!({
            "rows": ["region"],
            "columns": [],
            "measures": ["units", "peso"],
            "aggregator": "sum",
        }),
    );
    assert_eq!(result.column_keys.len(), 2);
    assert_eq!(result.values, vec![vec![10.0, 1.0], vec![3.0, 2.0]]);
}

#[test]
fn absent_dimension_values_sort_last() {
    let csv = b"region,units\nN,1\n,2\nS,3\n";
    let store = DatasetStore::new();
    let dataset = cpor::load_dataset(&store, csv, "a.csv", "a").unwrap();
    let result = run(
        &dataset,
        serde_json::json!({
            "rows": ["region"],
            "columns": [],
            "measures": ["units"],
            "aggregator": "sum",
        }),
    );
    assert_eq!(
        result.row_headers,
        vec![
            vec!["N".to_string()],
            vec!["S".to_string()],
            vec!["Células Vazias".to_string()]
        ]
    );
}
