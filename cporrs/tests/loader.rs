//! Loader integration tests, including the Excel export round-trip.

use cpor::export::{excel, Grid, GridCell};
use cpor::pivot::{self, ExecutionBudget, PivotQuery};
use cpor::{ColumnKind, DatasetStore};

#[test]
fn tsv_and_pipe_delimiters() {
    let store = DatasetStore::new();
    let tsv = b"a\tb\n1\t2\n";
    let dataset = cpor::load_dataset(&store, tsv, "t.tsv", "t").unwrap();
    assert_eq!(dataset.table.columns.len(), 2);

    let piped = b"a|b\n1|2\n3|4\n";
    let dataset = cpor::load_dataset(&store, piped, "p.txt", "p").unwrap();
    assert_eq!(dataset.table.row_count, 2);
}

#[test]
fn schema_marks_measures_and_dimensions() {
    let store = DatasetStore::new();
    let csv = b"UGR,Contrato,Valor Executado\nX,CT-1,10.5\nY,CT-2,20.0\n";
    let dataset = cpor::load_dataset(&store, csv, "c.csv", "c").unwrap();

    assert_eq!(dataset.measure_keys(), vec!["valor_executado"]);
    assert!(dataset
        .dimension_keys()
        .iter()
        .any(|k| k == "contrato"));
    let field = dataset.field("valor_executado").unwrap();
    assert_eq!(field.kind, ColumnKind::Real);
}

#[test]
fn aggregator_catalog_follows_measures() {
    let store = DatasetStore::new();
    let csv = b"ugr,valor\nX,10\n";
    let dataset = cpor::load_dataset(&store, csv, "c.csv", "c").unwrap();
    let catalog = dataset.aggregator_catalog();
    assert_eq!(catalog.len(), 6);
    let sum = catalog.iter().find(|a| a.id == "sum").unwrap();
    assert_eq!(sum.label, "Soma");
}

#[test]
fn excel_round_trip_preserves_shape() {
    let store = DatasetStore::new();
    let csv = b"region,product,units\nN,A,10\nN,B,5\nS,A,3\n";
    let dataset = cpor::load_dataset(&store, csv, "sales.csv", "sales").unwrap();

    let query: PivotQuery = serde_json::from_value(serde_json::json!({
        "datasetId": dataset.id,
        "rows": ["region"],
        "columns": ["product"],
        "measures": ["units"],
        "aggregator": "sum",
    }))
    .unwrap();
    let result = pivot::execute(&dataset, &query, &ExecutionBudget::default()).unwrap();
    let grid = Grid::from_pivot("sales", &result, &["region".to_string()]);
    let bytes = excel::render(&grid, &ExecutionBudget::default()).unwrap();

    let reloaded = cpor::load_dataset(&store, &bytes, "sales.xlsx", "reloaded").unwrap();
    // header row + 2 body rows + totals row, minus the header consumed by
    // the loader
    assert_eq!(reloaded.table.row_count, grid.rows.len() - 1);
    let labels: Vec<&str> = reloaded
        .table
        .columns
        .iter()
        .map(|c| c.label.as_str())
        .collect();
    assert_eq!(labels, vec!["region", "A", "B"]);

    // the matrix cells survive the trip
    assert_eq!(
        reloaded.table.value("a", 0).and_then(|v| v.as_number()),
        Some(10.0)
    );
    assert_eq!(
        reloaded.table.value("b", 1).and_then(|v| v.as_number()),
        Some(0.0)
    );
}

#[test]
fn grid_from_table_is_exportable() {
    let headers = vec!["Nome".to_string(), "Valor".to_string()];
    let body = vec![
        vec![GridCell::Text("Alfa".into()), GridCell::Number(1.5)],
        vec![GridCell::Text("Beta".into()), GridCell::Number(2.5)],
    ];
    let grid = Grid::from_table("Contratos", &headers, body, true);
    let bytes = excel::render(&grid, &ExecutionBudget::default()).unwrap();
    assert!(!bytes.is_empty());

    let store = DatasetStore::new();
    let reloaded = cpor::load_dataset(&store, &bytes, "x.xlsx", "x").unwrap();
    assert_eq!(reloaded.table.row_count, 2);
}
