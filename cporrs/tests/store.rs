//! Integration tests for the dataset store: identifier uniqueness,
//! copy-on-write snapshot behavior and cache discipline.

use std::collections::HashSet;
use std::sync::Arc;

use cpor::pivot::query::{CalcStage, CalculationSpec};
use cpor::store::Dataset;
use cpor::{DatasetStore, PortalError};

const CSV: &[u8] = b"ugr,valor\nX,10\nY,20\nX,30\n";

fn put_sample(store: &DatasetStore) -> Arc<Dataset> {
    cpor::load_dataset(store, CSV, "dados.csv", "dados").unwrap()
}

fn pre_spec(name: &str, expression: &str, field: &str) -> CalculationSpec {
    serde_json::from_value(serde_json::json!({
        "id": name,
        "name": name,
        "stage": "pre",
        "expression": expression,
        "resultField": field,
    }))
    .unwrap()
}

#[test]
fn identifiers_are_unique() {
    let store = DatasetStore::new();
    let mut seen = HashSet::new();
    for _ in 0..500 {
        let dataset = put_sample(&store);
        assert!(seen.insert(dataset.id.clone()), "duplicate id {}", dataset.id);
    }
    assert_eq!(store.len(), 500);
}

#[test]
fn delete_is_idempotent() {
    let store = DatasetStore::new();
    let dataset = put_sample(&store);
    assert!(store.delete(&dataset.id));
    assert!(!store.delete(&dataset.id));
    assert!(matches!(
        store.get(&dataset.id),
        Err(PortalError::UnknownDataset(_))
    ));
}

#[test]
fn update_calculations_materializes_pre_columns() {
    let store = DatasetStore::new();
    let dataset = put_sample(&store);

    let (updated, warnings) = store
        .update_calculations(
            &dataset.id,
            vec![pre_spec("dobro", "{valor} * 2", "valor_dobro")],
            Vec::new(),
        )
        .unwrap();

    assert!(warnings.is_empty());
    let column = updated.table.column("valor_dobro").unwrap();
    let doubled: Vec<f64> = column.values.iter().filter_map(|v| v.as_number()).collect();
    assert_eq!(doubled, vec![20.0, 40.0, 60.0]);
    let field = updated.field("valor_dobro").unwrap();
    assert!(field.is_measure);
    assert!(field.calculated);
}

#[test]
fn snapshots_are_copy_on_write() {
    let store = DatasetStore::new();
    let dataset = put_sample(&store);
    let before = store.get(&dataset.id).unwrap();

    store
        .update_calculations(
            &dataset.id,
            vec![pre_spec("dobro", "{valor} * 2", "valor_dobro")],
            Vec::new(),
        )
        .unwrap();

    // The old snapshot is untouched; a new get sees the new schema.
    assert!(before.table.column("valor_dobro").is_none());
    assert!(before.field("valor_dobro").is_none());
    let after = store.get(&dataset.id).unwrap();
    assert!(after.table.column("valor_dobro").is_some());
}

#[test]
fn schema_and_table_always_agree_under_concurrent_updates() {
    let store = Arc::new(DatasetStore::new());
    let dataset = put_sample(&store);
    let id = dataset.id.clone();

    let writer = {
        let store = Arc::clone(&store);
        let id = id.clone();
        std::thread::spawn(move || {
            for i in 0..50 {
                let spec = pre_spec("calc", &format!("{{valor}} + {i}"), "valor_calc");
                store.update_calculations(&id, vec![spec], Vec::new()).unwrap();
            }
        })
    };

    for _ in 0..200 {
        let snapshot = store.get(&id).unwrap();
        let in_schema = snapshot.field("valor_calc").is_some();
        let in_table = snapshot.table.column("valor_calc").is_some();
        assert_eq!(in_schema, in_table, "snapshot mixes schemas");
    }
    writer.join().unwrap();
}

#[test]
fn replacing_calculations_rebuilds_from_base_columns() {
    let store = DatasetStore::new();
    let dataset = put_sample(&store);

    store
        .update_calculations(
            &dataset.id,
            vec![pre_spec("a", "{valor} * 2", "calc_a")],
            Vec::new(),
        )
        .unwrap();
    let (second, _) = store
        .update_calculations(
            &dataset.id,
            vec![pre_spec("b", "{valor} * 3", "calc_b")],
            Vec::new(),
        )
        .unwrap();

    assert!(second.table.column("calc_a").is_none());
    assert!(second.table.column("calc_b").is_some());
}

#[test]
fn filter_values_are_sorted_cached_and_stable() {
    let store = DatasetStore::new();
    let dataset = put_sample(&store);

    let first = dataset.filter_values("ugr").unwrap();
    assert_eq!(*first, vec!["X".to_string(), "Y".to_string()]);
    let second = dataset.filter_values("ugr").unwrap();
    assert_eq!(first, second);
    // memoized: same allocation comes back
    assert!(Arc::ptr_eq(&first, &second));

    assert!(matches!(
        dataset.filter_values("nope"),
        Err(PortalError::UnknownColumn(_))
    ));
}

#[test]
fn rejects_bad_post_expression_on_update() {
    let store = DatasetStore::new();
    let dataset = put_sample(&store);
    let bad = serde_json::from_value::<CalculationSpec>(serde_json::json!({
        "id": "p1",
        "name": "quebrado",
        "stage": "post",
        "expression": "{valor} *",
    }))
    .unwrap();
    assert_eq!(bad.stage, CalcStage::Post);
    let err = store
        .update_calculations(&dataset.id, Vec::new(), vec![bad])
        .unwrap_err();
    assert!(matches!(err, PortalError::InvalidExpression(_)));
}
