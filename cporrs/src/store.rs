//! In-memory dataset registry.
//!
//! The store is the only shared mutable state in the portal. Datasets are
//! published as `Arc` snapshots: readers clone the pointer and never observe
//! a half-applied mutation; `update_calculations` rebuilds the dataset fully
//! before swapping it in under the write lock. Identifiers combine a
//! monotonic counter with a random token and are never reused within a
//! process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::collate;
use crate::error::{PortalError, Result};
use crate::model::{SchemaField, Table};
use crate::pivot::aggregate::{self, Aggregator, AggregatorInfo};
use crate::pivot::planner::pre_calc_column;
use crate::pivot::query::CalculationSpec;

/// `{id, name}` pair used by listing endpoints and the dashboard envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub id: String,
    pub name: String,
}

/// `{key, label}` pair for post-calculation columns offered to the UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyLabel {
    pub key: String,
    pub label: String,
}

/// Pre/post calculated-column definitions attached to a dataset.
#[derive(Debug, Clone, Default)]
pub struct Calculations {
    pub pre: Vec<CalculationSpec>,
    pub post: Vec<CalculationSpec>,
}

/// An uploaded table plus its schema and derived metadata.
#[derive(Debug)]
pub struct Dataset {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub table: Table,
    pub schema: Vec<SchemaField>,
    pub calculations: Calculations,
    seq: u64,
    filter_values: RwLock<HashMap<String, Arc<Vec<String>>>>,
}

impl Dataset {
    fn new(
        id: String,
        seq: u64,
        name: String,
        created_at: DateTime<Utc>,
        table: Table,
        schema: Vec<SchemaField>,
        calculations: Calculations,
    ) -> Self {
        Self {
            id,
            name,
            created_at,
            table,
            schema,
            calculations,
            seq,
            filter_values: RwLock::new(HashMap::new()),
        }
    }

    pub fn field(&self, key: &str) -> Option<&SchemaField> {
        self.schema.iter().find(|f| f.key == key)
    }

    /// Keys of the columns usable as measures (pre-calc additions included).
    pub fn measure_keys(&self) -> Vec<String> {
        self.schema
            .iter()
            .filter(|f| f.is_measure)
            .map(|f| f.key.clone())
            .collect()
    }

    pub fn dimension_keys(&self) -> Vec<String> {
        self.schema
            .iter()
            .filter(|f| !f.is_measure)
            .map(|f| f.key.clone())
            .collect()
    }

    /// The aggregator subset applicable to this dataset: counting always
    /// works, the value aggregators need at least one measure.
    pub fn aggregations(&self) -> Vec<Aggregator> {
        if self.schema.iter().any(|f| f.is_measure) {
            Aggregator::ALL.to_vec()
        } else {
            vec![
                Aggregator::Count,
                Aggregator::DistinctCount,
                Aggregator::Min,
                Aggregator::Max,
            ]
        }
    }

    pub fn aggregator_catalog(&self) -> Vec<AggregatorInfo> {
        let measures: Vec<String> = self
            .schema
            .iter()
            .filter(|f| f.is_measure)
            .map(|f| f.label.clone())
            .collect();
        aggregate::catalog(&self.aggregations(), &measures)
    }

    /// Post-calculation columns currently defined, as `{key, label}`.
    pub fn available_post_columns(&self) -> Vec<KeyLabel> {
        self.calculations
            .post
            .iter()
            .map(|c| KeyLabel {
                key: c.output_key(),
                label: c.name.clone(),
            })
            .collect()
    }

    /// Sorted distinct stringified values of a column, memoized. Absent
    /// cells are omitted; ordering is the portal collation.
    pub fn filter_values(&self, key: &str) -> Result<Arc<Vec<String>>> {
        if let Some(cached) = self.filter_values.read().get(key) {
            return Ok(Arc::clone(cached));
        }

        let column = self
            .table
            .column(key)
            .ok_or_else(|| PortalError::UnknownColumn(key.to_string()))?;

        let mut distinct: Vec<String> = Vec::new();
        {
            let mut seen = std::collections::HashSet::new();
            for value in &column.values {
                if value.is_absent() {
                    continue;
                }
                let text = value.to_string();
                if seen.insert(text.clone()) {
                    distinct.push(text);
                }
            }
        }
        collate::sort(&mut distinct);

        let shared = Arc::new(distinct);
        self.filter_values
            .write()
            .insert(key.to_string(), Arc::clone(&shared));
        Ok(shared)
    }
}

/// Process-wide dataset registry.
#[derive(Default)]
pub struct DatasetStore {
    datasets: RwLock<HashMap<String, Arc<Dataset>>>,
    counter: AtomicU64,
}

impl DatasetStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> (String, u64) {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let token: u64 = rand::random();
        (format!("ds_{seq}_{token:016x}"), seq)
    }

    /// Register a freshly loaded table. Returns the published snapshot.
    pub fn put(&self, name: &str, table: Table, schema: Vec<SchemaField>) -> Arc<Dataset> {
        let (id, seq) = self.next_id();
        let dataset = Arc::new(Dataset::new(
            id.clone(),
            seq,
            name.to_string(),
            Utc::now(),
            table,
            schema,
            Calculations::default(),
        ));
        self.datasets.write().insert(id, Arc::clone(&dataset));
        tracing::info!(
            dataset = %dataset.id,
            name = %dataset.name,
            rows = dataset.table.row_count,
            columns = dataset.table.columns.len(),
            "dataset stored"
        );
        dataset
    }

    pub fn get(&self, id: &str) -> Result<Arc<Dataset>> {
        self.datasets
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| PortalError::UnknownDataset(id.to_string()))
    }

    pub fn list(&self) -> Vec<DatasetSummary> {
        let mut entries: Vec<Arc<Dataset>> = self.datasets.read().values().cloned().collect();
        entries.sort_by_key(|d| d.seq);
        entries
            .iter()
            .map(|d| DatasetSummary {
                id: d.id.clone(),
                name: d.name.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.datasets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.read().is_empty()
    }

    /// Idempotent: deleting an absent id is not an error.
    pub fn delete(&self, id: &str) -> bool {
        let removed = self.datasets.write().remove(id).is_some();
        if removed {
            tracing::info!(dataset = %id, "dataset deleted");
        }
        removed
    }

    /// Replace a dataset's calculated-column definitions.
    ///
    /// Pre-calculations are evaluated once here so the stored table carries
    /// the materialized measure columns; later pre-calcs may reference the
    /// columns produced by earlier ones. The replacement dataset starts with
    /// an empty filter-value cache, which is the invalidation the schema
    /// change requires.
    pub fn update_calculations(
        &self,
        id: &str,
        pre: Vec<CalculationSpec>,
        post: Vec<CalculationSpec>,
    ) -> Result<(Arc<Dataset>, Vec<String>)> {
        let mut datasets = self.datasets.write();
        let current = datasets
            .get(id)
            .cloned()
            .ok_or_else(|| PortalError::UnknownDataset(id.to_string()))?;

        // Start from the base columns; previously materialized pre-calc
        // columns are rebuilt from the new definitions.
        let mut table = Table {
            columns: current
                .table
                .columns
                .iter()
                .filter(|c| {
                    current
                        .schema
                        .iter()
                        .find(|f| f.key == c.key)
                        .map(|f| !f.calculated)
                        .unwrap_or(true)
                })
                .cloned()
                .collect(),
            row_count: current.table.row_count,
        };
        let mut schema: Vec<SchemaField> =
            current.schema.iter().filter(|f| !f.calculated).cloned().collect();

        let mut warnings = Vec::new();
        for spec in &pre {
            let column = pre_calc_column(&table, spec, &mut warnings)?;
            schema.push(SchemaField {
                key: column.key.clone(),
                label: column.label.clone(),
                kind: column.kind,
                is_measure: true,
                calculated: true,
            });
            table.columns.push(column);
        }

        // Post specs are evaluated at query time, but reject bad syntax now.
        for spec in &post {
            crate::expr::parse(&spec.expression)?;
        }

        let replacement = Arc::new(Dataset::new(
            current.id.clone(),
            current.seq,
            current.name.clone(),
            current.created_at,
            table,
            schema,
            Calculations { pre, post },
        ));
        datasets.insert(id.to_string(), Arc::clone(&replacement));
        tracing::info!(
            dataset = %id,
            pre = replacement.calculations.pre.len(),
            post = replacement.calculations.post.len(),
            "calculations updated"
        );
        Ok((replacement, warnings))
    }
}
