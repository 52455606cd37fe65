//! Pivot execution: filter, pre-calculate, group, materialize, post-calculate
//! and total, in that order, against one dataset snapshot.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::collate;
use crate::error::{PortalError, Result};
use crate::expr;
use crate::model::{Column, ColumnKind, Table, Value};
use crate::pivot::aggregate::{is_currency_measure, Aggregator};
use crate::pivot::query::{
    CalculationSpec, CalculationsEcho, MeasureSummary, PivotQuery, PivotResult, ValueFormat,
    MAX_MEASURES,
};
use crate::pivot::ExecutionBudget;
use crate::store::Dataset;

/// Sentinel shown for absent dimension values; always sorts last.
pub const EMPTY_CELL_LABEL: &str = "Células Vazias";

/// Evaluate one pre-aggregation calculated column over a table.
///
/// Placeholders resolve to column keys, falling back to the original label
/// and then to the normalized form of the name. Unknown placeholders read as
/// 0 and are reported through `warnings`; a division by zero leaves the cell
/// absent so sums skip it.
pub(crate) fn pre_calc_column(
    table: &Table,
    spec: &CalculationSpec,
    warnings: &mut Vec<String>,
) -> Result<Column> {
    let parsed = expr::parse(&spec.expression)?;

    let mut bindings: HashMap<String, Option<usize>> = HashMap::new();
    for name in parsed.placeholders() {
        if bindings.contains_key(name) {
            continue;
        }
        let idx = resolve_column(table, name);
        if idx.is_none() {
            warnings.push(format!(
                "calculation '{}': unknown placeholder '{name}'",
                spec.name
            ));
        }
        bindings.insert(name.to_string(), idx);
    }

    let mut values = Vec::with_capacity(table.row_count);
    for row in 0..table.row_count {
        let mut lookup = |name: &str| -> Option<f64> {
            bindings
                .get(name)
                .copied()
                .flatten()
                .and_then(|i| table.columns[i].values[row].as_number())
        };
        values.push(match parsed.eval(&mut lookup) {
            Some(v) => Value::Real(apply_decimals(v, spec)),
            None => Value::Absent,
        });
    }

    Ok(Column {
        label: spec.name.clone(),
        key: spec.output_key(),
        kind: ColumnKind::Real,
        values,
    })
}

fn resolve_column(table: &Table, name: &str) -> Option<usize> {
    table
        .column_index(name)
        .or_else(|| table.columns.iter().position(|c| c.label == name))
        .or_else(|| {
            let key = crate::loader::infer::normalize_key(name);
            table.column_index(&key)
        })
}

fn apply_decimals(value: f64, spec: &CalculationSpec) -> f64 {
    match spec.decimals {
        Some(d) => expr::round_half_away(value, d),
        None => value,
    }
}

fn cell_label(value: &Value) -> String {
    if value.is_absent() {
        EMPTY_CELL_LABEL.to_string()
    } else {
        value.to_string()
    }
}

fn compare_cells(a: &str, b: &str) -> Ordering {
    match (a == EMPTY_CELL_LABEL, b == EMPTY_CELL_LABEL) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => collate::compare(a, b),
    }
}

fn compare_tuples(a: &[String], b: &[String]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = compare_cells(x, y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

/// One visible (aggregated) output column: a column-dimension tuple crossed
/// with a measure when more than one measure is selected.
struct VisibleColumn {
    tuple_index: usize,
    measure_index: usize,
    key: String,
    header: Vec<String>,
}

/// Run a pivot query against a dataset snapshot.
#[tracing::instrument(
    skip(dataset, query, budget),
    fields(
        dataset = %dataset.id,
        rows = ?query.rows,
        columns = ?query.columns,
        measures = ?query.measures,
        aggregator = %query.aggregator,
    )
)]
pub fn execute(
    dataset: &Dataset,
    query: &PivotQuery,
    budget: &ExecutionBudget,
) -> Result<PivotResult> {
    let start = std::time::Instant::now();

    if query.measures.is_empty() {
        return Err(PortalError::NoMeasure);
    }
    if query.measures.len() > MAX_MEASURES {
        return Err(PortalError::Malformed(format!(
            "at most {MAX_MEASURES} measures per query, got {}",
            query.measures.len()
        )));
    }
    let aggregator = Aggregator::parse(&query.aggregator)?;

    let mut warnings: Vec<String> = Vec::new();

    // Ephemeral pre-calculations: specs whose output the store has not
    // already materialized become scratch columns for this query only.
    let needs_scratch = query
        .pre_calculations
        .iter()
        .any(|s| dataset.table.column(&s.output_key()).is_none());
    let table: Cow<'_, Table> = if needs_scratch {
        let mut scratch = dataset.table.clone();
        for spec in &query.pre_calculations {
            if scratch.column(&spec.output_key()).is_some() {
                continue;
            }
            let column = pre_calc_column(&scratch, spec, &mut warnings)?;
            scratch.columns.push(column);
        }
        Cow::Owned(scratch)
    } else {
        Cow::Borrowed(&dataset.table)
    };
    budget.checkpoint()?;

    for key in query
        .rows
        .iter()
        .chain(query.columns.iter())
        .chain(query.measures.iter())
        .chain(query.filters.keys())
    {
        if table.column(key).is_none() {
            return Err(PortalError::UnknownColumn(key.clone()));
        }
    }

    // Filter pass: one predicate per filtered column, applied in one sweep.
    let filter_sets: Vec<(&Column, HashSet<&str>)> = query
        .filters
        .iter()
        .map(|(key, allowed)| {
            let column = table.column(key).expect("validated above");
            let set: HashSet<&str> = allowed.iter().map(|s| s.as_str()).collect();
            (column, set)
        })
        .collect();

    let mut kept: Vec<usize> = Vec::with_capacity(table.row_count);
    for row in 0..table.row_count {
        let keep = filter_sets
            .iter()
            .all(|(column, allowed)| allowed.contains(column.values[row].to_string().as_str()));
        if keep {
            kept.push(row);
        }
    }
    budget.checkpoint()?;

    let primary_key = &query.measures[0];
    let primary_column = table.column(primary_key).expect("validated above");
    let currency = match aggregator {
        Aggregator::Count | Aggregator::DistinctCount => false,
        _ => is_currency_measure(primary_key) || is_currency_measure(&primary_column.label),
    };
    let value_format = if currency {
        ValueFormat::Currency
    } else {
        ValueFormat::Number
    };

    let calculations = CalculationsEcho {
        pre: query.pre_calculations.clone(),
        post: query.post_calculations.clone(),
    };

    // No dimensions selected: one summary aggregation per measure.
    if query.rows.is_empty() && query.columns.is_empty() {
        let mut summaries = Vec::with_capacity(query.measures.len());
        for key in &query.measures {
            let column = table.column(key).expect("validated above");
            summaries.push(MeasureSummary {
                measure: key.clone(),
                label: column.label.clone(),
                value: aggregator.apply(&column.values, &kept),
            });
        }
        let primary = summaries[0].value;
        if budget.soft_exceeded() {
            warnings.push("query exceeded the soft deadline".to_string());
        }
        tracing::info!(rows = kept.len(), ms = start.elapsed().as_millis(), "pivot summary done");
        return Ok(PivotResult {
            rows: query.rows.clone(),
            columns: query.columns.clone(),
            row_headers: Vec::new(),
            column_headers: Vec::new(),
            column_keys: Vec::new(),
            values: Vec::new(),
            row_totals: Vec::new(),
            column_totals: Vec::new(),
            grand_total: primary,
            aggregator: aggregator.id().to_string(),
            value_format,
            summary_value: primary,
            summary_values: (summaries.len() > 1).then_some(summaries),
            calculations,
            warnings,
        });
    }

    // Grouping pass: slice row indices by row-tuple × column-tuple.
    let row_cols: Vec<&Column> = query
        .rows
        .iter()
        .map(|k| table.column(k).expect("validated above"))
        .collect();
    let col_cols: Vec<&Column> = query
        .columns
        .iter()
        .map(|k| table.column(k).expect("validated above"))
        .collect();

    let tuple_at = |cols: &[&Column], row: usize| -> Vec<String> {
        cols.iter().map(|c| cell_label(&c.values[row])).collect()
    };

    let mut cells: HashMap<Vec<String>, HashMap<Vec<String>, Vec<usize>>> = HashMap::new();
    let mut row_slices: HashMap<Vec<String>, Vec<usize>> = HashMap::new();
    let mut col_slices: HashMap<Vec<String>, Vec<usize>> = HashMap::new();
    for &row in &kept {
        let row_tuple = tuple_at(&row_cols, row);
        let col_tuple = tuple_at(&col_cols, row);
        cells
            .entry(row_tuple.clone())
            .or_default()
            .entry(col_tuple.clone())
            .or_default()
            .push(row);
        row_slices.entry(row_tuple).or_default().push(row);
        col_slices.entry(col_tuple).or_default().push(row);
    }
    budget.checkpoint()?;

    let mut row_tuples: Vec<Vec<String>> = row_slices.keys().cloned().collect();
    row_tuples.sort_by(|a, b| compare_tuples(a, b));
    let mut col_tuples: Vec<Vec<String>> = col_slices.keys().cloned().collect();
    col_tuples.sort_by(|a, b| compare_tuples(a, b));

    let measure_cols: Vec<&Column> = query
        .measures
        .iter()
        .map(|k| table.column(k).expect("validated above"))
        .collect();
    let multi_measure = query.measures.len() > 1;

    let mut visible: Vec<VisibleColumn> = Vec::new();
    for (ti, tuple) in col_tuples.iter().enumerate() {
        if multi_measure {
            for (mi, key) in query.measures.iter().enumerate() {
                let mut header = tuple.clone();
                header.push(measure_cols[mi].label.clone());
                let column_key = if tuple.is_empty() {
                    key.clone()
                } else {
                    format!("{}::{}", tuple.join("|"), key)
                };
                visible.push(VisibleColumn {
                    tuple_index: ti,
                    measure_index: mi,
                    key: column_key,
                    header,
                });
            }
        } else {
            let header = if tuple.is_empty() {
                vec![measure_cols[0].label.clone()]
            } else {
                tuple.clone()
            };
            let column_key = if tuple.is_empty() {
                query.measures[0].clone()
            } else {
                tuple.join("|")
            };
            visible.push(VisibleColumn {
                tuple_index: ti,
                measure_index: 0,
                key: column_key,
                header,
            });
        }
    }

    // Materialization pass.
    let mut values: Vec<Vec<f64>> = Vec::with_capacity(row_tuples.len());
    for row_tuple in &row_tuples {
        budget.checkpoint()?;
        let row_cells = cells.get(row_tuple).expect("tuple from this map");
        let mut out = Vec::with_capacity(visible.len());
        for vc in &visible {
            let value = row_cells
                .get(&col_tuples[vc.tuple_index])
                .and_then(|slice| {
                    aggregator.apply(&measure_cols[vc.measure_index].values, slice)
                })
                .unwrap_or(0.0);
            out.push(value);
        }
        values.push(out);
    }

    // Totals recomputed from the underlying slices so non-additive
    // aggregators stay correct.
    let row_totals: Vec<f64> = row_tuples
        .iter()
        .map(|t| {
            aggregator
                .apply(&primary_column.values, &row_slices[t])
                .unwrap_or(0.0)
        })
        .collect();
    let mut column_totals: Vec<f64> = visible
        .iter()
        .map(|vc| {
            aggregator
                .apply(
                    &measure_cols[vc.measure_index].values,
                    &col_slices[&col_tuples[vc.tuple_index]],
                )
                .unwrap_or(0.0)
        })
        .collect();
    let grand_total = aggregator.apply(&primary_column.values, &kept);

    let mut column_headers: Vec<Vec<String>> = visible.iter().map(|vc| vc.header.clone()).collect();
    let mut column_keys: Vec<String> = visible.iter().map(|vc| vc.key.clone()).collect();

    // Post-calculation pass: evaluated per result row against the aggregated
    // cells. With column dimensions present the expression runs cell-wise,
    // appending one derived column per column tuple.
    for spec in &query.post_calculations {
        budget.checkpoint()?;
        let parsed = expr::parse(&spec.expression)?;
        let mut warned: HashSet<String> = HashSet::new();

        for (ti, tuple) in col_tuples.iter().enumerate() {
            let (key, header) = if col_tuples.len() == 1 && tuple.is_empty() {
                (spec.output_key(), vec![spec.name.clone()])
            } else {
                let mut header = tuple.clone();
                header.push(spec.name.clone());
                (format!("{}::{}", spec.output_key(), tuple.join("|")), header)
            };

            let mut derived = Vec::with_capacity(row_tuples.len());
            for (ri, _) in row_tuples.iter().enumerate() {
                let mut lookup = |name: &str| -> Option<f64> {
                    // Measure names bind to this tuple's cell for the row.
                    for (mi, mkey) in query.measures.iter().enumerate() {
                        if name == mkey.as_str() || name == measure_cols[mi].label {
                            let j = if multi_measure {
                                ti * query.measures.len() + mi
                            } else {
                                ti
                            };
                            return Some(values[ri][j]);
                        }
                    }
                    // Otherwise a visible column key or joined header label.
                    for (j, vc) in visible.iter().enumerate() {
                        if name == vc.key || name == vc.header.join(" / ") {
                            return Some(values[ri][j]);
                        }
                    }
                    if warned.insert(name.to_string()) {
                        warnings.push(format!(
                            "calculation '{}': unknown placeholder '{name}'",
                            spec.name
                        ));
                    }
                    None
                };
                let cell = parsed.eval(&mut lookup).unwrap_or(0.0);
                derived.push(apply_decimals(cell, spec));
            }

            // Totals row entry: same expression over the column totals.
            let mut totals_lookup = |name: &str| -> Option<f64> {
                for (mi, mkey) in query.measures.iter().enumerate() {
                    if name == mkey.as_str() || name == measure_cols[mi].label {
                        let j = if multi_measure {
                            ti * query.measures.len() + mi
                        } else {
                            ti
                        };
                        return Some(column_totals[j]);
                    }
                }
                for (j, vc) in visible.iter().enumerate() {
                    if name == vc.key || name == vc.header.join(" / ") {
                        return Some(column_totals[j]);
                    }
                }
                None
            };
            let total_cell = parsed.eval(&mut totals_lookup).unwrap_or(0.0);

            for (ri, value) in derived.into_iter().enumerate() {
                values[ri].push(value);
            }
            column_totals.push(apply_decimals(total_cell, spec));
            column_headers.push(header);
            column_keys.push(key);
        }
    }

    if budget.soft_exceeded() {
        warnings.push("query exceeded the soft deadline".to_string());
    }

    tracing::info!(
        rows = row_tuples.len(),
        columns = column_keys.len(),
        source_rows = kept.len(),
        ms = start.elapsed().as_millis(),
        "pivot done"
    );

    Ok(PivotResult {
        rows: query.rows.clone(),
        columns: query.columns.clone(),
        row_headers: row_tuples,
        column_headers,
        column_keys,
        values,
        row_totals,
        column_totals,
        grand_total,
        aggregator: aggregator.id().to_string(),
        value_format,
        summary_value: None,
        summary_values: None,
        calculations,
        warnings,
    })
}
