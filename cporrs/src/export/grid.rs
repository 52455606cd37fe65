//! Flattening of pivot results and dashboard slices into a 2-D grid.
//!
//! Both export targets consume the same structure: `header_rows` leading
//! rows (one per column-dimension level), `lead_cols` leading label cells
//! per body row, numeric cells after, and a trailing totals row.

use crate::pivot::query::{PivotResult, ValueFormat};

#[derive(Debug, Clone, PartialEq)]
pub enum GridCell {
    Empty,
    Text(String),
    Number(f64),
}

#[derive(Debug, Clone)]
pub struct Grid {
    pub name: String,
    pub header_rows: usize,
    pub lead_cols: usize,
    pub rows: Vec<Vec<GridCell>>,
    pub currency: bool,
    /// True when the last row is a totals row.
    pub totals_row: bool,
}

impl Grid {
    pub fn width(&self) -> usize {
        self.rows.iter().map(|r| r.len()).max().unwrap_or(0)
    }

    /// Flatten a pivot result. `row_labels` are the display labels of the
    /// row dimensions, aligned with `result.rows`.
    pub fn from_pivot(name: &str, result: &PivotResult, row_labels: &[String]) -> Grid {
        let currency = result.value_format == ValueFormat::Currency;

        // Summary shape: no dimensions, one value per measure.
        if result.row_headers.is_empty() && result.column_headers.is_empty() {
            let mut rows = vec![vec![
                GridCell::Text("Medida".to_string()),
                GridCell::Text("Valor".to_string()),
            ]];
            match &result.summary_values {
                Some(summaries) => {
                    for s in summaries {
                        rows.push(vec![
                            GridCell::Text(s.label.clone()),
                            s.value.map(GridCell::Number).unwrap_or(GridCell::Empty),
                        ]);
                    }
                }
                None => {
                    rows.push(vec![
                        GridCell::Text("Total".to_string()),
                        result
                            .summary_value
                            .map(GridCell::Number)
                            .unwrap_or(GridCell::Empty),
                    ]);
                }
            }
            return Grid {
                name: name.to_string(),
                header_rows: 1,
                lead_cols: 1,
                rows,
                currency,
                totals_row: false,
            };
        }

        let depth = result
            .column_headers
            .iter()
            .map(|h| h.len())
            .max()
            .unwrap_or(1)
            .max(1);
        let lead = result.rows.len().max(1);

        let mut rows: Vec<Vec<GridCell>> = Vec::new();
        for level in 0..depth {
            let mut header = Vec::with_capacity(lead + result.column_headers.len());
            for l in 0..lead {
                if level + 1 == depth {
                    header.push(
                        row_labels
                            .get(l)
                            .map(|s| GridCell::Text(s.clone()))
                            .unwrap_or(GridCell::Empty),
                    );
                } else {
                    header.push(GridCell::Empty);
                }
            }
            for tuple in &result.column_headers {
                header.push(
                    tuple
                        .get(level)
                        .map(|s| GridCell::Text(s.clone()))
                        .unwrap_or(GridCell::Empty),
                );
            }
            rows.push(header);
        }

        for (i, tuple) in result.row_headers.iter().enumerate() {
            let mut row = Vec::with_capacity(lead + result.values[i].len());
            for l in 0..lead {
                row.push(
                    tuple
                        .get(l)
                        .map(|s| GridCell::Text(s.clone()))
                        .unwrap_or(GridCell::Empty),
                );
            }
            for value in &result.values[i] {
                row.push(GridCell::Number(*value));
            }
            rows.push(row);
        }

        let mut totals = Vec::with_capacity(lead + result.column_totals.len());
        totals.push(GridCell::Text("Total".to_string()));
        for _ in 1..lead {
            totals.push(GridCell::Empty);
        }
        for total in &result.column_totals {
            totals.push(GridCell::Number(*total));
        }
        rows.push(totals);

        Grid {
            name: name.to_string(),
            header_rows: depth,
            lead_cols: lead,
            rows,
            currency,
            totals_row: true,
        }
    }

    /// Flatten an arbitrary labelled table (dashboard slices).
    pub fn from_table(name: &str, headers: &[String], body: Vec<Vec<GridCell>>, currency: bool) -> Grid {
        let mut rows = Vec::with_capacity(body.len() + 1);
        rows.push(headers.iter().map(|h| GridCell::Text(h.clone())).collect());
        rows.extend(body);
        Grid {
            name: name.to_string(),
            header_rows: 1,
            lead_cols: 1,
            rows,
            currency,
            totals_row: false,
        }
    }
}

/// Render a number the way the dashboards do: Brazilian grouping, two
/// decimal places, optional currency prefix.
pub fn format_number(value: f64, currency: bool) -> String {
    let negative = value < 0.0;
    let cents = (value.abs() * 100.0).round() as u64;
    let integral = cents / 100;
    let frac = cents % 100;

    let digits = integral.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }

    let sign = if negative { "-" } else { "" };
    if currency {
        format!("R$ {sign}{grouped},{frac:02}")
    } else {
        format!("{sign}{grouped},{frac:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pivot::query::{CalculationsEcho, PivotResult, ValueFormat};

    fn sample_result() -> PivotResult {
        PivotResult {
            rows: vec!["region".into()],
            columns: vec!["product".into()],
            row_headers: vec![vec!["N".into()], vec!["S".into()]],
            column_headers: vec![vec!["A".into()], vec!["B".into()]],
            column_keys: vec!["A".into(), "B".into()],
            values: vec![vec![10.0, 5.0], vec![3.0, 0.0]],
            row_totals: vec![15.0, 3.0],
            column_totals: vec![13.0, 5.0],
            grand_total: Some(18.0),
            aggregator: "sum".into(),
            value_format: ValueFormat::Number,
            summary_value: None,
            summary_values: None,
            calculations: CalculationsEcho::default(),
            warnings: Vec::new(),
        }
    }

    #[test]
    fn pivot_grid_shape() {
        let grid = Grid::from_pivot("vendas", &sample_result(), &["Região".to_string()]);
        assert_eq!(grid.header_rows, 1);
        assert_eq!(grid.lead_cols, 1);
        // header + 2 body rows + totals
        assert_eq!(grid.rows.len(), 4);
        assert_eq!(grid.rows[0][0], GridCell::Text("Região".into()));
        assert_eq!(grid.rows[0][1], GridCell::Text("A".into()));
        assert_eq!(grid.rows[3][0], GridCell::Text("Total".into()));
        assert_eq!(grid.rows[3][1], GridCell::Number(13.0));
    }

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(1234.5, false), "1.234,50");
        assert_eq!(format_number(1234.5, true), "R$ 1.234,50");
        assert_eq!(format_number(-7.25, true), "R$ -7,25");
        assert_eq!(format_number(0.0, false), "0,00");
        assert_eq!(format_number(1_000_000.0, false), "1.000.000,00");
    }
}
