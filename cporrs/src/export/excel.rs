//! Excel rendering of a flattened grid.

use rust_xlsxwriter::{Format, Workbook};

use crate::error::{PortalError, Result};
use crate::export::grid::{Grid, GridCell};
use crate::pivot::ExecutionBudget;

fn xlsx_err(err: rust_xlsxwriter::XlsxError) -> PortalError {
    PortalError::Other(anyhow::Error::new(err))
}

/// Render one sheet with frozen header rows and number formats.
pub fn render(grid: &Grid, budget: &ExecutionBudget) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(sheet_name(&grid.name)).map_err(xlsx_err)?;

    let header_format = Format::new().set_bold();
    let num_format = if grid.currency {
        Format::new().set_num_format("R$ #,##0.00")
    } else {
        Format::new().set_num_format("#,##0.00")
    };
    let total_format = if grid.currency {
        Format::new().set_bold().set_num_format("R$ #,##0.00")
    } else {
        Format::new().set_bold().set_num_format("#,##0.00")
    };

    let last = grid.rows.len().saturating_sub(1);
    for (r, row) in grid.rows.iter().enumerate() {
        budget.checkpoint()?;
        let header = r < grid.header_rows;
        let totals = grid.totals_row && r == last && r >= grid.header_rows;
        for (c, cell) in row.iter().enumerate() {
            let (r, c) = (r as u32, c as u16);
            match cell {
                GridCell::Empty => {}
                GridCell::Text(text) => {
                    if header || totals {
                        sheet
                            .write_string_with_format(r, c, text, &header_format)
                            .map_err(xlsx_err)?;
                    } else {
                        sheet.write_string(r, c, text).map_err(xlsx_err)?;
                    }
                }
                GridCell::Number(value) => {
                    let format = if totals { &total_format } else { &num_format };
                    sheet
                        .write_number_with_format(r, c, *value, format)
                        .map_err(xlsx_err)?;
                }
            }
        }
    }

    sheet
        .set_freeze_panes(grid.header_rows as u32, grid.lead_cols as u16)
        .map_err(xlsx_err)?;

    workbook.save_to_buffer().map_err(xlsx_err)
}

/// Excel sheet names cap at 31 chars and reject a handful of characters.
fn sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '[' | ']' | '*' | '?' | ':' | '/' | '\\' => ' ',
            c => c,
        })
        .collect();
    let trimmed: String = cleaned.chars().take(31).collect();
    let trimmed = trimmed.trim().to_string();
    if trimmed.is_empty() {
        "Dados".to_string()
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sheet_names_are_sanitized() {
        assert_eq!(sheet_name("contratos 2025"), "contratos 2025");
        assert_eq!(sheet_name("a/b[c]"), "a b c");
        assert_eq!(sheet_name(""), "Dados");
        assert!(sheet_name(&"x".repeat(60)).len() <= 31);
    }
}
