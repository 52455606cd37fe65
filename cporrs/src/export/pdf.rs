//! PDF rendering of a flattened grid on A4 landscape pages.

use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference};

use crate::error::{PortalError, Result};
use crate::export::grid::{format_number, Grid, GridCell};
use crate::pivot::ExecutionBudget;

const PAGE_W: f64 = 297.0;
const PAGE_H: f64 = 210.0;
const MARGIN: f64 = 12.0;
const ROW_H: f64 = 6.0;
const HEADER_SIZE: f64 = 8.5;
const BODY_SIZE: f64 = 8.0;
const MAX_CELL_CHARS: usize = 28;

struct Page {
    layer: printpdf::PdfLayerReference,
    cursor_y: f64,
}

/// Lay the grid out across as many pages as needed, repeating the header
/// rows at the top of every page.
pub fn render(grid: &Grid, budget: &ExecutionBudget) -> Result<Vec<u8>> {
    let (doc, page, layer) =
        PdfDocument::new(&grid.name, Mm(PAGE_W as f32), Mm(PAGE_H as f32), "tabela");
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(pdf_err)?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(pdf_err)?;

    let columns = grid.width().max(1);
    let col_w = (PAGE_W - 2.0 * MARGIN) / columns as f64;

    let mut current = Page {
        layer: doc.get_page(page).get_layer(layer),
        cursor_y: PAGE_H - MARGIN,
    };
    write_title(&current, &bold, &grid.name);
    current.cursor_y -= ROW_H * 1.5;

    let header_rows: Vec<&Vec<GridCell>> = grid.rows.iter().take(grid.header_rows).collect();
    for row in &header_rows {
        write_row(&current, &bold, HEADER_SIZE, col_w, row, grid.currency);
        current.cursor_y -= ROW_H;
    }

    for row in grid.rows.iter().skip(grid.header_rows) {
        budget.checkpoint()?;
        if current.cursor_y < MARGIN + ROW_H {
            current = new_page(&doc);
            for header in &header_rows {
                write_row(&current, &bold, HEADER_SIZE, col_w, header, grid.currency);
                current.cursor_y -= ROW_H;
            }
        }
        write_row(&current, &font, BODY_SIZE, col_w, row, grid.currency);
        current.cursor_y -= ROW_H;
    }

    doc.save_to_bytes().map_err(pdf_err)
}

fn new_page(doc: &PdfDocumentReference) -> Page {
    let (page, layer) = doc.add_page(Mm(PAGE_W as f32), Mm(PAGE_H as f32), "tabela");
    Page {
        layer: doc.get_page(page).get_layer(layer),
        cursor_y: PAGE_H - MARGIN,
    }
}

fn write_title(page: &Page, font: &IndirectFontRef, title: &str) {
    page.layer.use_text(
        title,
        11.0,
        Mm(MARGIN as f32),
        Mm(page.cursor_y as f32),
        font,
    );
}

fn write_row(
    page: &Page,
    font: &IndirectFontRef,
    size: f64,
    col_w: f64,
    row: &[GridCell],
    currency: bool,
) {
    for (c, cell) in row.iter().enumerate() {
        let text = match cell {
            GridCell::Empty => continue,
            GridCell::Text(t) => clip(t),
            GridCell::Number(v) => format_number(*v, currency),
        };
        let x = MARGIN + c as f64 * col_w;
        page.layer.use_text(
            text,
            size as f32,
            Mm(x as f32),
            Mm(page.cursor_y as f32),
            font,
        );
    }
}

fn clip(text: &str) -> String {
    if text.chars().count() <= MAX_CELL_CHARS {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(MAX_CELL_CHARS - 1).collect();
        out.push('…');
        out
    }
}

fn pdf_err<E: std::fmt::Display>(err: E) -> PortalError {
    PortalError::Other(anyhow::anyhow!("pdf error: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_keeps_short_text() {
        assert_eq!(clip("Total"), "Total");
        let long = "Unidade Gestora Responsável pela Execução Orçamentária";
        assert_eq!(clip(long).chars().count(), MAX_CELL_CHARS);
    }
}
