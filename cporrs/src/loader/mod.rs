//! Upload ingestion: bytes + filename in, typed table + candidate schema out.
//!
//! The filename suffix selects the decoder (`.csv/.tsv/.txt` delimited text,
//! `.json` JSON array, `.xls/.xlsx` spreadsheet). Every path funnels into a
//! raw string grid handed to [`infer::build_table`].

pub mod infer;

use std::io::Cursor;

use calamine::{Data, Reader, Xls, Xlsx};

use crate::error::{PortalError, Result};
use crate::model::{SchemaField, Table};

const DELIMITER_CANDIDATES: [u8; 4] = [b',', b';', b'\t', b'|'];

/// Decode an uploaded workbook. The filename is used only to pick a decoder.
pub fn load(bytes: &[u8], filename: &str) -> Result<(Table, Vec<SchemaField>)> {
    let suffix = filename
        .rsplit('.')
        .next()
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_default();

    tracing::debug!(filename, suffix = %suffix, size = bytes.len(), "decoding upload");

    let (header, rows) = match suffix.as_str() {
        "csv" | "tsv" | "txt" => decode_delimited(bytes)?,
        "json" => decode_json(bytes)?,
        "xlsx" => decode_sheet(Xlsx::new(Cursor::new(bytes)).map_err(malformed)?)?,
        "xls" => decode_sheet(Xls::new(Cursor::new(bytes)).map_err(malformed)?)?,
        other => {
            return Err(PortalError::UnsupportedFormat(format!(
                "extension '{other}' is not supported"
            )))
        }
    };

    if rows.is_empty() {
        return Err(PortalError::EmptyInput(
            "file contains a header but no data rows".to_string(),
        ));
    }

    infer::build_table(header, rows)
}

fn malformed<E: std::fmt::Display>(err: E) -> PortalError {
    PortalError::Malformed(err.to_string())
}

/// Count candidate separators in the first non-empty line and pick the most
/// frequent; comma wins ties by candidate order.
fn sniff_delimiter(text: &str) -> u8 {
    let line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let mut best = (b',', 0usize);
    for candidate in DELIMITER_CANDIDATES {
        let count = line.bytes().filter(|b| *b == candidate).count();
        if count > best.1 {
            best = (candidate, count);
        }
    }
    best.0
}

fn decode_delimited(bytes: &[u8]) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let text = String::from_utf8_lossy(bytes);
    let delimiter = sniff_delimiter(&text);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record.map_err(malformed)?;
        let cells: Vec<String> = record.iter().map(|c| c.to_string()).collect();
        if cells.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        records.push(cells);
    }

    let mut iter = records.into_iter();
    let header = iter
        .next()
        .ok_or_else(|| PortalError::EmptyInput("file has no content".to_string()))?;
    Ok((header, iter.collect()))
}

/// Accepts a top-level array of objects or `{"data": [...]}`. The header is
/// the union of keys across all objects in first-seen order.
fn decode_json(bytes: &[u8]) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let value: serde_json::Value = serde_json::from_slice(bytes).map_err(malformed)?;
    let items = match &value {
        serde_json::Value::Array(items) => items.as_slice(),
        serde_json::Value::Object(map) => match map.get("data") {
            Some(serde_json::Value::Array(items)) => items.as_slice(),
            _ => {
                return Err(PortalError::Malformed(
                    "expected a JSON array or an object with a 'data' array".to_string(),
                ))
            }
        },
        _ => {
            return Err(PortalError::Malformed(
                "expected a JSON array or an object with a 'data' array".to_string(),
            ))
        }
    };

    let mut header: Vec<String> = Vec::new();
    for item in items {
        if let serde_json::Value::Object(map) = item {
            for key in map.keys() {
                if !header.iter().any(|h| h == key) {
                    header.push(key.clone());
                }
            }
        } else {
            return Err(PortalError::Malformed(
                "JSON rows must be objects".to_string(),
            ));
        }
    }
    if header.is_empty() {
        return Err(PortalError::EmptyInput("JSON array is empty".to_string()));
    }

    let rows = items
        .iter()
        .map(|item| {
            let map = item.as_object().expect("checked above");
            header
                .iter()
                .map(|key| map.get(key).map(json_cell).unwrap_or_default())
                .collect()
        })
        .collect();

    Ok((header, rows))
}

fn json_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// First sheet unless a sheet named "Planilha1"/"Sheet1" exists.
fn decode_sheet<'a, R>(mut workbook: R) -> Result<(Vec<String>, Vec<Vec<String>>)>
where
    R: Reader<Cursor<&'a [u8]>>,
    R::Error: std::fmt::Display,
{
    let names = workbook.sheet_names();
    if names.is_empty() {
        return Err(PortalError::EmptyInput("workbook has no sheets".to_string()));
    }
    let preferred = names
        .iter()
        .find(|n| n.eq_ignore_ascii_case("Planilha1") || n.eq_ignore_ascii_case("Sheet1"))
        .unwrap_or(&names[0])
        .clone();

    let range = workbook.worksheet_range(&preferred).map_err(malformed)?;

    let mut grid: Vec<Vec<String>> = range
        .rows()
        .map(|row| row.iter().map(sheet_cell).collect::<Vec<String>>())
        .filter(|cells| cells.iter().any(|c| !c.trim().is_empty()))
        .collect();

    if grid.is_empty() {
        return Err(PortalError::EmptyInput(format!(
            "sheet '{preferred}' is empty"
        )));
    }
    let header = grid.remove(0);
    Ok((header, grid))
}

fn sheet_cell(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(ts) if ts.time() == chrono::NaiveTime::MIN => {
                ts.date().format("%Y-%m-%d").to_string()
            }
            Some(ts) => ts.format("%Y-%m-%dT%H:%M:%S").to_string(),
            None => dt.as_f64().to_string(),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnKind, Value};

    #[test]
    fn sniffs_semicolon_delimiter() {
        assert_eq!(sniff_delimiter("a;b;c\n1;2;3"), b';');
        assert_eq!(sniff_delimiter("a,b,c"), b',');
        assert_eq!(sniff_delimiter("a\tb\tc"), b'\t');
        assert_eq!(sniff_delimiter("a|b|c"), b'|');
    }

    #[test]
    fn loads_simple_csv() {
        let csv = b"region,product,units\nN,A,10\nN,B,5\nS,A,3\n";
        let (table, schema) = load(csv, "vendas.csv").unwrap();
        assert_eq!(table.row_count, 3);
        assert_eq!(table.columns.len(), 3);
        assert_eq!(schema[2].kind, ColumnKind::Integer);
        assert!(schema[2].is_measure);
        assert_eq!(table.value("units", 0), Some(&Value::Integer(10)));
    }

    #[test]
    fn loads_semicolon_csv_with_currency() {
        let csv = "UGR;Valor Estimado\nX;R$ 1.000,50\nY;R$ 2.000,00\n".as_bytes();
        let (table, schema) = load(csv, "dados.csv").unwrap();
        assert_eq!(schema[1].kind, ColumnKind::Real);
        assert_eq!(table.value("valor_estimado", 0), Some(&Value::Real(1000.5)));
    }

    #[test]
    fn loads_json_array() {
        let json = br#"[{"a": 1, "b": "x"}, {"a": 2, "c": true}]"#;
        let (table, _) = load(json, "upload.json").unwrap();
        let keys: Vec<_> = table.columns.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(table.value("c", 0), Some(&Value::Absent));
    }

    #[test]
    fn loads_json_data_envelope() {
        let json = br#"{"data": [{"x": 1}, {"x": 2}]}"#;
        let (table, _) = load(json, "upload.json").unwrap();
        assert_eq!(table.row_count, 2);
    }

    #[test]
    fn rejects_unknown_extension() {
        let err = load(b"x", "notes.docx").unwrap_err();
        assert!(matches!(err, PortalError::UnsupportedFormat(_)));
    }

    #[test]
    fn rejects_header_only_csv() {
        let err = load(b"a,b,c\n", "empty.csv").unwrap_err();
        assert!(matches!(err, PortalError::EmptyInput(_)));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = load(b"{not json", "upload.json").unwrap_err();
        assert!(matches!(err, PortalError::Malformed(_)));
    }

    #[test]
    fn extension_is_case_insensitive() {
        let csv = b"a,b\n1,2\n";
        assert!(load(csv, "UPPER.CSV").is_ok());
    }
}
