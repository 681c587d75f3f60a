use crate::model::{RawRecord, RecordPosition, SourceKind};
use calamine::{open_workbook_auto, Data, Reader};
use chrono::{Duration, NaiveDate};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// UTF-8 first (BOM stripped), then Latin-1, which accepts any byte sequence.
pub(crate) fn decode_bytes(bytes: &[u8]) -> (String, &'static str) {
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    match std::str::from_utf8(body) {
        Ok(text) => (text.to_string(), "utf-8"),
        Err(_) => (body.iter().map(|b| *b as char).collect(), "latin-1"),
    }
}

fn trim_cell(raw: &str) -> String {
    raw.trim().trim_matches('\u{feff}').trim().to_string()
}

fn sniff_delimiter(path: &Path, text: &str) -> u8 {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if ext == "tsv" {
        return b'\t';
    }
    let header = text.lines().find(|l| !l.trim().is_empty()).unwrap_or_default();
    [b',', b';', b'\t', b'|']
        .into_iter()
        .max_by_key(|d| (header.matches(*d as char).count(), *d == b','))
        .filter(|d| header.contains(*d as char))
        .unwrap_or(b',')
}

fn header_labels(raw: Vec<String>) -> Vec<String> {
    raw.into_iter()
        .enumerate()
        .map(|(idx, h)| {
            if h.is_empty() {
                format!("column_{}", idx + 1)
            } else {
                h
            }
        })
        .collect()
}

fn row_to_json(headers: &[String], cells: Vec<Value>) -> String {
    let mut row = Map::new();
    for (idx, value) in cells.into_iter().enumerate() {
        let key = headers
            .get(idx)
            .cloned()
            .unwrap_or_else(|| format!("column_{}", idx + 1));
        row.entry(key).or_insert(value);
    }
    for header in headers.iter().skip(row.len()) {
        row.entry(header.clone()).or_insert(Value::Null);
    }
    Value::Object(row).to_string()
}

fn text_cell(raw: &str) -> Value {
    let cell = trim_cell(raw);
    if cell.is_empty() {
        Value::Null
    } else {
        Value::String(cell)
    }
}

fn parse_structured_csv(text: &str, delimiter: u8) -> Result<(Vec<String>, Vec<Vec<Value>>), String> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(false)
        .from_reader(text.as_bytes());

    let headers = header_labels(
        reader
            .headers()
            .map_err(|e| format!("failed to read csv header: {e}"))?
            .iter()
            .map(trim_cell)
            .collect(),
    );

    let mut rows = Vec::new();
    for rec in reader.records() {
        let rec = rec.map_err(|e| format!("failed to read csv row: {e}"))?;
        rows.push(rec.iter().map(text_cell).collect());
    }
    Ok((headers, rows))
}

fn naive_lines(text: &str, delimiter: u8) -> Vec<(usize, String)> {
    let delimiter = delimiter as char;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            let joined = line
                .split(delimiter)
                .map(|f| trim_cell(f).trim_matches('"').to_string())
                .collect::<Vec<_>>()
                .join(",");
            (idx + 1, joined)
        })
        .collect()
}

pub fn read_csv_records(path: &Path, source_name: &str) -> Result<Vec<RawRecord>, String> {
    let bytes = fs::read(path).map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    let (text, encoding) = decode_bytes(&bytes);
    let delimiter = sniff_delimiter(path, &text);
    debug!(file = source_name, encoding, delimiter = %(delimiter as char), "decoded tabular source");

    match parse_structured_csv(&text, delimiter) {
        Ok((headers, rows)) => Ok(rows
            .into_iter()
            .enumerate()
            .map(|(idx, cells)| {
                RawRecord::new(
                    row_to_json(&headers, cells),
                    source_name,
                    SourceKind::Tabular,
                    RecordPosition::Line(idx + 1),
                )
            })
            .collect()),
        Err(e) => {
            warn!(file = source_name, "structured parse failed, splitting lines instead: {e}");
            Ok(naive_lines(&text, delimiter)
                .into_iter()
                .map(|(line, joined)| {
                    RawRecord::new(joined, source_name, SourceKind::Tabular, RecordPosition::Line(line))
                })
                .collect())
        }
    }
}

fn excel_serial_to_date(serial: f64) -> Option<String> {
    if !serial.is_finite() || serial <= 0.0 {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    let date = base.checked_add_signed(Duration::days(serial.floor() as i64))?;
    Some(date.format("%Y-%m-%d").to_string())
}

fn xlsx_cell(cell: &Data) -> Value {
    match cell {
        Data::Empty | Data::Error(_) => Value::Null,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => text_cell(s),
        Data::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Data::Int(i) => Value::Number((*i).into()),
        Data::Bool(b) => Value::String(b.to_string()),
        Data::DateTime(dt) => excel_serial_to_date(dt.as_f64())
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

pub fn read_xlsx_records(path: &Path, source_name: &str) -> Result<Vec<RawRecord>, String> {
    let mut workbook =
        open_workbook_auto(path).map_err(|e| format!("failed to open workbook: {e}"))?;
    let sheet_names = workbook.sheet_names().to_owned();
    let first_sheet = sheet_names
        .first()
        .cloned()
        .ok_or_else(|| "workbook has no worksheets".to_string())?;

    let range = workbook
        .worksheet_range(&first_sheet)
        .map_err(|e| format!("failed to read worksheet {first_sheet}: {e}"))?;

    let mut rows = range.rows();
    let Some(header_row) = rows.next() else {
        return Ok(Vec::new());
    };
    let headers = header_labels(
        header_row
            .iter()
            .map(|cell| trim_cell(&cell.to_string()))
            .collect(),
    );

    let records = rows
        .map(|row| row.iter().map(xlsx_cell).collect::<Vec<_>>())
        .filter(|cells| cells.iter().any(|v| !v.is_null()))
        .enumerate()
        .map(|(idx, cells)| {
            RawRecord::new(
                row_to_json(&headers, cells),
                source_name,
                SourceKind::Tabular,
                RecordPosition::Line(idx + 1),
            )
        })
        .collect();
    Ok(records)
}

/// Reads a delimited text file or a workbook, one record per data row.
pub fn read_tabular(path: &Path, source_name: &str) -> Result<Vec<RawRecord>, String> {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "xlsx" | "xls" => read_xlsx_records(path, source_name),
        _ => read_csv_records(path, source_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn write_temp(name: &str, bytes: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("stmt_tab_{}_{name}", Uuid::new_v4()));
        fs::write(&path, bytes).expect("write temp file");
        path
    }

    #[test]
    fn rows_become_json_objects_with_line_numbers() {
        let path = write_temp(
            "rows.csv",
            b"Date,Description,Amount\n07/31/2025,Test Transaction,123.45\n08/01/2025,Coffee,\n",
        );
        let records = read_tabular(&path, "rows.csv").expect("read csv");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].line_index(), Some(1));
        assert_eq!(records[1].line_index(), Some(2));
        let row: Map<String, Value> =
            serde_json::from_str(records[0].text()).expect("json row");
        assert_eq!(row["Date"], "07/31/2025");
        assert_eq!(row["Amount"], "123.45");
        let second: Map<String, Value> =
            serde_json::from_str(records[1].text()).expect("json row");
        assert_eq!(second["Amount"], Value::Null);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn bom_and_latin1_are_decoded() {
        let (text, enc) = decode_bytes(b"\xEF\xBB\xBFDate");
        assert_eq!((text.as_str(), enc), ("Date", "utf-8"));
        let (text, enc) = decode_bytes(b"Caf\xE9");
        assert_eq!((text.as_str(), enc), ("Café", "latin-1"));
    }

    #[test]
    fn semicolon_files_are_sniffed() {
        let path = write_temp(
            "semi.csv",
            b"Date;Description;Amount\n31.07.2025;Miete;-1.200,00\n",
        );
        let records = read_tabular(&path, "semi.csv").expect("read csv");
        let row: Map<String, Value> =
            serde_json::from_str(records[0].text()).expect("json row");
        assert_eq!(row["Amount"], "-1.200,00");
        let _ = fs::remove_file(path);
    }

    #[test]
    fn ragged_rows_fall_back_to_joined_text() {
        let path = write_temp(
            "ragged.csv",
            b"Date,Description,Amount\n07/31/2025,Coffee,4.50,extra\n",
        );
        let records = read_tabular(&path, "ragged.csv").expect("read csv");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].text(), "Date,Description,Amount");
        assert_eq!(records[1].text(), "07/31/2025,Coffee,4.50,extra");
        assert_eq!(records[1].line_index(), Some(2));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn excel_serials_become_iso_dates() {
        assert_eq!(excel_serial_to_date(45869.0).as_deref(), Some("2025-07-31"));
        assert_eq!(excel_serial_to_date(-1.0), None);
    }

    #[test]
    fn missing_workbook_is_an_error() {
        let path = std::env::temp_dir().join(format!("stmt_missing_{}.xlsx", Uuid::new_v4()));
        assert!(read_tabular(&path, "missing.xlsx").is_err());
    }
}
