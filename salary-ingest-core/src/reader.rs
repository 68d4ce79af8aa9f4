//! Tabular Reader: loads CSV, delimited text, JSON, Excel and Parquet files
//! into a [`Table`].
//!
//! Dispatch is by lower-cased file extension only. Delimited text is decoded
//! as UTF-8, then Windows-1251, then lossy UTF-8, keeping the first decoding
//! that parses. A block of `#` lines before the header is skipped, which is
//! what lets the pipeline's own artifacts (metadata header + CSV) be read
//! back unchanged. Data rows starting with `#` are kept.

use crate::table::{infer_column, Column, Table, TableError, Value};
use calamine::{open_workbook_auto, Data, Reader};
use chrono::{Duration, NaiveDate};
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::Field;
use serde_json::Value as JsonValue;
use std::borrow::Cow;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const SNIFF_DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
    #[error("unsupported file format '{extension}' for {path}")]
    Unsupported { path: PathBuf, extension: String },
}

impl ReadError {
    fn parse(path: &Path, reason: impl ToString) -> Self {
        ReadError::Parse {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// Text encodings tried, in order, for delimited formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Windows1251,
    LossyUtf8,
}

/// Loads `path` into a [`Table`], choosing the loader from the extension.
pub fn read_table(path: &Path) -> Result<Table, ReadError> {
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default();

    let table = match extension.as_str() {
        ".csv" => read_delimited(path, Some(b','))?,
        ".txt" | ".tsv" => read_delimited(path, None)?,
        ".json" => read_json(path)?,
        ".xlsx" | ".xls" | ".xlsm" | ".ods" => read_excel(path)?,
        ".parquet" => read_parquet(path)?,
        _ => {
            let bytes = read_bytes(path)?;
            match std::str::from_utf8(&bytes)
                .map_err(|e| ReadError::parse(path, e))
                .and_then(|text| parse_delimited(path, text, sniff_delimiter(text)))
            {
                Ok(table) => table,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Unknown extension is not readable as text");
                    return Err(ReadError::Unsupported {
                        path: path.to_path_buf(),
                        extension,
                    });
                }
            }
        }
    };

    info!(
        path = %path.display(),
        format = %extension,
        columns = ?table.column_names(),
        rows = table.num_rows(),
        "Read tabular file"
    );
    Ok(table)
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, ReadError> {
    std::fs::read(path).map_err(|source| ReadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn decode(bytes: &[u8], encoding: TextEncoding) -> Option<Cow<'_, str>> {
    match encoding {
        TextEncoding::Utf8 => std::str::from_utf8(bytes).ok().map(Cow::Borrowed),
        TextEncoding::Windows1251 => encoding_rs::WINDOWS_1251
            .decode_without_bom_handling_and_without_replacement(bytes),
        TextEncoding::LossyUtf8 => Some(String::from_utf8_lossy(bytes)),
    }
}

/// Reads delimited text with the encoding fallback chain. `delimiter: None`
/// sniffs the delimiter from the decoded text.
fn read_delimited(path: &Path, delimiter: Option<u8>) -> Result<Table, ReadError> {
    let bytes = read_bytes(path)?;
    let mut last_err = None;
    for encoding in [
        TextEncoding::Utf8,
        TextEncoding::Windows1251,
        TextEncoding::LossyUtf8,
    ] {
        let Some(text) = decode(&bytes, encoding) else {
            debug!(path = %path.display(), ?encoding, "Decoding failed, trying next encoding");
            continue;
        };
        let delimiter = delimiter.unwrap_or_else(|| sniff_delimiter(&text));
        match parse_delimited(path, &text, delimiter) {
            Ok(table) => {
                if encoding != TextEncoding::Utf8 {
                    warn!(path = %path.display(), ?encoding, "Read file with fallback encoding");
                }
                return Ok(table);
            }
            Err(e) => {
                debug!(path = %path.display(), ?encoding, error = %e, "Parse failed, trying next encoding");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| ReadError::parse(path, "no encoding could decode the file")))
}

/// Picks the candidate delimiter occurring most often on the first data
/// line. Falls back to a comma.
pub fn sniff_delimiter(text: &str) -> u8 {
    let first = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#'))
        .unwrap_or("");
    SNIFF_DELIMITERS
        .iter()
        .map(|d| (*d, first.bytes().filter(|b| b == d).count()))
        .filter(|(_, n)| *n > 0)
        .max_by_key(|(_, n)| *n)
        .map(|(d, _)| d)
        .unwrap_or(b',')
}

/// Drops the leading run of blank and `#` lines.
fn skip_comment_block(text: &str) -> &str {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        if !trimmed.is_empty() && !trimmed.starts_with('#') {
            break;
        }
        offset += line.len();
    }
    &text[offset..]
}

/// Parses already-decoded delimited text. The first record after the
/// leading comment block is the header.
pub fn parse_delimited(path: &Path, text: &str, delimiter: u8) -> Result<Table, ReadError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .has_headers(true)
        .from_reader(skip_comment_block(text).as_bytes());

    let header: Vec<String> = reader
        .headers()
        .map_err(|e| ReadError::parse(path, e))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if header.is_empty() || header.iter().all(String::is_empty) {
        return Err(ReadError::parse(path, "no header row"));
    }

    let width = header.len();
    let mut raw: Vec<Vec<Option<String>>> = vec![Vec::new(); width];
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| ReadError::parse(path, e))?;
        if record.len() > width {
            return Err(ReadError::parse(
                path,
                format!(
                    "record {} has {} fields, header has {}",
                    idx + 1,
                    record.len(),
                    width
                ),
            ));
        }
        for (col, cells) in raw.iter_mut().enumerate() {
            let cell = record.get(col).filter(|s| !s.trim().is_empty());
            cells.push(cell.map(str::to_string));
        }
    }

    let columns = header
        .into_iter()
        .zip(raw)
        .map(|(name, cells)| Column::new(name, infer_column(cells)))
        .collect();
    Table::new(columns).map_err(|e: TableError| ReadError::parse(path, e))
}

fn json_scalar(v: &JsonValue) -> Value {
    match v {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => n.as_f64().map(Value::float).unwrap_or(Value::Null),
        },
        JsonValue::String(s) => Value::Str(s.clone()),
        other => Value::Str(other.to_string()),
    }
}

/// Accepts a records array (`[{"a": 1}, ...]`), a column→array object
/// (`{"a": [1, 2]}`) or a column→{index→value} object.
fn read_json(path: &Path) -> Result<Table, ReadError> {
    let bytes = read_bytes(path)?;
    let doc: JsonValue = serde_json::from_slice(&bytes).map_err(|e| ReadError::parse(path, e))?;

    let table = match doc {
        JsonValue::Array(records) => {
            let mut header: Vec<String> = Vec::new();
            for rec in &records {
                let obj = rec
                    .as_object()
                    .ok_or_else(|| ReadError::parse(path, "array element is not an object"))?;
                for key in obj.keys() {
                    if !header.contains(key) {
                        header.push(key.clone());
                    }
                }
            }
            let rows = records
                .iter()
                .filter_map(JsonValue::as_object)
                .map(|obj| {
                    header
                        .iter()
                        .map(|h| obj.get(h).map(json_scalar).unwrap_or(Value::Null))
                        .collect()
                })
                .collect();
            Table::from_rows(header, rows)
        }
        JsonValue::Object(columns) => {
            let mut out = Vec::with_capacity(columns.len());
            for (name, values) in columns {
                let cells = match values {
                    JsonValue::Array(items) => items.iter().map(json_scalar).collect(),
                    JsonValue::Object(by_index) => {
                        let mut indexed: Vec<(u64, Value)> = by_index
                            .iter()
                            .map(|(k, v)| (k.parse::<u64>().unwrap_or(u64::MAX), json_scalar(v)))
                            .collect();
                        indexed.sort_by_key(|(k, _)| *k);
                        indexed.into_iter().map(|(_, v)| v).collect()
                    }
                    _ => {
                        return Err(ReadError::parse(
                            path,
                            format!("column '{name}' is neither an array nor an object"),
                        ))
                    }
                };
                out.push(Column::new(name, cells));
            }
            Table::new(out)
        }
        _ => return Err(ReadError::parse(path, "top-level JSON must be an array or object")),
    };
    table.map_err(|e| ReadError::parse(path, e))
}

fn excel_cell(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::Int(i) => Value::Int(*i),
        Data::Float(f) => Value::float(*f),
        Data::Bool(b) => Value::Bool(*b),
        Data::String(s) if s.trim().is_empty() => Value::Null,
        Data::String(s) => Value::Str(s.clone()),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| Value::Date(d.date()))
            .unwrap_or(Value::Null),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Value::Str(s.clone()),
        Data::Error(_) => Value::Null,
        #[allow(unreachable_patterns)]
        _ => Value::Null,
    }
}

/// Reads the first worksheet; its first row is the header. Numeric columns
/// holding only whole numbers are narrowed to integers, since spreadsheets
/// store every number as a float.
fn read_excel(path: &Path) -> Result<Table, ReadError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| ReadError::parse(path, e))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ReadError::parse(path, "workbook has no worksheets"))?
        .map_err(|e| ReadError::parse(path, e))?;

    let mut rows = range.rows();
    let header: Vec<String> = match rows.next() {
        Some(cells) => cells
            .iter()
            .enumerate()
            .map(|(i, c)| match c {
                Data::Empty => format!("Unnamed: {i}"),
                other => other.to_string().trim().to_string(),
            })
            .collect(),
        None => return Ok(Table::default()),
    };
    let body: Vec<Vec<Value>> = rows
        .map(|cells| {
            (0..header.len())
                .map(|i| cells.get(i).map(excel_cell).unwrap_or(Value::Null))
                .collect()
        })
        .collect();

    let mut table = Table::from_rows(header, body).map_err(|e| ReadError::parse(path, e))?;
    for name in table.column_names() {
        let whole = table.column(&name).is_some_and(|c| {
            c.values.iter().any(|v| matches!(v, Value::Float(_)))
                && c.values.iter().all(|v| match v {
                    Value::Null | Value::Int(_) => true,
                    Value::Float(f) => f.fract() == 0.0 && f.abs() < 9.0e15,
                    _ => false,
                })
        });
        if whole {
            table.map_column(&name, |v| match v {
                Value::Float(f) => Value::Int(*f as i64),
                other => other.clone(),
            });
        }
    }
    Ok(table)
}

fn parquet_cell(field: &Field) -> Value {
    match field {
        Field::Null => Value::Null,
        Field::Bool(b) => Value::Bool(*b),
        Field::Byte(i) => Value::Int(i64::from(*i)),
        Field::Short(i) => Value::Int(i64::from(*i)),
        Field::Int(i) => Value::Int(i64::from(*i)),
        Field::Long(i) => Value::Int(*i),
        Field::UByte(i) => Value::Int(i64::from(*i)),
        Field::UShort(i) => Value::Int(i64::from(*i)),
        Field::UInt(i) => Value::Int(i64::from(*i)),
        Field::ULong(i) => i64::try_from(*i)
            .map(Value::Int)
            .unwrap_or(Value::Float(*i as f64)),
        Field::Float(f) => Value::float(f64::from(*f)),
        Field::Double(f) => Value::float(*f),
        Field::Str(s) => Value::Str(s.clone()),
        Field::Date(days) => NaiveDate::from_ymd_opt(1970, 1, 1)
            .and_then(|epoch| epoch.checked_add_signed(Duration::days(i64::from(*days))))
            .map(Value::Date)
            .unwrap_or(Value::Null),
        other => Value::Str(other.to_string()),
    }
}

/// Reads a flat Parquet file row by row. Column order follows the schema.
fn read_parquet(path: &Path) -> Result<Table, ReadError> {
    let file = File::open(path).map_err(|source| ReadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = SerializedFileReader::new(file).map_err(|e| ReadError::parse(path, e))?;
    let header: Vec<String> = reader
        .metadata()
        .file_metadata()
        .schema_descr()
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    let mut rows = Vec::new();
    let iter = reader
        .get_row_iter(None)
        .map_err(|e| ReadError::parse(path, e))?;
    for row in iter {
        let row = row.map_err(|e| ReadError::parse(path, e))?;
        let mut cells = vec![Value::Null; header.len()];
        for (name, field) in row.get_column_iter() {
            if let Some(idx) = header.iter().position(|h| h == name) {
                cells[idx] = parquet_cell(field);
            }
        }
        rows.push(cells);
    }
    Table::from_rows(header, rows).map_err(|e| ReadError::parse(path, e))
}
