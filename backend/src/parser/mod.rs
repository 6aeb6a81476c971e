//! Tabular ingestion: CSV and spreadsheet uploads to [`ImportRecord`]s.
//!
//! Text files get encoding and delimiter auto-detection; workbooks
//! (xlsx, xls, ods) are recognized by their magic bytes and read from the
//! first sheet. Column names must match the canonical field names exactly;
//! other columns are ignored.

use calamine::{Data, Reader};
use std::io::Cursor;
use std::path::Path;

use crate::api::logs::log_warning;
use crate::error::{IngestError, IngestResult};
use crate::models::{Field, ImportRecord};

/// Example rows embedded in the downloadable template.
const TEMPLATE_ROWS: [[&str; 9]; 2] = [
    [
        "John",
        "Doe",
        "john@example.com",
        "SecurePass123!",
        "learner",
        "1990-01-15",
        "active",
        "Engineering",
        "course1,course2",
    ],
    [
        "Jane",
        "Smith",
        "jane@example.com",
        "SecurePass456!",
        "instructor",
        "1985-05-22",
        "active",
        "Mathematics",
        "",
    ],
];

/// Sheet name of the XLSX template.
pub const TEMPLATE_SHEET: &str = "Users Template";

/// Result of parsing with metadata
#[derive(Debug, Clone)]
pub struct ParseResult {
    /// Parsed records, in file order
    pub records: Vec<ImportRecord>,
    /// Detected encoding ("xlsx" for workbooks)
    pub encoding: String,
    /// Detected delimiter (None for workbooks)
    pub delimiter: Option<char>,
    /// Header row as found in the file
    pub headers: Vec<String>,
    /// Header cells that are not canonical fields
    pub ignored_columns: Vec<String>,
}

/// Detect the encoding of raw bytes using chardet
pub fn detect_encoding(bytes: &[u8]) -> String {
    let charset = chardet::detect(bytes).0;

    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" | "" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        _ => charset,
    }
}

/// Decode bytes to a string using the given encoding.
///
/// Unknown encodings fall back to lossy UTF-8.
pub fn decode_content(bytes: &[u8], encoding: &str) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match encoding.to_lowercase().as_str() {
        "iso-8859-1" | "latin-1" | "latin1" => encoding_rs::ISO_8859_15.decode(bytes).0.into_owned(),
        "windows-1252" | "cp1252" => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Detect the delimiter by counting occurrences in the header line
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().next().unwrap_or("");

    let mut best_sep = ',';
    let mut best_count = 0;

    for sep in [',', ';', '\t', '|'] {
        let count = first_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}

/// Whether the bytes look like a workbook (ZIP or OLE container).
pub fn is_workbook(bytes: &[u8]) -> bool {
    bytes.starts_with(b"PK\x03\x04") || bytes.starts_with(&[0xD0, 0xCF, 0x11, 0xE0])
}

/// Parse an uploaded file from memory.
pub fn parse_bytes(bytes: &[u8]) -> IngestResult<ParseResult> {
    if bytes.is_empty() {
        return Err(IngestError::EmptyFile);
    }

    if is_workbook(bytes) {
        return parse_workbook(bytes);
    }

    let encoding = detect_encoding(bytes);
    let content = decode_content(bytes, &encoding);
    if content.trim().is_empty() {
        return Err(IngestError::EmptyFile);
    }
    let delimiter = detect_delimiter(&content);
    let rows = read_delimited(&content, delimiter)?;

    build_result(rows, encoding, Some(delimiter))
}

/// Parse a file from disk.
pub fn parse_file<P: AsRef<Path>>(path: P) -> IngestResult<ParseResult> {
    let bytes = std::fs::read(path.as_ref())?;
    parse_bytes(&bytes)
}

/// Lenient entry point: malformed content yields no records.
pub fn parse_records(bytes: &[u8]) -> Vec<ImportRecord> {
    match parse_bytes(bytes) {
        Ok(result) => result.records,
        Err(e) => {
            log_warning(format!("No records parsed: {}", e));
            Vec::new()
        }
    }
}

fn read_delimited(content: &str, delimiter: char) -> IngestResult<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

fn parse_workbook(bytes: &[u8]) -> IngestResult<ParseResult> {
    let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| IngestError::Workbook(e.to_string()))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| IngestError::Workbook("workbook has no sheets".to_string()))?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| IngestError::Workbook(format!("cannot read sheet '{}': {}", sheet_name, e)))?;

    let rows = range
        .rows()
        .map(|row| row.iter().map(cell_to_string).collect())
        .collect();

    build_result(rows, "xlsx".to_string(), None)
}

/// Render a spreadsheet cell the way it would appear in a CSV export.
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 => {
            (*f as i64).to_string()
        }
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => excel_serial_to_date(dt.as_f64()),
        Data::DateTimeIso(s) => s.split('T').next().unwrap_or(s).to_string(),
        other => other.to_string(),
    }
}

/// Excel serial day number (1900 system) to `YYYY-MM-DD`.
fn excel_serial_to_date(serial: f64) -> String {
    chrono::NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|epoch| epoch.checked_add_signed(chrono::Duration::days(serial.trunc() as i64)))
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| serial.to_string())
}

fn build_result(
    rows: Vec<Vec<String>>,
    encoding: String,
    delimiter: Option<char>,
) -> IngestResult<ParseResult> {
    let mut rows = rows.into_iter();

    let headers: Vec<String> = rows
        .next()
        .ok_or(IngestError::NoHeaders)?
        .into_iter()
        .map(|h| h.trim().trim_start_matches('\u{feff}').to_string())
        .collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(IngestError::NoHeaders);
    }

    let columns: Vec<Option<Field>> = headers.iter().map(|h| Field::from_column(h)).collect();
    let ignored_columns = headers
        .iter()
        .zip(&columns)
        .filter(|(h, f)| f.is_none() && !h.is_empty())
        .map(|(h, _)| h.clone())
        .collect();

    let records = rows
        .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
        .map(|row| {
            let mut record = ImportRecord::default();
            for (field, value) in columns.iter().zip(row.iter()) {
                if let Some(field) = field {
                    record.set(*field, value.trim());
                }
            }
            record
        })
        .collect();

    Ok(ParseResult {
        records,
        encoding,
        delimiter,
        headers,
        ignored_columns,
    })
}

// =============================================================================
// Template & Batch Payload
// =============================================================================

/// CSV template: canonical header row plus two example rows.
pub fn build_template() -> IngestResult<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(Field::ALL.iter().map(Field::as_str))?;
    for row in TEMPLATE_ROWS {
        writer.write_record(row)?;
    }
    writer
        .into_inner()
        .map_err(|e| IngestError::Io(e.into_error()))
}

/// XLSX template with the same content as [`build_template`].
pub fn build_template_xlsx() -> IngestResult<Vec<u8>> {
    let mut workbook = rust_xlsxwriter::Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(TEMPLATE_SHEET).map_err(xlsx_error)?;

    for (col, field) in Field::ALL.iter().enumerate() {
        sheet.write_string(0, col as u16, field.as_str()).map_err(xlsx_error)?;
    }
    for (row, values) in TEMPLATE_ROWS.iter().enumerate() {
        for (col, value) in values.iter().enumerate() {
            sheet
                .write_string(row as u32 + 1, col as u16, *value)
                .map_err(xlsx_error)?;
        }
    }

    workbook.save_to_buffer().map_err(xlsx_error)
}

fn xlsx_error(e: rust_xlsxwriter::XlsxError) -> IngestError {
    IngestError::Workbook(e.to_string())
}

/// Serialize records into the flat CSV payload of a batch create.
///
/// All canonical columns are written; `id` is never part of the payload.
pub fn records_to_csv(records: &[&ImportRecord]) -> IngestResult<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(Field::ALL.iter().map(Field::as_str))?;
    for record in records {
        writer.write_record(Field::ALL.iter().map(|f| record.get(*f).unwrap_or("")))?;
    }
    writer
        .into_inner()
        .map_err(|e| IngestError::Io(e.into_error()))
}
