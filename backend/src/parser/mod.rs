//! Recipient file parsing with encoding and delimiter auto-detection.
//!
//! Turns uploaded bytes into a stream of raw rows, no schema knowledge:
//!
//! - [`FileEncoding`] - declared text encoding, `Auto` sniffs with chardet
//! - [`FileKind`] - delimited text or spreadsheet binary
//! - [`parse_bytes`] / [`parse_file`] - entry points producing [`ParsedFile`]
//!
//! Rows are pulled lazily through [`RowIter`]; nothing row-shaped is
//! materialized up front. The only full pass before streaming is a cheap
//! row count, so oversized files can be refused before any per-row work.
//!
//! Cells that decode to the replacement character degrade to empty
//! strings instead of poisoning the whole file. Rows whose cells are all
//! empty are dropped silently and never get a row index.
//!
//! # Example
//!
//! ```
//! use smsbatch::parser::{parse_bytes, FileEncoding, FileKind};
//!
//! let csv = "tel,info1\n09011112222,Alice\n";
//! let file = parse_bytes(csv.as_bytes(), FileEncoding::Auto, FileKind::Csv).unwrap();
//! assert_eq!(file.headers, vec!["tel", "info1"]);
//! assert_eq!(file.row_count, 1);
//! ```

use std::io::Cursor;
use std::path::Path;
use std::str::FromStr;

use calamine::{Data, DataType as _, Range, Reader as _, Xlsx};
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};

// =============================================================================
// File Encoding
// =============================================================================

/// Text encoding of an uploaded delimited file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileEncoding {
    /// Sniff with chardet, fall back to UTF-8.
    #[default]
    Auto,
    /// UTF-8, BOM tolerated.
    Utf8,
    /// Shift_JIS / CP932.
    ShiftJis,
}

impl FileEncoding {
    /// Stable label for logs and CLI output.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Utf8 => "utf-8",
            Self::ShiftJis => "shift_jis",
        }
    }
}

impl FromStr for FileEncoding {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "utf-8" | "utf8" => Ok(Self::Utf8),
            "shift_jis" | "shift-jis" | "sjis" | "cp932" | "windows-31j" => Ok(Self::ShiftJis),
            other => Err(ParseError::UnknownEncoding(other.to_string())),
        }
    }
}

/// Detect the encoding of raw bytes using chardet.
pub fn detect_encoding(bytes: &[u8]) -> &'static encoding_rs::Encoding {
    let (charset, _confidence, _language) = chardet::detect(bytes);
    encoding_rs::Encoding::for_label(chardet::charset2encoding(&charset).as_bytes())
        .unwrap_or(encoding_rs::UTF_8)
}

/// Decode bytes according to the declared encoding.
///
/// Decoding is lossy: undecodable sequences become the replacement
/// character, which later degrades the affected cell to empty. Returns
/// the decoded text and the name of the encoding actually used.
pub fn decode_bytes(bytes: &[u8], declared: FileEncoding) -> (String, String) {
    let encoding = match declared {
        FileEncoding::Utf8 => encoding_rs::UTF_8,
        FileEncoding::ShiftJis => encoding_rs::SHIFT_JIS,
        FileEncoding::Auto => detect_encoding(bytes),
    };
    let (text, used, _had_errors) = encoding.decode(bytes);
    (text.into_owned(), used.name().to_string())
}

// =============================================================================
// File Kind
// =============================================================================

/// Physical shape of an uploaded recipient file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    /// Delimited text with a header row; delimiter auto-detected.
    #[default]
    Csv,
    /// Spreadsheet binary, first worksheet, no header row.
    Xlsx,
}

impl FileKind {
    /// Infer the kind from a file name's extension; anything that is
    /// not recognisably a spreadsheet is treated as delimited text.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("xlsx") || ext.eq_ignore_ascii_case("xls") => {
                Self::Xlsx
            }
            _ => Self::Csv,
        }
    }

    /// Stable label for logs and CLI output.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Xlsx => "xlsx",
        }
    }
}

impl FromStr for FileKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" | "tsv" | "text" => Ok(Self::Csv),
            "xlsx" | "xls" | "excel" => Ok(Self::Xlsx),
            other => Err(ParseError::UnknownFileKind(other.to_string())),
        }
    }
}

// =============================================================================
// Delimiter Detection
// =============================================================================

/// Detect the delimiter by counting occurrences in the first line.
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().next().unwrap_or("");

    let separators = [',', ';', '\t', '|'];
    let mut best_sep = ',';
    let mut best_count = 0;

    for &sep in &separators {
        let count = first_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}

// =============================================================================
// Parsed File
// =============================================================================

/// One raw data row: trimmed cell strings plus a 0-based data-row index.
///
/// Indices are assigned to yielded rows only; dropped all-empty rows do
/// not consume one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// 0-based index among the file's data rows.
    pub index: usize,
    /// Cell values in file column order.
    pub cells: Vec<String>,
}

/// A decoded file, ready to stream rows.
#[derive(Debug)]
pub struct ParsedFile {
    /// Physical shape of the file.
    pub kind: FileKind,
    /// Name of the encoding actually used to decode.
    pub encoding: String,
    /// Detected delimiter, for delimited text only.
    pub delimiter: Option<char>,
    /// Header cells for delimited text; generated column letters
    /// (`A`, `B`, .., `AA`, ..) for spreadsheets.
    pub headers: Vec<String>,
    /// Data rows counted up front, all-empty rows excluded.
    pub row_count: usize,
    rows: RowIter,
}

impl ParsedFile {
    /// Consume the file, yielding its row stream.
    pub fn into_rows(self) -> RowIter {
        self.rows
    }
}

/// Lazy row stream over a decoded file.
pub enum RowIter {
    Csv {
        records: csv::StringRecordsIntoIter<Cursor<Vec<u8>>>,
        index: usize,
    },
    Xlsx {
        range: Range<Data>,
        row: usize,
        index: usize,
    },
}

impl std::fmt::Debug for RowIter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowIter::Csv { index, .. } => {
                f.debug_struct("Csv").field("index", index).finish_non_exhaustive()
            }
            RowIter::Xlsx { row, index, .. } => f
                .debug_struct("Xlsx")
                .field("row", row)
                .field("index", index)
                .finish_non_exhaustive(),
        }
    }
}

impl Iterator for RowIter {
    type Item = ParseResult<RawRow>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            RowIter::Csv { records, index } => {
                for result in records.by_ref() {
                    match result {
                        Ok(record) => {
                            let cells: Vec<String> = record.iter().map(clean_cell).collect();
                            if cells.iter().all(String::is_empty) {
                                continue;
                            }
                            let raw = RawRow { index: *index, cells };
                            *index += 1;
                            return Some(Ok(raw));
                        }
                        Err(err) => return Some(Err(csv_error(err))),
                    }
                }
                None
            }
            RowIter::Xlsx { range, row, index } => {
                while *row < range.height() {
                    let cells = xlsx_row_cells(range, *row);
                    *row += 1;
                    if cells.iter().all(String::is_empty) {
                        continue;
                    }
                    let raw = RawRow { index: *index, cells };
                    *index += 1;
                    return Some(Ok(raw));
                }
                None
            }
        }
    }
}

// =============================================================================
// Entry Points
// =============================================================================

/// Parse uploaded bytes into a [`ParsedFile`].
pub fn parse_bytes(bytes: &[u8], encoding: FileEncoding, kind: FileKind) -> ParseResult<ParsedFile> {
    match kind {
        FileKind::Csv => parse_csv_bytes(bytes, encoding),
        FileKind::Xlsx => parse_xlsx_bytes(bytes),
    }
}

/// Parse a file from disk, inferring the kind from the extension when
/// not given.
pub fn parse_file(
    path: &Path,
    encoding: FileEncoding,
    kind: Option<FileKind>,
) -> ParseResult<ParsedFile> {
    let bytes = std::fs::read(path)?;
    let kind = kind.unwrap_or_else(|| FileKind::from_path(path));
    parse_bytes(&bytes, encoding, kind)
}

// =============================================================================
// Delimited Text
// =============================================================================

fn parse_csv_bytes(bytes: &[u8], encoding: FileEncoding) -> ParseResult<ParsedFile> {
    let (content, encoding_name) = decode_bytes(bytes, encoding);
    if content.trim().is_empty() {
        return Err(ParseError::EmptyFile);
    }

    let delimiter = detect_delimiter(&content);

    // First pass: headers plus a cheap row count over byte records.
    let mut counter = csv_reader(Cursor::new(content.as_bytes()), delimiter);
    let headers: Vec<String> = counter
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(clean_cell)
        .collect();
    let mut row_count = 0;
    let mut record = csv::ByteRecord::new();
    while counter.read_byte_record(&mut record).map_err(csv_error)? {
        if !record.iter().all(<[u8]>::is_empty) {
            row_count += 1;
        }
    }

    // Second pass: the lazy stream the batch runner will consume.
    let records = csv_reader(Cursor::new(content.into_bytes()), delimiter).into_records();

    Ok(ParsedFile {
        kind: FileKind::Csv,
        encoding: encoding_name,
        delimiter: Some(delimiter),
        headers,
        row_count,
        rows: RowIter::Csv { records, index: 0 },
    })
}

fn csv_reader<B: AsRef<[u8]>>(cursor: Cursor<B>, delimiter: char) -> csv::Reader<Cursor<B>> {
    csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(cursor)
}

fn csv_error(err: csv::Error) -> ParseError {
    let line = err.position().map(|p| p.line() as usize).unwrap_or(0);
    ParseError::Malformed { line, message: err.to_string() }
}

/// Trim a cell; cells carrying the replacement character decode-failed
/// and degrade to empty.
fn clean_cell(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.contains('\u{FFFD}') {
        String::new()
    } else {
        trimmed.to_string()
    }
}

// =============================================================================
// Spreadsheet Binary
// =============================================================================

fn parse_xlsx_bytes(bytes: &[u8]) -> ParseResult<ParsedFile> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes.to_vec()))
        .map_err(|e| ParseError::Spreadsheet(format!("Failed to open workbook: {}", e)))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ParseError::Spreadsheet("No worksheet found".to_string()))?
        .map_err(|e| ParseError::Spreadsheet(format!("Failed to read worksheet: {}", e)))?;

    let row_count = (0..range.height())
        .filter(|&row| !xlsx_row_cells(&range, row).iter().all(String::is_empty))
        .count();
    if row_count == 0 {
        return Err(ParseError::EmptyFile);
    }

    let headers = (0..range.width()).map(column_letter).collect();

    Ok(ParsedFile {
        kind: FileKind::Xlsx,
        encoding: "UTF-8".to_string(),
        delimiter: None,
        headers,
        row_count,
        rows: RowIter::Xlsx { range, row: 0, index: 0 },
    })
}

fn xlsx_row_cells(range: &Range<Data>, row: usize) -> Vec<String> {
    (0..range.width())
        .map(|col| {
            range
                .get((row, col))
                .map(cell_to_string)
                .unwrap_or_default()
        })
        .collect()
}

fn cell_to_string(cell: &Data) -> String {
    let raw = cell
        .as_string()
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("{}", cell));
    clean_cell(&raw)
}

/// Spreadsheet column letter for a 0-based column index:
/// `0 -> A`, `25 -> Z`, `26 -> AA`, `77 -> BZ`.
pub fn column_letter(index: usize) -> String {
    let mut letters = String::new();
    let mut i = index as i64;
    while i >= 0 {
        letters.insert(0, char::from(b'A' + (i % 26) as u8));
        i = i / 26 - 1;
    }
    letters
}

// =============================================================================
// Tests
// =============================================================================
