//! Minimal XLSX reader: sheet names and a row-major cell grid.
//!
//! An `.xlsx` file is a ZIP archive of SpreadsheetML parts. This reader
//! walks just enough of them with `quick-xml`:
//!
//! - `xl/workbook.xml` for sheet names and relationship ids
//! - `xl/_rels/workbook.xml.rels` to resolve each sheet to its part
//! - `xl/sharedStrings.xml` (optional) for shared string cells
//! - `xl/worksheets/sheetN.xml` for the cells themselves
//!
//! Cells are placed by their `r` reference (`C7` → column 2), so gaps in a
//! row come back as [`Cell::Empty`]. Styles are not read: date cells stored
//! as serial numbers come back as numbers.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum columns honoured per row; cells further right are dropped.
const MAX_COLUMNS: usize = 256;

#[derive(Debug, Error)]
pub enum WorkbookError {
    #[error("not a readable xlsx archive: {0}")]
    Archive(String),
    #[error("malformed xml in {part}: {message}")]
    Xml { part: String, message: String },
    #[error("missing workbook part: {0}")]
    MissingPart(String),
    #[error("workbook part {part} exceeds size limit ({limit} bytes)")]
    TooLarge { part: String, limit: u64 },
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    /// Formula error such as `#N/A`.
    Error(String),
}

impl Cell {
    /// Display form used for string columns.
    pub fn to_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Number(n) => format_number(*n),
            Cell::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Cell::Error(e) => e.clone(),
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Boolean reading used for flag columns.
    pub fn is_truthy(&self) -> bool {
        match self {
            Cell::Bool(b) => *b,
            Cell::Number(n) => *n != 0.0,
            Cell::Text(s) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "true" | "1" | "yes" | "y"
            ),
            Cell::Empty | Cell::Error(_) => false,
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// One physical sheet row.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetRow {
    /// 1-based row number from the sheet.
    pub number: u32,
    pub cells: Vec<Cell>,
}

impl SheetRow {
    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(Cell::is_blank)
    }
}

struct SheetEntry {
    name: String,
    part: String,
}

/// An opened workbook borrowing the raw bytes.
pub struct Workbook<'a> {
    archive: zip::ZipArchive<Cursor<&'a [u8]>>,
    sheets: Vec<SheetEntry>,
    shared_strings: Vec<String>,
}

impl<'a> Workbook<'a> {
    pub fn open(bytes: &'a [u8]) -> Result<Self, WorkbookError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| WorkbookError::Archive(e.to_string()))?;

        let sheets = list_sheets(&mut archive)?;
        let shared_strings = if has_entry(&archive, "xl/sharedStrings.xml") {
            let xml = read_entry(&mut archive, "xl/sharedStrings.xml")?;
            parse_shared_strings(&xml)?
        } else {
            Vec::new()
        };

        Ok(Self {
            archive,
            sheets,
            shared_strings,
        })
    }

    /// Sheet names in workbook order.
    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name.as_str()).collect()
    }

    /// Read every row of the sheet at `index`, in sheet order.
    pub fn rows(&mut self, index: usize) -> Result<Vec<SheetRow>, WorkbookError> {
        let part = self
            .sheets
            .get(index)
            .map(|s| s.part.clone())
            .ok_or_else(|| WorkbookError::MissingPart(format!("sheet #{}", index)))?;
        let xml = read_entry(&mut self.archive, &part)?;
        parse_sheet(&xml, &part, &self.shared_strings)
    }
}

fn has_entry(archive: &zip::ZipArchive<Cursor<&[u8]>>, name: &str) -> bool {
    archive.file_names().any(|n| n == name)
}

fn read_entry(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, WorkbookError> {
    let entry = archive
        .by_name(name)
        .map_err(|_| WorkbookError::MissingPart(name.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| WorkbookError::Archive(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(WorkbookError::TooLarge {
            part: name.to_string(),
            limit: MAX_XML_ENTRY_BYTES,
        });
    }
    Ok(out)
}

fn xml_err(part: &str, e: impl std::fmt::Display) -> WorkbookError {
    WorkbookError::Xml {
        part: part.to_string(),
        message: e.to_string(),
    }
}

fn attr(e: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.local_name().as_ref() == local {
            a.unescape_value().ok().map(|v| v.into_owned())
        } else {
            None
        }
    })
}

/// Resolve sheet names to worksheet parts.
///
/// Falls back to the numbered `xl/worksheets/sheetN.xml` parts when the
/// workbook part is absent, which some minimal writers produce.
fn list_sheets(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
) -> Result<Vec<SheetEntry>, WorkbookError> {
    if !has_entry(archive, "xl/workbook.xml") {
        let mut parts: Vec<String> = archive
            .file_names()
            .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
            .map(|s| s.to_string())
            .collect();
        parts.sort_by_key(|name| {
            name.trim_start_matches("xl/worksheets/sheet")
                .trim_end_matches(".xml")
                .parse::<u32>()
                .unwrap_or(u32::MAX)
        });
        return Ok(parts
            .into_iter()
            .enumerate()
            .map(|(i, part)| SheetEntry {
                name: format!("Sheet{}", i + 1),
                part,
            })
            .collect());
    }

    let rels = if has_entry(archive, "xl/_rels/workbook.xml.rels") {
        let xml = read_entry(archive, "xl/_rels/workbook.xml.rels")?;
        parse_relationships(&xml)?
    } else {
        HashMap::new()
    };

    let xml = read_entry(archive, "xl/workbook.xml")?;
    let mut reader = Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut sheets = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                let name = attr(&e, b"name").unwrap_or_default();
                let sheet_id = attr(&e, b"sheetId").unwrap_or_default();
                let part = attr(&e, b"id")
                    .and_then(|rid| rels.get(&rid).cloned())
                    .unwrap_or_else(|| format!("xl/worksheets/sheet{}.xml", sheet_id));
                sheets.push(SheetEntry { name, part });
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err("xl/workbook.xml", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

fn parse_relationships(xml: &[u8]) -> Result<HashMap<String, String>, WorkbookError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rels = HashMap::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if let (Some(id), Some(target)) = (attr(&e, b"Id"), attr(&e, b"Target")) {
                    rels.insert(id, resolve_target(&target));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err("xl/_rels/workbook.xml.rels", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(rels)
}

/// Relationship targets are relative to `xl/` unless absolute.
fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target),
    }
}

/// Shared strings, concatenating rich-text runs within each `<si>`.
fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>, WorkbookError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_si = false;
    let mut in_t = false;
    // Phonetic runs (<rPh>) carry reading hints that are not part of the value.
    let mut in_phonetic = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = true;
                    current.clear();
                }
                b"rPh" => in_phonetic = true,
                b"t" if in_si && !in_phonetic => in_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                let text = te.unescape().map_err(|e| xml_err("xl/sharedStrings.xml", e))?;
                current.push_str(&text);
            }
            Ok(Event::CData(cd)) if in_t => {
                current.push_str(&String::from_utf8_lossy(&cd.into_inner()));
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"rPh" => in_phonetic = false,
                b"si" => {
                    in_si = false;
                    strings.push(std::mem::take(&mut current));
                }
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => {
                strings.push(String::new());
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err("xl/sharedStrings.xml", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Zero-based column index from a cell reference like `AB12`.
fn column_index(reference: &str) -> Option<usize> {
    let mut col = 0usize;
    let mut seen = false;
    for ch in reference.chars() {
        if !ch.is_ascii_alphabetic() {
            break;
        }
        let digit = ch.to_ascii_uppercase() as usize - 'A' as usize + 1;
        col = col.checked_mul(26)?.checked_add(digit)?;
        seen = true;
    }
    if seen {
        Some(col - 1)
    } else {
        None
    }
}

#[derive(Default)]
struct PendingCell {
    column: usize,
    kind: String,
    value: String,
    has_value: bool,
}

impl PendingCell {
    fn resolve(self, shared_strings: &[String]) -> Cell {
        if !self.has_value {
            return Cell::Empty;
        }
        let raw = self.value;
        match self.kind.as_str() {
            "s" => raw
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|i| shared_strings.get(i))
                .map(|s| Cell::Text(s.clone()))
                .unwrap_or(Cell::Empty),
            "inlineStr" | "str" | "d" => Cell::Text(raw),
            "b" => Cell::Bool(raw.trim() == "1"),
            "e" => Cell::Error(raw),
            _ => match raw.trim().parse::<f64>() {
                Ok(n) => Cell::Number(n),
                Err(_) if raw.is_empty() => Cell::Empty,
                Err(_) => Cell::Text(raw),
            },
        }
    }
}

fn place(cells: &mut Vec<Cell>, column: usize, cell: Cell) {
    if column >= MAX_COLUMNS {
        return;
    }
    if cells.len() <= column {
        cells.resize(column + 1, Cell::Empty);
    }
    cells[column] = cell;
}

fn parse_sheet(
    xml: &[u8],
    part: &str,
    shared_strings: &[String],
) -> Result<Vec<SheetRow>, WorkbookError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rows = Vec::new();

    let mut row: Option<SheetRow> = None;
    let mut cell: Option<PendingCell> = None;
    let mut next_column = 0usize;
    let mut capture = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    let number = attr(&e, b"r")
                        .and_then(|r| r.parse().ok())
                        .unwrap_or_else(|| rows.last().map_or(1, |r: &SheetRow| r.number + 1));
                    row = Some(SheetRow {
                        number,
                        cells: Vec::new(),
                    });
                    next_column = 0;
                }
                b"c" => {
                    let column = attr(&e, b"r")
                        .and_then(|r| column_index(&r))
                        .unwrap_or(next_column);
                    cell = Some(PendingCell {
                        column,
                        kind: attr(&e, b"t").unwrap_or_default(),
                        ..PendingCell::default()
                    });
                }
                b"v" | b"t" if cell.is_some() => capture = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"row" => {
                    // Self-closing rows carry no cells.
                }
                b"c" => {
                    let column = attr(&e, b"r")
                        .and_then(|r| column_index(&r))
                        .unwrap_or(next_column);
                    next_column = column + 1;
                }
                _ => {}
            },
            Ok(Event::Text(te)) if capture => {
                let text = te.unescape().map_err(|e| xml_err(part, e))?;
                if let Some(ref mut c) = cell {
                    c.value.push_str(&text);
                    c.has_value = true;
                }
            }
            Ok(Event::CData(cd)) if capture => {
                if let Some(ref mut c) = cell {
                    c.value.push_str(&String::from_utf8_lossy(&cd.into_inner()));
                    c.has_value = true;
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => {
                    capture = false;
                    // An explicit empty <t></t> is still a present (empty) string.
                    if let Some(ref mut c) = cell {
                        if c.kind == "inlineStr" || c.kind == "str" {
                            c.has_value = true;
                        }
                    }
                }
                b"c" => {
                    if let Some(pending) = cell.take() {
                        let column = pending.column;
                        next_column = column + 1;
                        if let Some(ref mut r) = row {
                            place(&mut r.cells, column, pending.resolve(shared_strings));
                        }
                    }
                }
                b"row" => {
                    if let Some(r) = row.take() {
                        rows.push(r);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err(part, e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(rows)
}
