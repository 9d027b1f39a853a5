//! Ingest pipeline: workbook bytes → rows → qid index.
//!
//! Steps, in order:
//!
//! 1. Open the workbook and take the first sheet ([`IngestError::NoSheet`] if there is none).
//! 2. Sheet row 1 is the header (empty if the writer omitted it); it only decides the schema layout.
//! 3. Drop blank rows; every later row is data ([`IngestError::EmptySheet`] if none remain).
//! 4. Map each data row positionally and drop rows whose `qid` is blank.
//! 5. Group surviving rows by `qid` in encounter order.
//!
//! Fetching and state publication live in [`crate::fetch`] and [`crate::cache`].

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::models::{QidIndex, Row};
use crate::schema::{SchemaSetting, SchemaVersion};
use crate::workbook::Workbook;

/// Coarse classification of an ingest failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Fetch,
    Timeout,
    Parse,
}

/// Why an ingest did not produce a dataset.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestError {
    #[error("failed to fetch {url}: HTTP {status}")]
    Status { status: u16, url: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("fetch timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },
    #[error("unreadable workbook: {0}")]
    Workbook(String),
    #[error("workbook contains no sheets")]
    NoSheet,
    #[error("sheet '{sheet}' has no data rows")]
    EmptySheet { sheet: String },
    #[error("sheet '{sheet}' has no rows with a qid")]
    NoKeyedRows { sheet: String },
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Status { .. } | IngestError::Transport(_) => ErrorKind::Fetch,
            IngestError::Timeout { .. } => ErrorKind::Timeout,
            IngestError::Workbook(_)
            | IngestError::NoSheet
            | IngestError::EmptySheet { .. }
            | IngestError::NoKeyedRows { .. } => ErrorKind::Parse,
        }
    }
}

/// Output of a successful parse.
#[derive(Debug, Clone)]
pub struct Ingested {
    pub rows: Vec<Row>,
    pub index: QidIndex,
    pub schema: SchemaVersion,
    pub sheet: String,
    /// Data rows dropped for having a blank qid.
    pub skipped: usize,
}

/// Parse workbook bytes into indexed rows.
pub fn parse_dataset(bytes: &[u8], schema: SchemaSetting) -> Result<Ingested, IngestError> {
    let mut workbook = Workbook::open(bytes).map_err(|e| IngestError::Workbook(e.to_string()))?;

    let sheet = workbook
        .sheet_names()
        .first()
        .map(|s| s.to_string())
        .ok_or(IngestError::NoSheet)?;

    let physical = workbook
        .rows(0)
        .map_err(|e| IngestError::Workbook(e.to_string()))?;

    // Sheet row 1 is the header; writers omit empty rows, so it may be absent.
    let (header, data): (Vec<_>, Vec<_>) = physical.into_iter().partition(|r| r.number <= 1);
    let header = header.into_iter().next().map(|r| r.cells).unwrap_or_default();
    let version = schema.resolve(&header);

    let data: Vec<_> = data.into_iter().filter(|r| !r.is_blank()).collect();
    if data.is_empty() {
        return Err(IngestError::EmptySheet { sheet });
    }

    let total = data.len();
    let rows: Vec<Row> = data
        .iter()
        .map(|r| version.map_row(&r.cells))
        .filter(|row| !row.qid.is_empty())
        .collect();
    let skipped = total - rows.len();

    if rows.is_empty() {
        return Err(IngestError::NoKeyedRows { sheet });
    }

    let index = QidIndex::build(&rows);
    debug!(
        sheet = %sheet,
        schema = version.as_str(),
        rows = rows.len(),
        groups = index.len(),
        skipped,
        "parsed dialog sheet"
    );

    Ok(Ingested {
        rows,
        index,
        schema: version,
        sheet,
        skipped,
    })
}
