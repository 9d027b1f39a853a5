//! Core data models for the dialog dataset.
//!
//! A [`Row`] is one spreadsheet record; a [`Dataset`] is an immutable
//! snapshot of everything the last ingest produced. Snapshots are replaced
//! wholesale by the cache, never edited in place.

use serde::Serialize;
use std::collections::HashMap;

use crate::ingest::{ErrorKind, IngestError};

/// One spreadsheet record, mapped positionally from a sheet row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    /// Grouping key, trimmed. Never blank in an ingested dataset.
    pub qid: String,
    pub title: String,
    pub text: String,
    pub audio1: String,
    pub audio2: String,
    /// The `type` column.
    pub kind: String,
    pub date: String,
    pub extra_mention: String,
    /// Only present in the tagged layout.
    pub question_tag: Option<String>,
    pub is_question: bool,
    pub id: String,
}

/// Rows grouped by `qid`, in encounter order.
///
/// Groups are stored as positions into the owning dataset's `rows`, so the
/// index never duplicates row data.
#[derive(Debug, Clone, Default)]
pub struct QidIndex {
    order: Vec<String>,
    positions: HashMap<String, Vec<usize>>,
}

impl QidIndex {
    pub fn build(rows: &[Row]) -> Self {
        let mut index = Self::default();
        for (pos, row) in rows.iter().enumerate() {
            match index.positions.get_mut(&row.qid) {
                Some(list) => list.push(pos),
                None => {
                    index.order.push(row.qid.clone());
                    index.positions.insert(row.qid.clone(), vec![pos]);
                }
            }
        }
        index
    }

    /// Number of distinct qids.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Qids in the order they were first seen.
    pub fn qids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn positions(&self, qid: &str) -> Option<&[usize]> {
        self.positions.get(qid).map(Vec::as_slice)
    }

    pub fn contains(&self, qid: &str) -> bool {
        self.positions.contains_key(qid)
    }
}

/// In-memory snapshot of the ingested dataset.
///
/// Invariants upheld by the cache:
/// - `rows` holds no blank `qid`.
/// - every index group is exactly the in-order sub-sequence of `rows` with that qid.
/// - `loaded` implies `error.is_none()` and `!rows.is_empty()`.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub loaded: bool,
    pub error: Option<IngestError>,
    pub rows: Vec<Row>,
    pub index: QidIndex,
    /// Epoch milliseconds of the last successful ingest.
    pub last_updated_at: Option<i64>,
    pub is_refreshing: bool,
}

impl Dataset {
    /// Fresh, unloaded state.
    pub fn empty() -> Self {
        Self::default()
    }

    /// State published while an ingest is in flight.
    pub fn refreshing() -> Self {
        Self {
            is_refreshing: true,
            ..Self::default()
        }
    }

    pub fn loaded(rows: Vec<Row>, index: QidIndex, now_ms: i64) -> Self {
        Self {
            loaded: true,
            error: None,
            rows,
            index,
            last_updated_at: Some(now_ms),
            is_refreshing: false,
        }
    }

    pub fn failed(error: IngestError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    /// Rows sharing `qid`, in original order. Empty if the qid is unknown.
    pub fn group(&self, qid: &str) -> Vec<&Row> {
        self.index
            .positions(qid)
            .map(|positions| positions.iter().map(|&p| &self.rows[p]).collect())
            .unwrap_or_default()
    }

    /// Distinct qids with their first row, in encounter order.
    pub fn groups(&self) -> Vec<GroupSummary<'_>> {
        self.index
            .qids()
            .filter_map(|qid| {
                let positions = self.index.positions(qid)?;
                let first = &self.rows[*positions.first()?];
                Some(GroupSummary {
                    qid,
                    title: &first.title,
                    kind: &first.kind,
                    date: &first.date,
                    rows: positions.len(),
                })
            })
            .collect()
    }
}

impl Dataset {
    pub fn status(&self) -> DatasetStatus {
        DatasetStatus {
            loaded: self.loaded,
            error: self.error.as_ref().map(|e| ErrorView {
                kind: e.kind(),
                message: e.to_string(),
            }),
            row_count: self.rows.len(),
            group_count: self.index.len(),
            last_updated_at: self.last_updated_at,
            is_refreshing: self.is_refreshing,
        }
    }
}

/// Serializable view of a snapshot's state, without the rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetStatus {
    pub loaded: bool,
    pub error: Option<ErrorView>,
    pub row_count: usize,
    pub group_count: usize,
    pub last_updated_at: Option<i64>,
    pub is_refreshing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorView {
    pub kind: ErrorKind,
    pub message: String,
}

/// Summary of one qid group.
#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary<'a> {
    pub qid: &'a str,
    pub title: &'a str,
    pub kind: &'a str,
    pub date: &'a str,
    pub rows: usize,
}

/// Result of one [`load`](crate::cache::DatasetCache::load) call.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// Data was already loaded and fresh; nothing was fetched.
    CacheHit,
    /// This call fetched and indexed the dataset.
    Loaded { rows: usize, groups: usize },
    /// Another caller's ingest finished while this one waited for it.
    Joined { loaded: bool },
    /// This call's ingest failed; the error is also recorded in the dataset.
    Failed(IngestError),
}

impl LoadOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            LoadOutcome::CacheHit => "cache_hit",
            LoadOutcome::Loaded { .. } => "loaded",
            LoadOutcome::Joined { .. } => "joined",
            LoadOutcome::Failed(_) => "failed",
        }
    }
}

#[cfg(test)]
pub(crate) fn row(qid: &str, id: &str) -> Row {
    Row {
        qid: qid.to_string(),
        title: format!("title {}", qid),
        text: format!("text {}", id),
        audio1: String::new(),
        audio2: String::new(),
        kind: String::new(),
        date: String::new(),
        extra_mention: String::new(),
        question_tag: None,
        is_question: false,
        id: id.to_string(),
    }
}
