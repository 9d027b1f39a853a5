//! Positional column layouts for the dialog sheet.
//!
//! Column order is the contract; header names are only consulted to pick a
//! layout when the configuration asks for `auto`. Both layouts share the
//! prefix `qid, title, text, audio1, audio2, type, date, extraMention`:
//!
//! | Position | `legacy` | `tagged` |
//! |----------|----------|----------|
//! | 8 | `isQuestion` | `questionTag` |
//! | 9 | `id` | `id` |
//! | 10 | — | `isQuestion` |

use crate::models::Row;
use crate::workbook::Cell;

const QID: usize = 0;
const TITLE: usize = 1;
const TEXT: usize = 2;
const AUDIO1: usize = 3;
const AUDIO2: usize = 4;
const KIND: usize = 5;
const DATE: usize = 6;
const EXTRA_MENTION: usize = 7;
const SLOT_8: usize = 8;
const ID: usize = 9;
const TAGGED_IS_QUESTION: usize = 10;

/// Number of columns in the legacy layout.
const LEGACY_WIDTH: usize = 10;

/// A concrete column layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaVersion {
    Legacy,
    Tagged,
}

impl SchemaVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            SchemaVersion::Legacy => "legacy",
            SchemaVersion::Tagged => "tagged",
        }
    }

    /// Map one physical row to a [`Row`]. Missing cells read as empty.
    pub fn map_row(self, cells: &[Cell]) -> Row {
        let text = |i: usize| cells.get(i).map(Cell::to_text).unwrap_or_default();
        let flag = |i: usize| cells.get(i).map(Cell::is_truthy).unwrap_or(false);

        let (question_tag, is_question) = match self {
            SchemaVersion::Legacy => (None, flag(SLOT_8)),
            SchemaVersion::Tagged => {
                let tag = text(SLOT_8);
                let tag = if tag.trim().is_empty() { None } else { Some(tag) };
                (tag, flag(TAGGED_IS_QUESTION))
            }
        };

        Row {
            qid: text(QID).trim().to_string(),
            title: text(TITLE),
            text: text(TEXT),
            audio1: text(AUDIO1),
            audio2: text(AUDIO2),
            kind: text(KIND),
            date: text(DATE),
            extra_mention: text(EXTRA_MENTION),
            question_tag,
            is_question,
            id: text(ID),
        }
    }
}

/// Configured layout choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaSetting {
    /// Resolve from the header row.
    Auto,
    Legacy,
    Tagged,
}

impl SchemaSetting {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(SchemaSetting::Auto),
            "legacy" => Some(SchemaSetting::Legacy),
            "tagged" => Some(SchemaSetting::Tagged),
            _ => None,
        }
    }

    /// Pick the layout for a sheet given its header row.
    pub fn resolve(self, header: &[Cell]) -> SchemaVersion {
        match self {
            SchemaSetting::Legacy => SchemaVersion::Legacy,
            SchemaSetting::Tagged => SchemaVersion::Tagged,
            SchemaSetting::Auto => detect(header),
        }
    }
}

fn detect(header: &[Cell]) -> SchemaVersion {
    let slot_8 = header
        .get(SLOT_8)
        .map(|c| normalize_header(&c.to_text()))
        .unwrap_or_default();
    if slot_8 == "questiontag" {
        return SchemaVersion::Tagged;
    }

    let named = header.iter().filter(|c| !c.is_blank()).count();
    if named > LEGACY_WIDTH {
        SchemaVersion::Tagged
    } else {
        SchemaVersion::Legacy
    }
}

fn normalize_header(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(values: &[&str]) -> Vec<Cell> {
        values
            .iter()
            .map(|v| {
                if v.is_empty() {
                    Cell::Empty
                } else {
                    Cell::Text(v.to_string())
                }
            })
            .collect()
    }

    const LEGACY_HEADER: &[&str] = &[
        "qid", "title", "text", "audio1", "audio2", "type", "date", "extraMention", "isQuestion",
        "id",
    ];
    const TAGGED_HEADER: &[&str] = &[
        "qid",
        "title",
        "text",
        "audio1",
        "audio2",
        "type",
        "date",
        "extraMention",
        "questionTag",
        "id",
        "isQuestion",
    ];

    #[test]
    fn maps_legacy_row() {
        let row = SchemaVersion::Legacy.map_row(&cells(&[
            "Q1", "T", "txt", "a1", "a2", "type1", "2024-01-01", "", "false", "id1",
        ]));
        assert_eq!(row.qid, "Q1");
        assert_eq!(row.title, "T");
        assert_eq!(row.audio2, "a2");
        assert_eq!(row.kind, "type1");
        assert_eq!(row.date, "2024-01-01");
        assert_eq!(row.extra_mention, "");
        assert!(!row.is_question);
        assert_eq!(row.question_tag, None);
        assert_eq!(row.id, "id1");
    }

    #[test]
    fn maps_tagged_row() {
        let row = SchemaVersion::Tagged.map_row(&cells(&[
            "Q2", "T", "txt", "", "", "", "", "note", "intro", "id9", "TRUE",
        ]));
        assert_eq!(row.question_tag.as_deref(), Some("intro"));
        assert!(row.is_question);
        assert_eq!(row.id, "id9");
        assert_eq!(row.extra_mention, "note");
    }

    #[test]
    fn short_rows_are_tolerated() {
        let row = SchemaVersion::Tagged.map_row(&cells(&["Q3", "only title"]));
        assert_eq!(row.qid, "Q3");
        assert_eq!(row.title, "only title");
        assert_eq!(row.id, "");
        assert!(!row.is_question);
        assert!(row.question_tag.is_none());
    }

    #[test]
    fn qid_is_trimmed() {
        let row = SchemaVersion::Legacy.map_row(&cells(&["  Q4 \t"]));
        assert_eq!(row.qid, "Q4");
    }

    #[test]
    fn numeric_qid_renders_as_integer() {
        let row = SchemaVersion::Legacy.map_row(&[Cell::Number(1042.0)]);
        assert_eq!(row.qid, "1042");
    }

    #[test]
    fn auto_detects_from_header() {
        assert_eq!(
            SchemaSetting::Auto.resolve(&cells(LEGACY_HEADER)),
            SchemaVersion::Legacy
        );
        assert_eq!(
            SchemaSetting::Auto.resolve(&cells(TAGGED_HEADER)),
            SchemaVersion::Tagged
        );
    }

    #[test]
    fn auto_detects_wide_header_as_tagged() {
        let mut header = cells(LEGACY_HEADER);
        header[8] = Cell::Text("tag".to_string());
        header.push(Cell::Text("flag".to_string()));
        assert_eq!(SchemaSetting::Auto.resolve(&header), SchemaVersion::Tagged);
    }

    #[test]
    fn header_detection_ignores_case_and_spacing() {
        let mut header = cells(LEGACY_HEADER);
        header[8] = Cell::Text(" Question_Tag ".to_string());
        assert_eq!(SchemaSetting::Auto.resolve(&header), SchemaVersion::Tagged);
    }

    #[test]
    fn pinned_setting_ignores_header() {
        assert_eq!(
            SchemaSetting::Legacy.resolve(&cells(TAGGED_HEADER)),
            SchemaVersion::Legacy
        );
        assert_eq!(SchemaSetting::Tagged.resolve(&[]), SchemaVersion::Tagged);
    }

    #[test]
    fn parse_setting() {
        assert_eq!(SchemaSetting::parse("AUTO"), Some(SchemaSetting::Auto));
        assert_eq!(SchemaSetting::parse("tagged"), Some(SchemaSetting::Tagged));
        assert_eq!(SchemaSetting::parse("v2"), None);
    }
}
