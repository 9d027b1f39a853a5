//! Notes attached to a dialog, plus the learner's saved working text for it.

use serde::Serialize;
use sqlx::Row;
use uuid::Uuid;

use super::{require, UserDataError, UserId, UserStore};

/// Maximum notes per dialog per user.
pub const NOTES_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub text: String,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

/// The learner's original and translated text for one dialog.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogContent {
    pub dialog_id: String,
    pub original_text: String,
    pub translation_text: String,
    pub qid: Option<String>,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub updated_at: i64,
}

impl UserStore {
    /// Newest first.
    pub async fn list_notes(&self, user: &UserId, dialog_id: &str) -> Result<Vec<Note>, UserDataError> {
        let rows = sqlx::query(
            "SELECT id, text, created_at, updated_at FROM notes
             WHERE user_id = ? AND dialog_id = ? ORDER BY created_at DESC, rowid DESC",
        )
        .bind(user.as_str())
        .bind(dialog_id.trim())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| Note {
                id: row.get("id"),
                text: row.get("text"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    /// Fails with [`UserDataError::NoteLimitReached`] once the dialog holds
    /// [`NOTES_LIMIT`] notes. The count check and insert are one statement.
    pub async fn add_note(&self, user: &UserId, dialog_id: &str, text: &str) -> Result<Note, UserDataError> {
        let dialog_id = require(dialog_id, "dialog id")?;
        let id = Uuid::new_v4().to_string();
        let created_at = self.now();

        let result = sqlx::query(
            "INSERT INTO notes (id, user_id, dialog_id, text, created_at)
             SELECT ?, ?, ?, ?, ?
             WHERE (SELECT COUNT(*) FROM notes WHERE user_id = ? AND dialog_id = ?) < ?",
        )
        .bind(&id)
        .bind(user.as_str())
        .bind(&dialog_id)
        .bind(text)
        .bind(created_at)
        .bind(user.as_str())
        .bind(&dialog_id)
        .bind(NOTES_LIMIT as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(UserDataError::NoteLimitReached { limit: NOTES_LIMIT });
        }

        Ok(Note {
            id,
            text: text.to_string(),
            created_at,
            updated_at: None,
        })
    }

    pub async fn update_note(
        &self,
        user: &UserId,
        dialog_id: &str,
        note_id: &str,
        text: &str,
    ) -> Result<Note, UserDataError> {
        let updated_at = self.now();
        let result = sqlx::query(
            "UPDATE notes SET text = ?, updated_at = ? WHERE id = ? AND user_id = ? AND dialog_id = ?",
        )
        .bind(text)
        .bind(updated_at)
        .bind(note_id)
        .bind(user.as_str())
        .bind(dialog_id.trim())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(UserDataError::NotFound(format!("note {}", note_id)));
        }

        let created_at: i64 = sqlx::query_scalar("SELECT created_at FROM notes WHERE id = ?")
            .bind(note_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(Note {
            id: note_id.to_string(),
            text: text.to_string(),
            created_at,
            updated_at: Some(updated_at),
        })
    }

    /// Returns whether a note was removed.
    pub async fn delete_note(&self, user: &UserId, dialog_id: &str, note_id: &str) -> Result<bool, UserDataError> {
        let result = sqlx::query("DELETE FROM notes WHERE id = ? AND user_id = ? AND dialog_id = ?")
            .bind(note_id)
            .bind(user.as_str())
            .bind(dialog_id.trim())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Upsert the saved working text for a dialog.
    #[allow(clippy::too_many_arguments)]
    pub async fn save_dialog_content(
        &self,
        user: &UserId,
        dialog_id: &str,
        original_text: &str,
        translation_text: &str,
        qid: Option<&str>,
        title: &str,
        kind: &str,
    ) -> Result<DialogContent, UserDataError> {
        let dialog_id = require(dialog_id, "dialog id")?;
        let qid = qid.map(str::trim).filter(|q| !q.is_empty());
        let updated_at = self.now();

        sqlx::query(
            "INSERT INTO dialog_content (user_id, dialog_id, original_text, translation_text, qid, title, kind, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id, dialog_id) DO UPDATE SET
                original_text = excluded.original_text,
                translation_text = excluded.translation_text,
                qid = excluded.qid,
                title = excluded.title,
                kind = excluded.kind,
                updated_at = excluded.updated_at",
        )
        .bind(user.as_str())
        .bind(&dialog_id)
        .bind(original_text)
        .bind(translation_text)
        .bind(qid)
        .bind(title)
        .bind(kind)
        .bind(updated_at)
        .execute(&self.pool)
        .await?;

        Ok(DialogContent {
            dialog_id,
            original_text: original_text.to_string(),
            translation_text: translation_text.to_string(),
            qid: qid.map(str::to_string),
            title: title.to_string(),
            kind: kind.to_string(),
            updated_at,
        })
    }

    pub async fn dialog_content(
        &self,
        user: &UserId,
        dialog_id: &str,
    ) -> Result<Option<DialogContent>, UserDataError> {
        let row = sqlx::query(
            "SELECT dialog_id, original_text, translation_text, qid, title, kind, updated_at
             FROM dialog_content WHERE user_id = ? AND dialog_id = ?",
        )
        .bind(user.as_str())
        .bind(dialog_id.trim())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| DialogContent {
            dialog_id: row.get("dialog_id"),
            original_text: row.get("original_text"),
            translation_text: row.get("translation_text"),
            qid: row.get("qid"),
            title: row.get("title"),
            kind: row.get("kind"),
            updated_at: row.get("updated_at"),
        }))
    }
}
