//! Learned and listened markers, keyed by qid then dialog id.

use std::collections::BTreeMap;

use sqlx::Row;

use super::{UserDataError, UserId, UserStore};

/// `qid → {dialog_id → true}`.
pub type ProgressMap = BTreeMap<String, BTreeMap<String, bool>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Track {
    Learned,
    Listened,
}

impl Track {
    pub fn as_str(self) -> &'static str {
        match self {
            Track::Learned => "learned",
            Track::Listened => "listened",
        }
    }
}

impl UserStore {
    /// Record a marker. Blank ids are ignored and return `false`.
    pub async fn mark(&self, user: &UserId, track: Track, qid: &str, dialog_id: &str) -> Result<bool, UserDataError> {
        let (qid, dialog_id) = (qid.trim(), dialog_id.trim());
        if qid.is_empty() || dialog_id.is_empty() {
            return Ok(false);
        }
        sqlx::query(
            "INSERT OR IGNORE INTO progress (user_id, track, qid, dialog_id, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user.as_str())
        .bind(track.as_str())
        .bind(qid)
        .bind(dialog_id)
        .bind(self.now())
        .execute(&self.pool)
        .await?;
        Ok(true)
    }

    pub async fn is_marked(&self, user: &UserId, track: Track, qid: &str, dialog_id: &str) -> Result<bool, UserDataError> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM progress WHERE user_id = ? AND track = ? AND qid = ? AND dialog_id = ?",
        )
        .bind(user.as_str())
        .bind(track.as_str())
        .bind(qid.trim())
        .bind(dialog_id.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    pub async fn progress(&self, user: &UserId, track: Track) -> Result<ProgressMap, UserDataError> {
        let rows = sqlx::query("SELECT qid, dialog_id FROM progress WHERE user_id = ? AND track = ?")
            .bind(user.as_str())
            .bind(track.as_str())
            .fetch_all(&self.pool)
            .await?;

        let mut map = ProgressMap::new();
        for row in &rows {
            let qid: String = row.get("qid");
            let dialog_id: String = row.get("dialog_id");
            map.entry(qid).or_default().insert(dialog_id, true);
        }
        Ok(map)
    }

    pub async fn mark_learned(&self, user: &UserId, qid: &str, dialog_id: &str) -> Result<bool, UserDataError> {
        self.mark(user, Track::Learned, qid, dialog_id).await
    }

    pub async fn is_learned(&self, user: &UserId, qid: &str, dialog_id: &str) -> Result<bool, UserDataError> {
        self.is_marked(user, Track::Learned, qid, dialog_id).await
    }

    pub async fn all_learned(&self, user: &UserId) -> Result<ProgressMap, UserDataError> {
        self.progress(user, Track::Learned).await
    }

    pub async fn mark_listened(&self, user: &UserId, qid: &str, dialog_id: &str) -> Result<bool, UserDataError> {
        self.mark(user, Track::Listened, qid, dialog_id).await
    }

    pub async fn all_listening_progress(&self, user: &UserId) -> Result<ProgressMap, UserDataError> {
        self.progress(user, Track::Listened).await
    }
}
