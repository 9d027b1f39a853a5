//! Practice logs: one entry per attempt at a question.

use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::{require, UserDataError, UserId, UserStore};

/// A practice attempt as submitted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewPracticeLog {
    pub question_id: String,
    pub question_title: String,
    pub question_number: String,
    pub question_type: String,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeLog {
    pub id: String,
    pub question_id: String,
    pub question_title: String,
    pub question_number: String,
    pub question_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

fn log_from_row(row: &SqliteRow) -> PracticeLog {
    PracticeLog {
        id: row.get("id"),
        question_id: row.get("question_id"),
        question_title: row.get("question_title"),
        question_number: row.get("question_number"),
        question_type: row.get("question_type"),
        score: row.get("score"),
        timestamp: row.get("timestamp"),
    }
}

/// Epoch milliseconds of the most recent local midnight at or before `now_ms`.
pub fn local_midnight(now_ms: i64) -> i64 {
    let Some(now) = Local.timestamp_millis_opt(now_ms).single() else {
        return now_ms;
    };
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| midnight.and_local_timezone(Local).earliest())
        .map(|midnight| midnight.timestamp_millis())
        .unwrap_or(now_ms)
}

impl UserStore {
    /// Non-finite scores are stored as absent.
    pub async fn add_practice_log(&self, user: &UserId, log: &NewPracticeLog) -> Result<PracticeLog, UserDataError> {
        let question_id = require(&log.question_id, "question id")?;
        let score = log.score.filter(|s| s.is_finite());
        let entry = PracticeLog {
            id: Uuid::new_v4().to_string(),
            question_id,
            question_title: log.question_title.clone(),
            question_number: log.question_number.clone(),
            question_type: log.question_type.clone(),
            score,
            timestamp: self.now(),
        };

        sqlx::query(
            "INSERT INTO practice_logs (id, user_id, question_id, question_title, question_number, question_type, score, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(user.as_str())
        .bind(&entry.question_id)
        .bind(&entry.question_title)
        .bind(&entry.question_number)
        .bind(&entry.question_type)
        .bind(entry.score)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(entry)
    }

    /// Oldest first.
    pub async fn all_practice_logs(&self, user: &UserId) -> Result<Vec<PracticeLog>, UserDataError> {
        self.practice_logs_since(user, i64::MIN).await
    }

    /// Logs with `timestamp >= since_ms`, oldest first.
    pub async fn practice_logs_since(&self, user: &UserId, since_ms: i64) -> Result<Vec<PracticeLog>, UserDataError> {
        let rows = sqlx::query(
            "SELECT id, question_id, question_title, question_number, question_type, score, timestamp
             FROM practice_logs WHERE user_id = ? AND timestamp >= ? ORDER BY timestamp ASC, rowid ASC",
        )
        .bind(user.as_str())
        .bind(since_ms)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(log_from_row).collect())
    }

    /// Logs since local midnight.
    pub async fn today_practice_logs(&self, user: &UserId) -> Result<Vec<PracticeLog>, UserDataError> {
        self.practice_logs_since(user, local_midnight(self.now())).await
    }
}
