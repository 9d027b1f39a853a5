//! Per-user learning state.
//!
//! Everything a signed-in learner accumulates while practicing lives here:
//! favorites, notes, learned and listened markers, practice logs, and UI
//! settings. Community data (feedback, polls) sits alongside it in the same
//! SQLite database.
//!
//! Each concern is a submodule that adds methods to [`UserStore`]. All
//! per-user operations take a [`UserId`]; authentication happens upstream
//! and is not this module's business.

pub mod community;
pub mod favorites;
pub mod notes;
pub mod practice;
pub mod progress;
pub mod settings;

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;

use crate::config::DbConfig;
use crate::db;
use crate::migrate;
use crate::staleness::{Clock, SystemClock};

pub use community::{PollOption, PollResults};
pub use favorites::Favorite;
pub use notes::{DialogContent, Note, NOTES_LIMIT};
pub use practice::{NewPracticeLog, PracticeLog};
pub use progress::{ProgressMap, Track};
pub use settings::SettingsScope;

/// Opaque identifier of an authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// `None` for blank input.
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum UserDataError {
    #[error("a dialog can hold at most {limit} notes")]
    NoteLimitReached { limit: usize },
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error("stored value is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// SQLite-backed store for user and community state.
#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl UserStore {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Connect and run migrations.
    pub async fn open(config: &DbConfig) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool, Arc::new(SystemClock)))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn now(&self) -> i64 {
        self.clock.now_millis()
    }
}

/// Reject blank identifiers used as keys.
fn require(value: &str, what: &str) -> Result<String, UserDataError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(UserDataError::Invalid(format!("{} must not be blank", what)))
    } else {
        Ok(trimmed.to_string())
    }
}
