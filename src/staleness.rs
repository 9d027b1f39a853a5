//! Wall-clock staleness policy for the dataset.
//!
//! The dataset changes rarely and there is no invalidation channel, so a
//! cached copy is trusted until the persisted checkpoint is older than
//! `max_age`. Age is measured by the clock, not by content: a refresh after
//! the window re-fetches and re-parses even if nothing changed upstream.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Default maximum checkpoint age: 24 hours.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Source of the current time in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(now_millis),
        }
    }

    pub fn set(&self, now_millis: i64) {
        self.now.store(now_millis, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Decides whether a checkpoint is too old to trust.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessPolicy {
    max_age_ms: i64,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AGE)
    }
}

impl StalenessPolicy {
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age_ms: i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX),
        }
    }

    pub fn max_age_ms(&self) -> i64 {
        self.max_age_ms
    }

    /// `true` when there is no checkpoint or it is strictly older than the
    /// maximum age. A checkpoint in the future counts as fresh.
    pub fn should_force_refresh(&self, checkpoint: Option<i64>, now_ms: i64) -> bool {
        match checkpoint {
            None => true,
            Some(at) => now_ms.saturating_sub(at) > self.max_age_ms,
        }
    }
}
