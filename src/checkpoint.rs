//! Persisted freshness checkpoint.
//!
//! A single string-keyed entry, `lastRefreshEpochMillis`, holding a decimal
//! string. It survives restarts and is only consulted for staleness; it is
//! not part of the dataset itself.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Key under which the checkpoint is stored.
pub const CHECKPOINT_KEY: &str = "lastRefreshEpochMillis";

/// Storage for the last successful refresh time.
pub trait CheckpointStore: Send + Sync {
    /// Epoch milliseconds of the last refresh, or `None` if never refreshed.
    fn read(&self) -> Result<Option<i64>>;
    fn write(&self, epoch_ms: i64) -> Result<()>;
}

/// Key-value JSON file: `{"lastRefreshEpochMillis": "1712345678901"}`.
///
/// Other keys in the file are preserved on write.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read checkpoint file: {}", self.path.display())
                })
            }
        };
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        match serde_json::from_str(&content) {
            Ok(map) => Ok(map),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring unreadable checkpoint file");
                Ok(BTreeMap::new())
            }
        }
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn read(&self) -> Result<Option<i64>> {
        let map = self.read_map()?;
        let Some(raw) = map.get(CHECKPOINT_KEY) else {
            return Ok(None);
        };
        match raw.trim().parse::<i64>() {
            Ok(v) => Ok(Some(v)),
            Err(_) => {
                warn!(value = %raw, "checkpoint is not a decimal timestamp; treating as absent");
                Ok(None)
            }
        }
    }

    fn write(&self, epoch_ms: i64) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut map = self.read_map()?;
        map.insert(CHECKPOINT_KEY.to_string(), epoch_ms.to_string());

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&map)?)
            .with_context(|| format!("Failed to write checkpoint file: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace checkpoint file: {}", self.path.display()))?;
        Ok(())
    }
}

/// Process-local checkpoint, lost on exit.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    value: Mutex<Option<i64>>,
}

impl MemoryCheckpointStore {
    pub fn new(initial: Option<i64>) -> Self {
        Self {
            value: Mutex::new(initial),
        }
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn read(&self) -> Result<Option<i64>> {
        let guard = self
            .value
            .lock()
            .map_err(|_| anyhow::anyhow!("checkpoint lock poisoned"))?;
        Ok(*guard)
    }

    fn write(&self, epoch_ms: i64) -> Result<()> {
        let mut guard = self
            .value
            .lock()
            .map_err(|_| anyhow::anyhow!("checkpoint lock poisoned"))?;
        *guard = Some(epoch_ms);
        Ok(())
    }
}
