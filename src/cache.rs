//! The dataset cache: staleness-aware, single-flight ingest.
//!
//! [`DatasetCache`] is an explicit object owned by whoever composes the
//! application and shared by `Arc`. It publishes immutable [`Dataset`]
//! snapshots through a `tokio::sync::watch` channel; readers never see a
//! half-built dataset and cannot mutate the published one.
//!
//! # Load decision
//!
//! ```text
//! needs_refresh = force || policy.should_force_refresh(checkpoint)
//! loaded && !needs_refresh           → CacheHit (no I/O)
//! another ingest finished meanwhile  → Joined
//! otherwise                          → reset, fetch, parse, publish
//! ```
//!
//! Ingest is serialized by an async mutex. A caller that queued behind an
//! in-flight ingest returns [`LoadOutcome::Joined`] once it completes rather
//! than issuing a second fetch. The checkpoint is written only after a
//! successful ingest, with the same timestamp as `last_updated_at`.
//!
//! The store is read once per cache and the value is kept in memory after
//! that. Store I/O from `load` runs on the blocking pool.
//!
//! `load` never fails: errors are recorded in the published dataset and
//! returned as [`LoadOutcome::Failed`].

use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointStore, FileCheckpointStore};
use crate::config::Config;
use crate::fetch::{Fetcher, HttpFetcher};
use crate::ingest::{parse_dataset, IngestError};
use crate::models::{Dataset, LoadOutcome, Row};
use crate::schema::SchemaSetting;
use crate::staleness::{Clock, StalenessPolicy, SystemClock};

/// Default fetch timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Checkpoint age as seen by the staleness policy right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Freshness {
    pub checkpoint: Option<i64>,
    pub now: i64,
    pub max_age_ms: i64,
    pub stale: bool,
}

impl Freshness {
    pub fn age_ms(&self) -> Option<i64> {
        self.checkpoint.map(|at| self.now - at)
    }
}

pub struct DatasetCache {
    fetcher: Arc<dyn Fetcher>,
    checkpoint: Arc<dyn CheckpointStore>,
    clock: Arc<dyn Clock>,
    policy: StalenessPolicy,
    schema: SchemaSetting,
    fetch_timeout: Duration,
    state: watch::Sender<Arc<Dataset>>,
    gate: Mutex<()>,
    /// Number of ingests that reached a terminal state.
    completed: AtomicU64,
    /// Last checkpoint read from or written to the store; outer `None` until known.
    known: StdMutex<Option<Option<i64>>>,
}

impl DatasetCache {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        checkpoint: Arc<dyn CheckpointStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (state, _) = watch::channel(Arc::new(Dataset::empty()));
        Self {
            fetcher,
            checkpoint,
            clock,
            policy: StalenessPolicy::default(),
            schema: SchemaSetting::Auto,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            state,
            gate: Mutex::new(()),
            completed: AtomicU64::new(0),
            known: StdMutex::new(None),
        }
    }

    pub fn with_policy(mut self, policy: StalenessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_schema(mut self, schema: SchemaSetting) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Wire the HTTP fetcher, file checkpoint, and system clock from config.
    pub fn from_config(config: &Config) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let fetcher = HttpFetcher::from_config(&config.dataset, clock.clone())?;
        let checkpoint = FileCheckpointStore::new(&config.checkpoint.path);

        Ok(Self::new(Arc::new(fetcher), Arc::new(checkpoint), clock)
            .with_policy(StalenessPolicy::new(Duration::from_secs(
                config.dataset.max_age_secs,
            )))
            .with_schema(config.dataset.schema_setting())
            .with_fetch_timeout(Duration::from_secs(config.dataset.timeout_secs)))
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<Dataset> {
        self.state.borrow().clone()
    }

    /// Receive every published snapshot, including transient refresh states.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Dataset>> {
        self.state.subscribe()
    }

    /// Rows of one qid group from the current snapshot.
    pub fn rows_for(&self, qid: &str) -> Vec<Row> {
        self.snapshot().group(qid).into_iter().cloned().collect()
    }

    /// Group keys of the current snapshot in encounter order.
    pub fn qids(&self) -> Vec<String> {
        self.snapshot().index.qids().map(str::to_string).collect()
    }

    /// Staleness of the persisted checkpoint, without side effects.
    ///
    /// Reads the store on the calling thread if the checkpoint is not yet
    /// known; async callers go through `load` instead.
    pub fn freshness(&self) -> Freshness {
        let checkpoint = match self.remembered() {
            Some(cp) => cp,
            None => self.remember(checkpoint_or_none(self.checkpoint.read())),
        };
        self.freshness_at(checkpoint)
    }

    fn freshness_at(&self, checkpoint: Option<i64>) -> Freshness {
        let now = self.clock.now_millis();
        Freshness {
            checkpoint,
            now,
            max_age_ms: self.policy.max_age_ms(),
            stale: self.policy.should_force_refresh(checkpoint, now),
        }
    }

    /// `load(true)`.
    pub async fn refresh(&self) -> LoadOutcome {
        self.load(true).await
    }

    /// Load the dataset if it is missing or stale, or unconditionally when `force` is set.
    pub async fn load(&self, force: bool) -> LoadOutcome {
        let observed = self.completed.load(Ordering::Acquire);
        let stale = self.freshness_at(self.current_checkpoint().await).stale;
        let needs_refresh = force || stale;

        if !needs_refresh && self.snapshot().loaded {
            debug!("dataset cache hit");
            return LoadOutcome::CacheHit;
        }

        let _gate = self.gate.lock().await;
        if self.completed.load(Ordering::Acquire) != observed {
            let loaded = self.snapshot().loaded;
            debug!(loaded, "joined a dataset ingest that completed while waiting");
            return LoadOutcome::Joined { loaded };
        }

        if needs_refresh {
            info!(force, stale, "refreshing dialog dataset");
        } else {
            info!("loading dialog dataset");
        }
        self.ingest().await
    }

    fn remembered(&self) -> Option<Option<i64>> {
        *self.known.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remember(&self, checkpoint: Option<i64>) -> Option<i64> {
        *self.known.lock().unwrap_or_else(|e| e.into_inner()) = Some(checkpoint);
        checkpoint
    }

    async fn current_checkpoint(&self) -> Option<i64> {
        if let Some(cp) = self.remembered() {
            return cp;
        }
        let store = self.checkpoint.clone();
        let read = tokio::task::spawn_blocking(move || store.read())
            .await
            .unwrap_or_else(|e| Err(anyhow::anyhow!("checkpoint task failed: {}", e)));
        self.remember(checkpoint_or_none(read))
    }

    async fn persist_checkpoint(&self, epoch_ms: i64) {
        let store = self.checkpoint.clone();
        let written = tokio::task::spawn_blocking(move || store.write(epoch_ms))
            .await
            .unwrap_or_else(|e| Err(anyhow::anyhow!("checkpoint task failed: {}", e)));
        match written {
            Ok(()) => {
                self.remember(Some(epoch_ms));
            }
            Err(e) => warn!(error = %e, "failed to persist refresh checkpoint"),
        }
    }

    /// Fetch, parse, and publish. Caller holds the gate.
    async fn ingest(&self) -> LoadOutcome {
        self.state.send_replace(Arc::new(Dataset::refreshing()));
        let mut in_flight = InFlight {
            state: &self.state,
            finished: false,
        };

        let result = match self.fetch().await {
            Ok(bytes) => {
                let schema = self.schema;
                tokio::task::spawn_blocking(move || parse_dataset(&bytes, schema))
                    .await
                    .unwrap_or_else(|e| Err(IngestError::Workbook(format!("parser task failed: {}", e))))
            }
            Err(e) => Err(e),
        };

        let outcome = match result {
            Ok(ingested) => {
                let now = self.clock.now_millis();
                self.persist_checkpoint(now).await;
                let rows = ingested.rows.len();
                let groups = ingested.index.len();
                self.state.send_replace(Arc::new(Dataset::loaded(
                    ingested.rows,
                    ingested.index,
                    now,
                )));
                info!(
                    rows,
                    groups,
                    skipped = ingested.skipped,
                    schema = ingested.schema.as_str(),
                    "dialog dataset loaded"
                );
                LoadOutcome::Loaded { rows, groups }
            }
            Err(e) => {
                warn!(kind = ?e.kind(), error = %e, "dialog dataset ingest failed");
                self.state
                    .send_replace(Arc::new(Dataset::failed(e.clone())));
                LoadOutcome::Failed(e)
            }
        };

        in_flight.finished = true;
        self.completed.fetch_add(1, Ordering::Release);
        outcome
    }

    async fn fetch(&self) -> Result<Vec<u8>, IngestError> {
        match tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(IngestError::Timeout {
                after_ms: self.fetch_timeout.as_millis() as u64,
            }),
        }
    }
}

fn checkpoint_or_none(read: Result<Option<i64>>) -> Option<i64> {
    match read {
        Ok(cp) => cp,
        Err(e) => {
            warn!(error = %e, "failed to read refresh checkpoint; treating as never refreshed");
            None
        }
    }
}

/// Clears the refreshing flag if an ingest future is dropped mid-flight.
struct InFlight<'a> {
    state: &'a watch::Sender<Arc<Dataset>>,
    finished: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.state.send_replace(Arc::new(Dataset::empty()));
        }
    }
}
