//! Token ledger service.
//!
//! Serializes every read-modify-write of the persisted [`LedgerRecord`]
//! behind one exclusive lock with a bounded wait: an in-process mutex plus
//! the store's own lock, which for the filesystem store is an advisory lock
//! shared with every other process on the same state directory. Each
//! mutation reloads the
//! record from the store, applies the change to a working copy, persists it
//! and only then publishes the new snapshot, so a failed save leaves both the
//! store and the in-memory view untouched.
//!
//! Reads (`summary`, `allocation`, `available`) come from the last published
//! snapshot and never take the lock. Callers that act on another process's
//! writes call [`TokenLedger::refresh`] first.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::errors::LedgerError;
use crate::domain::models::{
    Allocation, LedgerConfig, LedgerRecord, LedgerSummary, ReclaimReport, ReleaseOutcome,
};
use crate::domain::ports::{LedgerLockGuard, LedgerStore};

/// Runtime settings for the ledger.
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    /// Budget used when no ledger has been persisted yet.
    pub total_budget: u64,
    /// Maximum wait for the exclusive lock.
    pub lock_timeout: std::time::Duration,
    /// Age after which held allocations are force-reclaimed.
    pub stale_timeout: Duration,
}

impl LedgerSettings {
    pub fn from_config(config: &LedgerConfig) -> Self {
        Self {
            total_budget: config.total_budget,
            lock_timeout: std::time::Duration::from_millis(config.lock_timeout_ms),
            stale_timeout: Duration::seconds(
                i64::try_from(config.stale_timeout_seconds).unwrap_or(i64::MAX),
            ),
        }
    }
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self::from_config(&LedgerConfig::default())
    }
}

/// Both halves of the ledger lock. The store lock is released first.
struct LedgerGuard<'a> {
    _shared: Box<dyn LedgerLockGuard>,
    _local: MutexGuard<'a, ()>,
}

/// Shared token budget across all workers.
pub struct TokenLedger {
    settings: LedgerSettings,
    store: Arc<dyn LedgerStore>,
    lock: Mutex<()>,
    snapshot: watch::Sender<LedgerRecord>,
}

impl TokenLedger {
    /// Open the ledger, creating and persisting an empty one if none exists.
    pub async fn open(
        settings: LedgerSettings,
        store: Arc<dyn LedgerStore>,
    ) -> Result<Self, LedgerError> {
        let record = match store.load().await? {
            Some(record) => {
                record.validate().inspect_err(|e| {
                    warn!(
                        total_budget = record.total_budget,
                        allocated = record.allocated,
                        in_use = record.in_use,
                        available = record.available,
                        error = %e,
                        "Refusing inconsistent persisted ledger"
                    );
                })?;
                record
            }
            None => {
                let record = LedgerRecord::new(settings.total_budget);
                store.save(&record).await?;
                info!(total_budget = record.total_budget, "Initialized token ledger");
                record
            }
        };

        let (snapshot, _) = watch::channel(record);
        Ok(Self {
            settings,
            store,
            lock: Mutex::new(()),
            snapshot,
        })
    }

    pub const fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    /// Reserve `tokens` for a new worker.
    pub async fn allocate(&self, worker_id: &str, tokens: u64) -> Result<(), LedgerError> {
        self.mutate(|record, now| record.allocate(worker_id, tokens, now))
            .await
            .inspect(|_| info!(worker_id, tokens, "Allocated tokens"))
            .inspect_err(|e| debug!(worker_id, tokens, error = %e, "Allocation refused"))
    }

    /// Mark a worker's allocation as actively consumed.
    pub async fn start_using(&self, worker_id: &str) -> Result<u64, LedgerError> {
        self.mutate(|record, now| record.start_using(worker_id, now))
            .await
            .inspect(|tokens| debug!(worker_id, tokens, "Allocation in use"))
    }

    /// Return a worker's full allocation to the pool.
    ///
    /// Idempotent: releasing an already released or reclaimed allocation
    /// changes nothing and reports which case applied.
    pub async fn release(
        &self,
        worker_id: &str,
        actual_used: u64,
    ) -> Result<ReleaseOutcome, LedgerError> {
        let outcome = self
            .mutate(|record, now| record.release(worker_id, actual_used, now))
            .await?;
        match outcome {
            ReleaseOutcome::Released { tokens } => {
                info!(worker_id, tokens, actual_used, "Released tokens");
            }
            ReleaseOutcome::AlreadyReleased => debug!(worker_id, "Allocation already released"),
            ReleaseOutcome::AlreadyReclaimed => debug!(worker_id, "Allocation already reclaimed"),
            ReleaseOutcome::FullyUsed => debug!(worker_id, actual_used, "Allocation fully used"),
        }
        Ok(outcome)
    }

    /// Release whatever part of a worker's allocation went unused.
    ///
    /// The held/remaining check runs against the freshly loaded record, so
    /// allocations made by other processes are seen.
    pub async fn release_unused(
        &self,
        worker_id: &str,
        actual_used: u64,
    ) -> Result<ReleaseOutcome, LedgerError> {
        let outcome = self
            .mutate(|record, now| record.release_unused(worker_id, actual_used, now))
            .await?;
        if let ReleaseOutcome::Released { tokens } = outcome {
            info!(worker_id, tokens, actual_used, "Released unused tokens");
        }
        Ok(outcome)
    }

    /// Force-return allocations older than the configured stale timeout.
    pub async fn reclaim_stale(&self) -> Result<ReclaimReport, LedgerError> {
        self.reclaim_older_than(self.settings.stale_timeout).await
    }

    /// Force-return allocations older than `timeout`.
    pub async fn reclaim_older_than(&self, timeout: Duration) -> Result<ReclaimReport, LedgerError> {
        let report = self
            .mutate(|record, now| record.reclaim_stale(timeout, now))
            .await?;
        if !report.workers_cleaned.is_empty() {
            warn!(
                tokens = report.tokens_reclaimed,
                workers = ?report.workers_cleaned,
                "Reclaimed stale allocations"
            );
        }
        Ok(report)
    }

    /// Drop released allocations from the record.
    pub async fn compact(&self) -> Result<usize, LedgerError> {
        let removed = self.mutate(|record, _| Ok(record.compact())).await?;
        if removed > 0 {
            debug!(removed, "Compacted ledger");
        }
        Ok(removed)
    }

    /// Reload the snapshot from the store, picking up writes made by other
    /// processes.
    pub async fn refresh(&self) -> Result<LedgerSummary, LedgerError> {
        let _guard = self.acquire().await?;
        let record = self.load_current().await?;
        let summary = record.summary();
        self.snapshot.send_replace(record);
        Ok(summary)
    }

    pub fn summary(&self) -> LedgerSummary {
        self.snapshot.borrow().summary()
    }

    pub fn available(&self) -> u64 {
        self.snapshot.borrow().available
    }

    pub fn allocation(&self, worker_id: &str) -> Option<Allocation> {
        self.snapshot.borrow().allocations.get(worker_id).cloned()
    }

    /// Copy of the full record as last persisted.
    pub fn record(&self) -> LedgerRecord {
        self.snapshot.borrow().clone()
    }

    async fn acquire(&self) -> Result<LedgerGuard<'_>, LedgerError> {
        let started = Instant::now();
        let timeout = self.settings.lock_timeout;

        let local = tokio::time::timeout(timeout, self.lock.lock())
            .await
            .map_err(|_| self.lock_timeout())?;
        let shared = self
            .store
            .lock_exclusive(timeout.saturating_sub(started.elapsed()))
            .await?
            .ok_or_else(|| self.lock_timeout())?;

        Ok(LedgerGuard {
            _shared: shared,
            _local: local,
        })
    }

    fn lock_timeout(&self) -> LedgerError {
        let waited = u64::try_from(self.settings.lock_timeout.as_millis()).unwrap_or(u64::MAX);
        warn!(waited_ms = waited, "Ledger lock timeout");
        LedgerError::LockTimeout(waited)
    }

    async fn load_current(&self) -> Result<LedgerRecord, LedgerError> {
        let record = self
            .store
            .load()
            .await?
            .unwrap_or_else(|| LedgerRecord::new(self.settings.total_budget));
        record.validate()?;
        Ok(record)
    }

    async fn mutate<T>(
        &self,
        apply: impl FnOnce(&mut LedgerRecord, DateTime<Utc>) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let _guard = self.acquire().await?;

        let before = self.load_current().await?;
        let mut record = before.clone();
        let now = Utc::now();
        let out = apply(&mut record, now)?;

        if record != before {
            record.updated_at = now;
            self.store.save(&record).await?;
        }
        self.snapshot.send_replace(record);
        Ok(out)
    }
}
