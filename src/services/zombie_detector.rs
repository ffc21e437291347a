//! Zombie detection.
//!
//! A worker is a zombie when it is still in a live status but no heartbeat
//! has been seen for at least `zombie_threshold`. Workers that never sent a
//! heartbeat are aged from `created_at`. Every suspect is re-checked after
//! `verification_delay` before anything is done to it, and cleanups are
//! bounded per wall-clock minute.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::errors::{CleanupError, StoreError};
use crate::domain::models::{DetectorConfig, WorkerRecord};
use crate::domain::ports::{HeartbeatRegistry, WorkerStore};
use super::event_bus::EventBus;
use super::event_factory;
use super::rate_limiter::MinuteWindowLimiter;
use super::terminator::Terminator;

/// Runtime settings for detection and cleanup.
#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// Heartbeat silence after which a live worker is a zombie.
    pub zombie_threshold: Duration,
    /// Debounce before acting on a suspect.
    pub verification_delay: std::time::Duration,
    /// Grace period between the graceful stop and the forced kill.
    pub graceful_shutdown_timeout: std::time::Duration,
    /// Cleanups allowed per wall-clock minute.
    pub max_cleanups_per_minute: u32,
}

impl DetectorSettings {
    pub fn from_config(config: &DetectorConfig) -> Self {
        Self {
            zombie_threshold: Duration::seconds(
                i64::try_from(config.zombie_threshold_seconds).unwrap_or(i64::MAX),
            ),
            verification_delay: std::time::Duration::from_secs(config.verification_delay_seconds),
            graceful_shutdown_timeout: std::time::Duration::from_secs(
                config.graceful_shutdown_timeout_seconds,
            ),
            max_cleanups_per_minute: config.max_cleanups_per_minute,
        }
    }
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self::from_config(&DetectorConfig::default())
    }
}

/// Liveness classification of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Not a candidate: healthy, or not in a live status.
    Alive,
    Zombie {
        last_heartbeat: Option<DateTime<Utc>>,
        silence: Duration,
    },
}

impl Liveness {
    pub const fn is_zombie(&self) -> bool {
        matches!(self, Self::Zombie { .. })
    }
}

/// What happened to one suspect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// All phases ran; the record now lives in the zombie collection.
    Cleaned(WorkerRecord),
    /// A heartbeat or status change arrived during verification.
    FalsePositive,
    /// The per-minute cleanup budget is spent; retried on a later scan.
    Deferred,
}

/// Classifies workers and drives suspects through the termination pipeline.
pub struct ZombieDetector {
    settings: DetectorSettings,
    workers: Arc<dyn WorkerStore>,
    heartbeats: Arc<dyn HeartbeatRegistry>,
    terminator: Arc<Terminator>,
    event_bus: Arc<EventBus>,
    cleanup_limiter: MinuteWindowLimiter,
}

impl ZombieDetector {
    pub fn new(
        settings: DetectorSettings,
        workers: Arc<dyn WorkerStore>,
        heartbeats: Arc<dyn HeartbeatRegistry>,
        terminator: Arc<Terminator>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            cleanup_limiter: MinuteWindowLimiter::new(settings.max_cleanups_per_minute),
            settings,
            workers,
            heartbeats,
            terminator,
            event_bus,
        }
    }

    pub const fn settings(&self) -> &DetectorSettings {
        &self.settings
    }

    /// Pure classification at `now`.
    pub fn classify_at(
        &self,
        worker: &WorkerRecord,
        last_heartbeat: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Liveness {
        if !worker.status.is_live() {
            return Liveness::Alive;
        }
        let silence = now - last_heartbeat.unwrap_or(worker.created_at);
        if silence >= self.settings.zombie_threshold {
            Liveness::Zombie {
                last_heartbeat,
                silence,
            }
        } else {
            Liveness::Alive
        }
    }

    /// Classify `worker` against its last recorded heartbeat.
    pub async fn classify(&self, worker: &WorkerRecord) -> Result<Liveness, StoreError> {
        let last = self.heartbeats.last_heartbeat(&worker.worker_id).await?;
        Ok(self.classify_at(worker, last, Utc::now()))
    }

    /// Active workers currently classified as zombies.
    pub async fn scan(&self) -> Result<Vec<(WorkerRecord, Liveness)>, StoreError> {
        let mut suspects = Vec::new();
        for worker in self.workers.list_active().await? {
            match self.classify(&worker).await {
                Ok(liveness) if liveness.is_zombie() => suspects.push((worker, liveness)),
                Ok(_) => {}
                Err(e) => {
                    warn!(worker_id = %worker.worker_id, error = %e, "Heartbeat lookup failed");
                }
            }
        }
        debug!(suspects = suspects.len(), "Liveness scan finished");
        Ok(suspects)
    }

    /// Wait out the debounce and re-classify from fresh state.
    ///
    /// Returns the current record if the worker is still a zombie.
    pub async fn verify(&self, worker_id: &str) -> Result<Option<WorkerRecord>, StoreError> {
        tokio::time::sleep(self.settings.verification_delay).await;

        let Some(worker) = self.workers.get_active(worker_id).await? else {
            return Ok(None);
        };
        Ok(self
            .classify(&worker)
            .await?
            .is_zombie()
            .then_some(worker))
    }

    /// Verify a suspect and, if confirmed and within the cleanup budget,
    /// run the termination pipeline on it.
    pub async fn handle_suspect(
        &self,
        worker: &WorkerRecord,
        liveness: Liveness,
    ) -> Result<CleanupOutcome, CleanupError> {
        let Liveness::Zombie {
            last_heartbeat,
            silence,
        } = liveness
        else {
            return Ok(CleanupOutcome::FalsePositive);
        };

        info!(
            worker_id = %worker.worker_id,
            worker_type = %worker.worker_type,
            silence_seconds = silence.num_seconds(),
            "Zombie detected"
        );
        self.event_bus
            .publish(event_factory::zombie_detected(
                worker,
                last_heartbeat,
                silence.num_seconds(),
            ))
            .await;

        let Some(confirmed) = self.verify(&worker.worker_id).await? else {
            info!(worker_id = %worker.worker_id, "Zombie verification failed, worker is alive");
            self.event_bus
                .publish(event_factory::zombie_false_positive(&worker.worker_id))
                .await;
            return Ok(CleanupOutcome::FalsePositive);
        };

        if !self.cleanup_limiter.try_acquire().await {
            warn!(
                worker_id = %worker.worker_id,
                limit = self.settings.max_cleanups_per_minute,
                "Cleanup rate limit reached, deferring"
            );
            self.event_bus
                .publish(event_factory::cleanup_rate_limited(
                    &worker.worker_id,
                    self.settings.max_cleanups_per_minute,
                ))
                .await;
            return Ok(CleanupOutcome::Deferred);
        }

        let reason = format!("no heartbeat for {}s", silence.num_seconds());
        self.terminator
            .cleanup(&confirmed, &reason)
            .await
            .map(CleanupOutcome::Cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{
        FakeProcessTable, InMemoryEventStore, InMemoryLedgerStore, InMemoryWorkerStore,
        LeaseRegistry,
    };
    use crate::domain::models::{LifecycleEventType, WorkerStatus};
    use crate::domain::ports::{EventStore, NullArchiver};
    use crate::services::terminator::TerminatorDeps;
    use crate::services::token_ledger::{LedgerSettings, TokenLedger};

    struct Harness {
        detector: Arc<ZombieDetector>,
        workers: Arc<InMemoryWorkerStore>,
        leases: Arc<LeaseRegistry>,
        events: Arc<InMemoryEventStore>,
    }

    async fn harness(settings: DetectorSettings) -> Harness {
        let workers = Arc::new(InMemoryWorkerStore::default());
        let leases = Arc::new(LeaseRegistry::default());
        let events = Arc::new(InMemoryEventStore::default());
        let bus = Arc::new(EventBus::default().with_store(events.clone()));
        let ledger = Arc::new(
            TokenLedger::open(LedgerSettings::default(), Arc::new(InMemoryLedgerStore::default()))
                .await
                .unwrap(),
        );
        let terminator = Arc::new(Terminator::new(
            settings.graceful_shutdown_timeout,
            TerminatorDeps {
                ledger,
                workers: workers.clone(),
                heartbeats: leases.clone(),
                processes: Arc::new(FakeProcessTable::default()),
                archiver: Arc::new(NullArchiver),
                event_bus: bus.clone(),
            },
        ));
        let detector = Arc::new(ZombieDetector::new(
            settings,
            workers.clone(),
            leases.clone(),
            terminator,
            bus,
        ));
        Harness {
            detector,
            workers,
            leases,
            events,
        }
    }

    fn fast_settings() -> DetectorSettings {
        DetectorSettings {
            zombie_threshold: Duration::seconds(300),
            verification_delay: std::time::Duration::from_millis(50),
            graceful_shutdown_timeout: std::time::Duration::from_millis(50),
            max_cleanups_per_minute: 5,
        }
    }

    fn stale_worker(id: &str) -> WorkerRecord {
        let mut worker = WorkerRecord::new(id, "task-1", "scan", "coordinator", 100);
        worker.status = WorkerStatus::Active;
        worker.created_at = Utc::now() - Duration::seconds(400);
        worker
    }

    async fn event_types(events: &InMemoryEventStore) -> Vec<LifecycleEventType> {
        events
            .recent(100)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect()
    }

    #[tokio::test]
    async fn test_classification_threshold() {
        let h = harness(fast_settings()).await;
        let now = Utc::now();
        let worker = stale_worker("w-1");

        let at_threshold = h
            .detector
            .classify_at(&worker, Some(now - Duration::seconds(300)), now);
        assert!(at_threshold.is_zombie());

        let fresh = h
            .detector
            .classify_at(&worker, Some(now - Duration::seconds(299)), now);
        assert_eq!(fresh, Liveness::Alive);
    }

    #[tokio::test]
    async fn test_only_live_statuses_are_candidates() {
        let h = harness(fast_settings()).await;
        let now = Utc::now();
        let mut worker = stale_worker("w-1");
        for status in [WorkerStatus::Completed, WorkerStatus::Zombie, WorkerStatus::Failed] {
            worker.status = status;
            assert_eq!(h.detector.classify_at(&worker, None, now), Liveness::Alive);
        }
    }

    #[tokio::test]
    async fn test_missing_heartbeat_ages_from_creation() {
        let h = harness(fast_settings()).await;
        let now = Utc::now();
        let mut worker = stale_worker("w-1");
        assert!(h.detector.classify_at(&worker, None, now).is_zombie());

        worker.created_at = now - Duration::seconds(10);
        assert!(!h.detector.classify_at(&worker, None, now).is_zombie());
    }

    #[tokio::test]
    async fn test_scan_finds_stale_workers() {
        let h = harness(fast_settings()).await;
        h.workers.insert_active(&stale_worker("w-1")).await.unwrap();
        h.workers.insert_active(&stale_worker("w-2")).await.unwrap();
        h.leases.record("w-2").await.unwrap();

        let suspects = h.detector.scan().await.unwrap();
        assert_eq!(suspects.len(), 1);
        assert_eq!(suspects[0].0.worker_id, "w-1");
    }

    #[tokio::test]
    async fn test_heartbeat_during_verification_aborts() {
        let h = harness(DetectorSettings {
            verification_delay: std::time::Duration::from_millis(200),
            ..fast_settings()
        })
        .await;
        let worker = stale_worker("w-1");
        h.workers.insert_active(&worker).await.unwrap();
        let liveness = h.detector.classify(&worker).await.unwrap();

        let leases = h.leases.clone();
        let pulse = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            leases.record("w-1").await.unwrap();
        });

        let outcome = h.detector.handle_suspect(&worker, liveness).await.unwrap();
        pulse.await.unwrap();

        assert_eq!(outcome, CleanupOutcome::FalsePositive);
        assert!(h.workers.get_active("w-1").await.unwrap().is_some());
        assert!(h.workers.find_zombie("w-1").await.unwrap().is_none());
        assert_eq!(
            event_types(&h.events).await,
            vec![
                LifecycleEventType::ZombieDetected,
                LifecycleEventType::ZombieFalsePositive
            ]
        );
    }

    #[tokio::test]
    async fn test_confirmed_zombie_is_cleaned() {
        let h = harness(fast_settings()).await;
        let worker = stale_worker("w-1");
        h.workers.insert_active(&worker).await.unwrap();
        let liveness = h.detector.classify(&worker).await.unwrap();

        let outcome = h.detector.handle_suspect(&worker, liveness).await.unwrap();
        let CleanupOutcome::Cleaned(record) = outcome else {
            panic!("expected cleanup, got {outcome:?}");
        };
        assert_eq!(record.status, WorkerStatus::Zombie);
        assert!(h.workers.get_active("w-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_rate_limit_defers_without_mutation() {
        let h = harness(DetectorSettings {
            max_cleanups_per_minute: 0,
            ..fast_settings()
        })
        .await;
        let worker = stale_worker("w-1");
        h.workers.insert_active(&worker).await.unwrap();
        let liveness = h.detector.classify(&worker).await.unwrap();

        let outcome = h.detector.handle_suspect(&worker, liveness).await.unwrap();

        assert_eq!(outcome, CleanupOutcome::Deferred);
        assert_eq!(h.workers.get_active("w-1").await.unwrap(), Some(worker));
        assert_eq!(
            event_types(&h.events).await,
            vec![
                LifecycleEventType::ZombieDetected,
                LifecycleEventType::CleanupRateLimited
            ]
        );
    }
}
