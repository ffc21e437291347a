//! Long-running lifecycle monitor.
//!
//! Three loops share one shutdown signal:
//! - liveness: scan active workers, verify suspects, run the termination
//!   pipeline on confirmed zombies (bounded concurrency)
//! - restart: consume cleaned-up workers and schedule replacements
//! - reclamation: force-return stale allocations and compact the ledger
//!
//! Per-worker failures are logged (and evented by the services) and never
//! stop a loop.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::domain::errors::{LedgerError, StoreError};
use crate::domain::models::{Config, ReclaimReport, WorkerRecord};
use crate::services::{
    event_factory, CleanupOutcome, EventBus, ReconcileReport, Reconciler, RestartPolicyEngine,
    TokenLedger, ZombieDetector,
};

/// Timing and concurrency of the monitor loops.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub check_interval: Duration,
    pub reclaim_interval: Duration,
    pub max_concurrent_cleanups: usize,
    /// Capacity of the cleaned-worker channel feeding the restart loop.
    pub restart_channel_capacity: usize,
}

impl MonitorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            check_interval: Duration::from_secs(config.detector.check_interval_seconds.max(1)),
            reclaim_interval: Duration::from_secs(config.ledger.reclaim_interval_seconds.max(1)),
            max_concurrent_cleanups: config.detector.max_concurrent_cleanups.max(1),
            restart_channel_capacity: 256,
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Join handles of the running loops.
pub struct MonitorHandles {
    pub liveness: JoinHandle<()>,
    pub restart: JoinHandle<()>,
    pub reclamation: JoinHandle<()>,
}

impl MonitorHandles {
    /// Wait for all loops to exit.
    pub async fn join(self) {
        for (name, handle) in [
            ("liveness", self.liveness),
            ("restart", self.restart),
            ("reclamation", self.reclamation),
        ] {
            if let Err(e) = handle.await {
                error!(monitor_loop = name, error = %e, "Monitor loop panicked");
            }
        }
    }
}

/// Drives detection, restarts and reclamation until shut down.
pub struct LifecycleMonitor {
    settings: MonitorSettings,
    detector: Arc<ZombieDetector>,
    restarts: Arc<RestartPolicyEngine>,
    ledger: Arc<TokenLedger>,
    reconciler: Arc<Reconciler>,
    event_bus: Arc<EventBus>,
    shutdown_tx: broadcast::Sender<()>,
}

impl LifecycleMonitor {
    pub fn new(
        settings: MonitorSettings,
        detector: Arc<ZombieDetector>,
        restarts: Arc<RestartPolicyEngine>,
        ledger: Arc<TokenLedger>,
        reconciler: Arc<Reconciler>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            settings,
            detector,
            restarts,
            ledger,
            reconciler,
            event_bus,
            shutdown_tx,
        }
    }

    /// One liveness pass. Returns the workers cleaned up in this pass.
    pub async fn liveness_pass(&self) -> Result<Vec<WorkerRecord>, StoreError> {
        Self::sweep(&self.detector, self.settings.max_concurrent_cleanups).await
    }

    async fn sweep(
        detector: &ZombieDetector,
        max_concurrent: usize,
    ) -> Result<Vec<WorkerRecord>, StoreError> {
        let suspects = detector.scan().await?;
        if suspects.is_empty() {
            return Ok(Vec::new());
        }

        let cleaned = stream::iter(suspects)
            .map(|(worker, liveness)| async move {
                match detector.handle_suspect(&worker, liveness).await {
                    Ok(CleanupOutcome::Cleaned(record)) => Some(record),
                    Ok(CleanupOutcome::FalsePositive | CleanupOutcome::Deferred) => None,
                    Err(e) => {
                        warn!(worker_id = %worker.worker_id, error = %e, "Cleanup failed");
                        None
                    }
                }
            })
            .buffer_unordered(max_concurrent.max(1))
            .filter_map(|cleaned| async move { cleaned })
            .collect::<Vec<_>>()
            .await;
        Ok(cleaned)
    }

    /// One reclamation pass: force-return stale allocations, then compact.
    pub async fn reclaim_pass(&self) -> Result<ReclaimReport, LedgerError> {
        Self::reclaim(&self.ledger, &self.event_bus).await
    }

    async fn reclaim(ledger: &TokenLedger, bus: &EventBus) -> Result<ReclaimReport, LedgerError> {
        let report = ledger.reclaim_stale().await?;
        if !report.workers_cleaned.is_empty() {
            bus.publish(event_factory::tokens_reclaimed(&report)).await;
        }
        ledger.compact().await?;
        Ok(report)
    }

    /// Reconcile persisted state, then spawn the three loops.
    pub async fn start(&self) -> Result<(ReconcileReport, MonitorHandles), StoreError> {
        let report = self.reconciler.run().await?;
        if !report.is_clean() {
            info!(
                duplicates_removed = ?report.duplicates_removed,
                relocations_completed = ?report.relocations_completed,
                allocations_released = ?report.allocations_released,
                "Startup reconciliation repaired state"
            );
        }

        let (cleaned_tx, cleaned_rx) = mpsc::channel(self.settings.restart_channel_capacity);
        let handles = MonitorHandles {
            liveness: self.spawn_liveness(cleaned_tx),
            restart: self.spawn_restart(cleaned_rx),
            reclamation: self.spawn_reclamation(),
        };

        info!(
            check_interval_secs = self.settings.check_interval.as_secs(),
            reclaim_interval_secs = self.settings.reclaim_interval.as_secs(),
            max_concurrent_cleanups = self.settings.max_concurrent_cleanups,
            "Lifecycle monitor started"
        );
        Ok((report, handles))
    }

    /// Signal all loops to stop.
    pub fn shutdown(&self) {
        // No receivers just means nothing was started.
        let _ = self.shutdown_tx.send(());
    }

    fn spawn_liveness(&self, cleaned_tx: mpsc::Sender<WorkerRecord>) -> JoinHandle<()> {
        let detector = Arc::clone(&self.detector);
        let period = self.settings.check_interval;
        let max_concurrent = self.settings.max_concurrent_cleanups;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match Self::sweep(&detector, max_concurrent).await {
                            Ok(cleaned) => {
                                debug!(cleaned = cleaned.len(), "Liveness pass finished");
                                for record in cleaned {
                                    if cleaned_tx.send(record).await.is_err() {
                                        warn!("Restart loop gone, dropping cleaned worker");
                                    }
                                }
                            }
                            Err(e) => error!(error = %e, "Liveness scan failed"),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Liveness loop shutting down");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_restart(&self, mut cleaned_rx: mpsc::Receiver<WorkerRecord>) -> JoinHandle<()> {
        let restarts = Arc::clone(&self.restarts);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = cleaned_rx.recv() => {
                        let Some(worker) = received else {
                            debug!("Cleaned-worker channel closed");
                            break;
                        };
                        match restarts.on_worker_cleaned(&worker).await {
                            Ok(Some(entry)) => debug!(
                                worker_id = %worker.worker_id,
                                new_worker_id = %entry.new_worker_id,
                                "Replacement queued"
                            ),
                            Ok(None) => {}
                            Err(e) => error!(
                                worker_id = %worker.worker_id,
                                error = %e,
                                "Restart scheduling failed"
                            ),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Restart loop shutting down");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_reclamation(&self) -> JoinHandle<()> {
        let ledger = Arc::clone(&self.ledger);
        let bus = Arc::clone(&self.event_bus);
        let period = self.settings.reclaim_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = Self::reclaim(&ledger, &bus).await {
                            error!(error = %e, "Reclamation pass failed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Reclamation loop shutting down");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{
        FakeBehavior, FakeProcessTable, InMemoryBreakerStore, InMemoryEventStore,
        InMemoryLedgerStore, InMemoryRestartQueue, InMemoryWorkerStore, LeaseRegistry,
    };
    use crate::domain::models::{CircuitBreakerSettings, LifecycleEventType, WorkerStatus};
    use crate::domain::ports::{EventStore, NullArchiver, RestartQueue, WorkerStore};
    use crate::services::{
        CircuitBreakerConfig, CircuitBreakerService, DetectorSettings, LedgerSettings,
        RestartSettings, Terminator, TerminatorDeps,
    };
    use chrono::Utc;

    struct Harness {
        monitor: LifecycleMonitor,
        ledger: Arc<TokenLedger>,
        workers: Arc<InMemoryWorkerStore>,
        leases: Arc<LeaseRegistry>,
        processes: FakeProcessTable,
        queue: Arc<InMemoryRestartQueue>,
        events: Arc<InMemoryEventStore>,
    }

    async fn harness(ledger_settings: LedgerSettings) -> Harness {
        let workers = Arc::new(InMemoryWorkerStore::default());
        let leases = Arc::new(LeaseRegistry::default());
        let processes = FakeProcessTable::default();
        let queue = Arc::new(InMemoryRestartQueue::default());
        let events = Arc::new(InMemoryEventStore::default());
        let bus = Arc::new(EventBus::default().with_store(events.clone()));
        let ledger = Arc::new(
            TokenLedger::open(ledger_settings, Arc::new(InMemoryLedgerStore::default()))
                .await
                .unwrap(),
        );

        let detector_settings = DetectorSettings {
            zombie_threshold: chrono::Duration::seconds(300),
            verification_delay: Duration::from_millis(10),
            graceful_shutdown_timeout: Duration::from_millis(10),
            max_cleanups_per_minute: 5,
        };
        let terminator = Arc::new(Terminator::new(
            detector_settings.graceful_shutdown_timeout,
            TerminatorDeps {
                ledger: ledger.clone(),
                workers: workers.clone(),
                heartbeats: leases.clone(),
                processes: Arc::new(processes.clone()),
                archiver: Arc::new(NullArchiver),
                event_bus: bus.clone(),
            },
        ));
        let detector = Arc::new(ZombieDetector::new(
            detector_settings,
            workers.clone(),
            leases.clone(),
            terminator,
            bus.clone(),
        ));
        let breakers = Arc::new(
            CircuitBreakerService::load(
                CircuitBreakerConfig::from_settings(&CircuitBreakerSettings::default()),
                Arc::new(InMemoryBreakerStore::default()),
                bus.clone(),
            )
            .await
            .unwrap(),
        );
        let restarts = Arc::new(RestartPolicyEngine::new(
            RestartSettings::default(),
            breakers,
            ledger.clone(),
            queue.clone(),
            bus.clone(),
        ));
        let reconciler = Arc::new(Reconciler::new(ledger.clone(), workers.clone(), bus.clone()));

        let settings = MonitorSettings {
            check_interval: Duration::from_millis(20),
            reclaim_interval: Duration::from_millis(20),
            max_concurrent_cleanups: 4,
            restart_channel_capacity: 16,
        };
        Harness {
            monitor: LifecycleMonitor::new(
                settings,
                detector,
                restarts,
                ledger.clone(),
                reconciler,
                bus,
            ),
            ledger,
            workers,
            leases,
            processes,
            queue,
            events,
        }
    }

    async fn admit_stale(h: &Harness, id: &str, tokens: u64) {
        h.ledger.allocate(id, tokens).await.unwrap();
        h.ledger.start_using(id).await.unwrap();
        let mut worker = WorkerRecord::new(id, "task-1", "scan", "coordinator", tokens);
        worker.status = WorkerStatus::Active;
        worker.created_at = Utc::now() - chrono::Duration::seconds(400);
        h.workers.insert_active(&worker).await.unwrap();
    }

    #[tokio::test]
    async fn test_liveness_pass_cleans_only_silent_workers() {
        let h = harness(LedgerSettings::default()).await;
        admit_stale(&h, "w-silent", 400).await;
        admit_stale(&h, "w-alive", 300).await;
        h.leases.renew("w-alive").await;
        h.processes
            .spawn("w-silent", 4242, FakeBehavior::ExitOnTerm)
            .await;

        let before = h.ledger.available();
        let cleaned = h.monitor.liveness_pass().await.unwrap();

        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned[0].worker_id, "w-silent");
        assert_eq!(cleaned[0].status, WorkerStatus::Zombie);
        assert_eq!(h.ledger.available(), before + 400);
        assert!(!h.processes.is_running(4242).await);
        assert!(h.workers.get_active("w-silent").await.unwrap().is_none());
        assert!(h.workers.get_active("w-alive").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reclaim_pass_emits_event_only_when_reclaiming() {
        let h = harness(LedgerSettings {
            stale_timeout: chrono::Duration::zero(),
            ..LedgerSettings::default()
        })
        .await;

        let empty = h.monitor.reclaim_pass().await.unwrap();
        assert!(empty.workers_cleaned.is_empty());

        h.ledger.allocate("w-1", 500).await.unwrap();
        let report = h.monitor.reclaim_pass().await.unwrap();
        assert_eq!(report.tokens_reclaimed, 500);
        assert_eq!(report.workers_cleaned, vec!["w-1".to_string()]);
        assert_eq!(h.ledger.available(), h.ledger.summary().total_budget);

        let reclaimed = h
            .events
            .recent(50)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.event_type == LifecycleEventType::TokensReclaimed)
            .count();
        assert_eq!(reclaimed, 1);
    }

    #[tokio::test]
    async fn test_running_monitor_cleans_and_queues_restart() {
        let h = harness(LedgerSettings::default()).await;
        admit_stale(&h, "w-1", 400).await;

        let (report, handles) = h.monitor.start().await.unwrap();
        assert!(report.is_clean());

        let mut queued = Vec::new();
        for _ in 0..100 {
            queued = h.queue.list().await.unwrap();
            if !queued.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        h.monitor.shutdown();
        handles.join().await;

        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].new_worker_id, "w-1-r1");
        assert_eq!(queued[0].original_worker_id, "w-1");
        assert_eq!(queued[0].attempt, 1);
        assert!(h.workers.find_zombie("w-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_loops() {
        let h = harness(LedgerSettings::default()).await;
        let (_, handles) = h.monitor.start().await.unwrap();
        h.monitor.shutdown();
        tokio::time::timeout(Duration::from_secs(2), handles.join())
            .await
            .unwrap();
    }
}
