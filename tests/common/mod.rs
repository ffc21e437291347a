//! Shared fixtures for integration tests.
#![allow(dead_code)]

use chrono::{Duration, Utc};
use std::sync::Arc;
use tempfile::TempDir;

use warden::adapters::memory::{
    FakeProcessTable, InMemoryBreakerStore, InMemoryEventStore, InMemoryLedgerStore,
    InMemoryRestartQueue, InMemoryWorkerStore, LeaseRegistry,
};
use warden::domain::models::{
    CircuitBreakerSettings, Config, LifecycleEventType, WorkerRecord, WorkerStatus,
};
use warden::domain::ports::{EventStore, NullArchiver, WorkerStore};
use warden::services::{
    CircuitBreakerConfig, CircuitBreakerService, DetectorSettings, EventBus, LedgerSettings,
    RestartPolicyEngine, RestartSettings, Terminator, TerminatorDeps, TokenLedger,
    ZombieDetector,
};

/// Setup test logging
#[allow(dead_code)]
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub async fn memory_ledger(total_budget: u64) -> Arc<TokenLedger> {
    let settings = LedgerSettings {
        total_budget,
        ..LedgerSettings::default()
    };
    Arc::new(
        TokenLedger::open(settings, Arc::new(InMemoryLedgerStore::default()))
            .await
            .expect("ledger opens"),
    )
}

/// Detector settings with a short debounce.
pub fn fast_detector_settings() -> DetectorSettings {
    DetectorSettings {
        zombie_threshold: Duration::seconds(300),
        verification_delay: std::time::Duration::from_millis(20),
        graceful_shutdown_timeout: std::time::Duration::from_millis(20),
        max_cleanups_per_minute: 5,
    }
}

/// Every service wired against in-memory adapters.
pub struct MemoryStack {
    pub ledger: Arc<TokenLedger>,
    pub workers: Arc<InMemoryWorkerStore>,
    pub leases: Arc<LeaseRegistry>,
    pub processes: FakeProcessTable,
    pub queue: Arc<InMemoryRestartQueue>,
    pub events: Arc<InMemoryEventStore>,
    pub bus: Arc<EventBus>,
    pub breakers: Arc<CircuitBreakerService>,
    pub restarts: Arc<RestartPolicyEngine>,
    pub detector: Arc<ZombieDetector>,
}

impl MemoryStack {
    pub async fn new(
        total_budget: u64,
        detector: DetectorSettings,
        restart: RestartSettings,
        breaker: CircuitBreakerSettings,
    ) -> Self {
        let ledger = memory_ledger(total_budget).await;
        let workers = Arc::new(InMemoryWorkerStore::default());
        let leases = Arc::new(LeaseRegistry::default());
        let processes = FakeProcessTable::default();
        let queue = Arc::new(InMemoryRestartQueue::default());
        let events = Arc::new(InMemoryEventStore::default());
        let bus = Arc::new(EventBus::default().with_store(events.clone()));

        let breakers = Arc::new(
            CircuitBreakerService::load(
                CircuitBreakerConfig::from_settings(&breaker),
                Arc::new(InMemoryBreakerStore::default()),
                bus.clone(),
            )
            .await
            .expect("breakers load"),
        );
        let restarts = Arc::new(RestartPolicyEngine::new(
            restart,
            breakers.clone(),
            ledger.clone(),
            queue.clone(),
            bus.clone(),
        ));
        let terminator = Arc::new(Terminator::new(
            detector.graceful_shutdown_timeout,
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
            detector,
            workers.clone(),
            leases.clone(),
            terminator,
            bus.clone(),
        ));

        Self {
            ledger,
            workers,
            leases,
            processes,
            queue,
            events,
            bus,
            breakers,
            restarts,
            detector,
        }
    }

    pub async fn with_defaults(total_budget: u64) -> Self {
        Self::new(
            total_budget,
            fast_detector_settings(),
            RestartSettings::default(),
            CircuitBreakerSettings::default(),
        )
        .await
    }

    /// Allocate, start using and register an active worker whose last
    /// heartbeat was `silence_secs` ago.
    pub async fn active_worker(
        &self,
        worker_id: &str,
        worker_type: &str,
        tokens: u64,
        silence_secs: i64,
    ) -> WorkerRecord {
        self.ledger.allocate(worker_id, tokens).await.expect("allocate");
        self.ledger.start_using(worker_id).await.expect("start");

        let mut worker = WorkerRecord::new(worker_id, "task-1", worker_type, "scheduler", tokens);
        worker.status = WorkerStatus::Active;
        worker.created_at = Utc::now() - Duration::seconds(silence_secs + 60);
        self.workers.insert_active(&worker).await.expect("insert");
        self.leases
            .renew_at(worker_id, Utc::now() - Duration::seconds(silence_secs))
            .await;
        worker
    }

    pub async fn event_types(&self) -> Vec<LifecycleEventType> {
        self.events
            .recent(1000)
            .await
            .expect("events")
            .into_iter()
            .map(|e| e.event_type)
            .collect()
    }
}

/// A cleaned-up worker record ready for restart evaluation.
pub fn zombie(worker_id: &str, worker_type: &str, tokens: u64, restart_attempt: u32) -> WorkerRecord {
    let mut worker = WorkerRecord::new(worker_id, "task-1", worker_type, "scheduler", tokens)
        .with_restart_attempt(restart_attempt);
    worker.mark_zombie("no heartbeat for 400s", Utc::now());
    worker
}

/// Config rooted in a temporary directory.
pub fn temp_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    let root = dir.path();
    config.storage.state_dir = root.join("state").display().to_string();
    config.storage.log_dir = root.join("logs").display().to_string();
    config.storage.archive_dir = root.join("archive").display().to_string();
    config.storage.pid_dir = root.join("pids").display().to_string();
    config.ledger.total_budget = 1_000;
    config.detector.verification_delay_seconds = 0;
    config.detector.graceful_shutdown_timeout_seconds = 1;
    config
}
