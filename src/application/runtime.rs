//! Wiring of the filesystem-backed runtime used by the CLI.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::adapters::fs::{
    FileHeartbeatRegistry, FsBreakerStore, FsEventLog, FsLedgerStore, FsLogArchiver,
    FsRestartQueue, FsWorkerStore, StateLayout,
};
use crate::adapters::process::PidFileLocator;
use crate::domain::models::Config;
use crate::domain::ports::{RestartQueue, WorkerStore};
use crate::services::{
    CircuitBreakerConfig, CircuitBreakerService, DetectorSettings, EventBus, EventBusConfig,
    LedgerSettings, Reconciler, RestartPolicyEngine, RestartSettings, Terminator, TerminatorDeps,
    TokenLedger, ZombieDetector,
};

use super::admission::AdmissionController;
use super::lifecycle_monitor::{LifecycleMonitor, MonitorSettings};

/// Every service wired against the state directory.
pub struct WardenRuntime {
    pub config: Config,
    pub layout: StateLayout,
    pub event_bus: Arc<EventBus>,
    pub ledger: Arc<TokenLedger>,
    pub workers: Arc<dyn WorkerStore>,
    pub heartbeats: Arc<FileHeartbeatRegistry>,
    pub breakers: Arc<CircuitBreakerService>,
    pub restart_queue: Arc<dyn RestartQueue>,
    pub restarts: Arc<RestartPolicyEngine>,
    pub detector: Arc<ZombieDetector>,
    pub reconciler: Arc<Reconciler>,
    pub admission: AdmissionController,
}

impl WardenRuntime {
    /// Open (or initialize) persisted state and build all services.
    pub async fn from_config(config: Config) -> Result<Self> {
        let layout = StateLayout::new(PathBuf::from(&config.storage.state_dir));
        tokio::fs::create_dir_all(layout.root())
            .await
            .with_context(|| format!("Failed to create state dir {}", layout.root().display()))?;

        let event_log = Arc::new(FsEventLog::new(&layout));
        let next_sequence = event_log
            .next_sequence()
            .await
            .context("Failed to read event log")?;
        debug!(next_sequence, "Resuming event stream");
        let event_bus = Arc::new(
            EventBus::new(EventBusConfig::default())
                .with_store(event_log)
                .starting_at(next_sequence),
        );

        let ledger = Arc::new(
            TokenLedger::open(
                LedgerSettings::from_config(&config.ledger),
                Arc::new(FsLedgerStore::new(&layout)),
            )
            .await
            .context("Failed to open token ledger")?,
        );

        let workers: Arc<dyn WorkerStore> = Arc::new(FsWorkerStore::new(&layout));
        let heartbeats = Arc::new(FileHeartbeatRegistry::new(&layout));
        let restart_queue: Arc<dyn RestartQueue> = Arc::new(FsRestartQueue::new(&layout));

        let breakers = Arc::new(
            CircuitBreakerService::load(
                CircuitBreakerConfig::from_settings(&config.restart.circuit_breaker),
                Arc::new(FsBreakerStore::new(&layout)),
                event_bus.clone(),
            )
            .await
            .context("Failed to load circuit breakers")?,
        );

        let restarts = Arc::new(RestartPolicyEngine::new(
            RestartSettings::from_config(&config.restart),
            breakers.clone(),
            ledger.clone(),
            restart_queue.clone(),
            event_bus.clone(),
        ));

        let detector_settings = DetectorSettings::from_config(&config.detector);
        let terminator = Arc::new(Terminator::new(
            detector_settings.graceful_shutdown_timeout,
            TerminatorDeps {
                ledger: ledger.clone(),
                workers: workers.clone(),
                heartbeats: heartbeats.clone(),
                processes: Arc::new(PidFileLocator::new(&config.storage.pid_dir)),
                archiver: Arc::new(FsLogArchiver::new(
                    &config.storage.log_dir,
                    &config.storage.pid_dir,
                    &config.storage.archive_dir,
                )),
                event_bus: event_bus.clone(),
            },
        ));
        let detector = Arc::new(ZombieDetector::new(
            detector_settings,
            workers.clone(),
            heartbeats.clone(),
            terminator,
            event_bus.clone(),
        ));

        let reconciler = Arc::new(Reconciler::new(
            ledger.clone(),
            workers.clone(),
            event_bus.clone(),
        ));
        let admission = AdmissionController::new(ledger.clone(), workers.clone(), event_bus.clone());

        Ok(Self {
            config,
            layout,
            event_bus,
            ledger,
            workers,
            heartbeats,
            breakers,
            restart_queue,
            restarts,
            detector,
            reconciler,
            admission,
        })
    }

    /// Monitor driving this runtime's services.
    pub fn monitor(&self) -> LifecycleMonitor {
        LifecycleMonitor::new(
            MonitorSettings::from_config(&self.config),
            self.detector.clone(),
            self.restarts.clone(),
            self.ledger.clone(),
            self.reconciler.clone(),
            self.event_bus.clone(),
        )
    }
}
