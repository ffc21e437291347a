pub mod circuit;
pub mod config;
pub mod event;
pub mod ledger;
pub mod restart;
pub mod worker;

pub use circuit::{BreakerCheck, CircuitBreakerState, CircuitState};
pub use config::{
    BackoffConfig, CircuitBreakerSettings, Config, DetectorConfig, LedgerConfig, LoggingConfig,
    RestartConfig, RestartRateLimits, StorageConfig, DEFAULT_RETRY_KEY,
};
pub use event::{LifecycleEvent, LifecycleEventType};
pub use ledger::{
    Allocation, AllocationStatus, LedgerRecord, LedgerSummary, ReclaimReport, ReclamationEntry,
    ReleaseOutcome,
};
pub use restart::{RestartEntryStatus, RestartQueueEntry};
pub use worker::{CleanupInfo, RestartInfo, WorkerRecord, WorkerResources, WorkerStatus};
