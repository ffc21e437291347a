//! Port trait definitions (Hexagonal Architecture)
//!
//! Async trait interfaces the adapters implement:
//! - LedgerStore / WorkerStore / BreakerStore / RestartQueue: persisted state
//! - EventStore: append-only lifecycle event stream
//! - HeartbeatRegistry: liveness pulses per worker
//! - ProcessLocator / ProcessHandle: worker process control
//! - LogArchiver: best-effort archival of a worker's logs

pub mod archiver;
pub mod breaker_store;
pub mod event_store;
pub mod heartbeat;
pub mod ledger_store;
pub mod null_archiver;
pub mod process;
pub mod restart_queue;
pub mod worker_store;

pub use archiver::{ArchiveReport, LogArchiver};
pub use breaker_store::BreakerStore;
pub use event_store::EventStore;
pub use heartbeat::HeartbeatRegistry;
pub use ledger_store::{LedgerLockGuard, LedgerStore};
pub use null_archiver::NullArchiver;
pub use process::{ProcessHandle, ProcessLocator, WorkerProcesses};
pub use restart_queue::RestartQueue;
pub use worker_store::WorkerStore;
