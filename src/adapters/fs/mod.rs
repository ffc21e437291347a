//! Filesystem adapters.
//!
//! Every record is a JSON document written atomically (temp file, then
//! rename) under one state directory:
//!
//! ```text
//! <state_dir>/
//!   ledger.json
//!   ledger.json.lock
//!   circuit_breakers.json
//!   events.jsonl
//!   heartbeats/<worker_id>
//!   restart_queue/<new_worker_id>.json
//!   workers/active/<worker_id>.json
//!   workers/zombie/<YYYY-MM-DD>/<worker_id>.json
//! ```

pub mod archive;
pub mod breaker_store;
pub mod event_log;
pub mod heartbeat;
pub mod json;
pub mod ledger_store;
pub mod restart_queue;
pub mod worker_store;

pub use archive::FsLogArchiver;
pub use breaker_store::FsBreakerStore;
pub use event_log::FsEventLog;
pub use heartbeat::FileHeartbeatRegistry;
pub use ledger_store::FsLedgerStore;
pub use restart_queue::FsRestartQueue;
pub use worker_store::FsWorkerStore;

use std::path::{Path, PathBuf};

/// Paths inside the state directory.
#[derive(Debug, Clone)]
pub struct StateLayout {
    root: PathBuf,
}

impl StateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ledger(&self) -> PathBuf {
        self.root.join("ledger.json")
    }

    /// Advisory lock file guarding read-modify-write of `ledger.json`.
    pub fn ledger_lock(&self) -> PathBuf {
        self.root.join("ledger.json.lock")
    }

    pub fn circuit_breakers(&self) -> PathBuf {
        self.root.join("circuit_breakers.json")
    }

    pub fn events(&self) -> PathBuf {
        self.root.join("events.jsonl")
    }

    pub fn heartbeats(&self) -> PathBuf {
        self.root.join("heartbeats")
    }

    pub fn restart_queue(&self) -> PathBuf {
        self.root.join("restart_queue")
    }

    pub fn active_workers(&self) -> PathBuf {
        self.root.join("workers").join("active")
    }

    pub fn zombie_workers(&self) -> PathBuf {
        self.root.join("workers").join("zombie")
    }
}
