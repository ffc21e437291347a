//! Process control port.
//!
//! Workers are supervised through handles rather than raw pids so the
//! termination pipeline can be exercised without real processes.

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::errors::ProcessError;

/// A running (or possibly already exited) OS process.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Process identifier, for logging.
    fn pid(&self) -> i32;

    /// Request voluntary termination. Succeeds if the process is already gone.
    async fn signal_graceful(&self) -> Result<(), ProcessError>;

    /// Wait up to `timeout` for the process to exit. Returns `true` once it
    /// has exited, `false` if it is still running when the timeout expires.
    async fn wait_with_timeout(&self, timeout: Duration) -> Result<bool, ProcessError>;

    /// Force termination.
    async fn kill(&self) -> Result<(), ProcessError>;
}

/// Processes belonging to one worker.
#[derive(Default)]
pub struct WorkerProcesses {
    /// The worker itself.
    pub main: Option<Box<dyn ProcessHandle>>,
    /// Companion process emitting the worker's heartbeats.
    pub heartbeat: Option<Box<dyn ProcessHandle>>,
}

impl WorkerProcesses {
    pub fn is_empty(&self) -> bool {
        self.main.is_none() && self.heartbeat.is_none()
    }
}

/// Resolves a worker id to its process handles.
#[async_trait]
pub trait ProcessLocator: Send + Sync {
    /// Missing handles mean the process is already gone, which is not an error.
    async fn locate(&self, worker_id: &str) -> Result<WorkerProcesses, ProcessError>;
}
