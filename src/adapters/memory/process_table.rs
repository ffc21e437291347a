//! Simulated process table.
//!
//! Stands in for the OS when exercising the termination pipeline. Each
//! simulated process reacts to signals according to its [`FakeBehavior`];
//! waits resolve immediately against the current state.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::domain::errors::ProcessError;
use crate::domain::ports::{ProcessHandle, ProcessLocator, WorkerProcesses};

/// How a simulated process reacts to signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeBehavior {
    /// Exits on the graceful stop.
    ExitOnTerm,
    /// Ignores the graceful stop, dies on kill.
    IgnoreTerm,
    /// Survives everything.
    Unkillable,
    /// Signalling fails outright, e.g. permission denied.
    SignalFails,
}

#[derive(Debug)]
struct FakeProcess {
    behavior: FakeBehavior,
    running: bool,
}

#[derive(Debug, Default)]
struct Table {
    processes: HashMap<i32, FakeProcess>,
    workers: HashMap<String, (Option<i32>, Option<i32>)>,
}

/// Simulated processes keyed by pid, with a worker id index.
#[derive(Debug, Default, Clone)]
pub struct FakeProcessTable {
    table: Arc<Mutex<Table>>,
}

impl FakeProcessTable {
    /// Register the main process of `worker_id`.
    pub async fn spawn(&self, worker_id: &str, pid: i32, behavior: FakeBehavior) {
        let mut table = self.table.lock().await;
        table.processes.insert(pid, FakeProcess { behavior, running: true });
        table.workers.entry(worker_id.to_string()).or_default().0 = Some(pid);
    }

    /// Register the heartbeat companion of `worker_id`.
    pub async fn spawn_heartbeat(&self, worker_id: &str, pid: i32, behavior: FakeBehavior) {
        let mut table = self.table.lock().await;
        table.processes.insert(pid, FakeProcess { behavior, running: true });
        table.workers.entry(worker_id.to_string()).or_default().1 = Some(pid);
    }

    pub async fn is_running(&self, pid: i32) -> bool {
        self.table
            .lock()
            .await
            .processes
            .get(&pid)
            .is_some_and(|p| p.running)
    }

    fn handle(&self, pid: Option<i32>, table: &Table) -> Option<Box<dyn ProcessHandle>> {
        let pid = pid.filter(|pid| table.processes.get(pid).is_some_and(|p| p.running))?;
        Some(Box::new(FakeHandle {
            pid,
            table: Arc::clone(&self.table),
        }))
    }
}

#[async_trait]
impl ProcessLocator for FakeProcessTable {
    async fn locate(&self, worker_id: &str) -> Result<WorkerProcesses, ProcessError> {
        let table = self.table.lock().await;
        let Some(&(main, heartbeat)) = table.workers.get(worker_id) else {
            return Ok(WorkerProcesses::default());
        };
        Ok(WorkerProcesses {
            main: self.handle(main, &table),
            heartbeat: self.handle(heartbeat, &table),
        })
    }
}

struct FakeHandle {
    pid: i32,
    table: Arc<Mutex<Table>>,
}

impl FakeHandle {
    async fn deliver(&self, forced: bool) -> Result<(), ProcessError> {
        let mut table = self.table.lock().await;
        let Some(process) = table.processes.get_mut(&self.pid) else {
            return Ok(());
        };
        match (process.behavior, forced) {
            (FakeBehavior::SignalFails, _) => Err(ProcessError::Signal {
                pid: self.pid,
                message: "operation not permitted".to_string(),
            }),
            (FakeBehavior::ExitOnTerm, _) | (FakeBehavior::IgnoreTerm, true) => {
                process.running = false;
                Ok(())
            }
            (FakeBehavior::IgnoreTerm, false) | (FakeBehavior::Unkillable, _) => Ok(()),
        }
    }
}

#[async_trait]
impl ProcessHandle for FakeHandle {
    fn pid(&self) -> i32 {
        self.pid
    }

    async fn signal_graceful(&self) -> Result<(), ProcessError> {
        self.deliver(false).await
    }

    async fn wait_with_timeout(&self, _timeout: Duration) -> Result<bool, ProcessError> {
        let table = self.table.lock().await;
        Ok(!table.processes.get(&self.pid).is_some_and(|p| p.running))
    }

    async fn kill(&self) -> Result<(), ProcessError> {
        self.deliver(true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exited_processes_are_not_located() {
        let table = FakeProcessTable::default();
        table.spawn("w-1", 1, FakeBehavior::ExitOnTerm).await;

        let found = table.locate("w-1").await.unwrap();
        let main = found.main.unwrap();
        main.signal_graceful().await.unwrap();
        assert!(main.wait_with_timeout(Duration::ZERO).await.unwrap());

        assert!(table.locate("w-1").await.unwrap().is_empty());
        assert!(table.locate("unknown").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ignore_term_needs_kill() {
        let table = FakeProcessTable::default();
        table.spawn("w-1", 2, FakeBehavior::IgnoreTerm).await;
        let main = table.locate("w-1").await.unwrap().main.unwrap();

        main.signal_graceful().await.unwrap();
        assert!(!main.wait_with_timeout(Duration::ZERO).await.unwrap());
        main.kill().await.unwrap();
        assert!(!table.is_running(2).await);
    }
}
