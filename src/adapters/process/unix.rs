//! Unix process control via pid files and signals.
//!
//! Workers write `<pid_dir>/<worker_id>.pid`; their heartbeat companion
//! writes `<pid_dir>/<worker_id>.heartbeat.pid`. A missing or unparsable
//! pid file means there is nothing to stop.

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::errors::ProcessError;
use crate::domain::ports::{ProcessHandle, ProcessLocator, WorkerProcesses};

/// Interval between liveness checks while waiting for exit.
pub const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A process addressed by pid.
#[derive(Debug, Clone, Copy)]
pub struct UnixProcess {
    pid: Pid,
}

impl UnixProcess {
    pub const fn new(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    /// Signal-0 liveness check. `EPERM` means the process exists but belongs to
    /// someone else.
    pub fn is_running(&self) -> bool {
        match kill(self.pid, None) {
            Ok(()) | Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    fn send(&self, signal: Signal) -> Result<(), ProcessError> {
        match kill(self.pid, signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(ProcessError::Signal {
                pid: self.pid.as_raw(),
                message: format!("{signal}: {errno}"),
            }),
        }
    }
}

#[async_trait]
impl ProcessHandle for UnixProcess {
    fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    async fn signal_graceful(&self) -> Result<(), ProcessError> {
        self.send(Signal::SIGTERM)
    }

    async fn wait_with_timeout(&self, timeout: Duration) -> Result<bool, ProcessError> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_running() {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn kill(&self) -> Result<(), ProcessError> {
        self.send(Signal::SIGKILL)
    }
}

/// Resolves worker processes from pid files.
#[derive(Debug, Clone)]
pub struct PidFileLocator {
    pid_dir: PathBuf,
}

impl PidFileLocator {
    pub fn new(pid_dir: impl Into<PathBuf>) -> Self {
        Self {
            pid_dir: pid_dir.into(),
        }
    }

    async fn read_pid(path: &Path) -> Result<Option<i32>, ProcessError> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ProcessError::Lookup(format!("{}: {e}", path.display()))),
        };
        match contents.trim().parse::<i32>() {
            Ok(pid) if pid > 0 => Ok(Some(pid)),
            _ => {
                warn!(path = %path.display(), "Ignoring unparsable pid file");
                Ok(None)
            }
        }
    }

    async fn handle(path: &Path) -> Result<Option<Box<dyn ProcessHandle>>, ProcessError> {
        let Some(pid) = Self::read_pid(path).await? else {
            return Ok(None);
        };
        let process = UnixProcess::new(pid);
        if !process.is_running() {
            debug!(pid, "Process from pid file already exited");
            return Ok(None);
        }
        Ok(Some(Box::new(process)))
    }
}

#[async_trait]
impl ProcessLocator for PidFileLocator {
    async fn locate(&self, worker_id: &str) -> Result<WorkerProcesses, ProcessError> {
        if worker_id.contains(['/', '\\']) || worker_id.starts_with('.') {
            return Err(ProcessError::Lookup(format!("invalid worker id {worker_id}")));
        }
        Ok(WorkerProcesses {
            main: Self::handle(&self.pid_dir.join(format!("{worker_id}.pid"))).await?,
            heartbeat: Self::handle(&self.pid_dir.join(format!("{worker_id}.heartbeat.pid"))).await?,
        })
    }
}
