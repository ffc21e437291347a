//! Four-phase worker termination pipeline.
//!
//! 1. terminate the worker and its heartbeat companion
//! 2. return unused tokens to the ledger
//! 3. archive logs and process metadata
//! 4. transition the record to zombie and relocate it
//!
//! Only phases 1 and 4 can fail the pipeline. A failure in phase 1 leaves
//! everything untouched for the next scan; phases 2 and 3 log and move on.
//! Phases are not atomic as a unit, so every phase is safe to re-run and
//! [`super::reconciler::Reconciler`] repairs interrupted runs at startup.

use chrono::Utc;
use futures::future::try_join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::domain::errors::{CleanupError, LedgerError, ProcessError};
use crate::domain::models::{ReleaseOutcome, WorkerRecord, WorkerStatus};
use crate::domain::ports::{HeartbeatRegistry, LogArchiver, ProcessHandle, ProcessLocator, WorkerStore};
use super::event_bus::EventBus;
use super::event_factory;
use super::token_ledger::TokenLedger;

/// How long to wait for a process to disappear after a forced kill.
pub const KILL_CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);

/// Collaborators of the pipeline.
pub struct TerminatorDeps {
    pub ledger: Arc<TokenLedger>,
    pub workers: Arc<dyn WorkerStore>,
    pub heartbeats: Arc<dyn HeartbeatRegistry>,
    pub processes: Arc<dyn ProcessLocator>,
    pub archiver: Arc<dyn LogArchiver>,
    pub event_bus: Arc<EventBus>,
}

/// Runs the termination pipeline for one worker at a time; distinct
/// workers may be cleaned concurrently.
pub struct Terminator {
    graceful_timeout: Duration,
    deps: TerminatorDeps,
}

impl Terminator {
    pub const fn new(graceful_timeout: Duration, deps: TerminatorDeps) -> Self {
        Self {
            graceful_timeout,
            deps,
        }
    }

    /// Run all four phases for `worker`, returning the relocated record.
    pub async fn cleanup(
        &self,
        worker: &WorkerRecord,
        reason: &str,
    ) -> Result<WorkerRecord, CleanupError> {
        let started = Instant::now();
        let worker_id = worker.worker_id.as_str();
        info!(worker_id, worker_type = %worker.worker_type, reason, "Starting cleanup");

        if let Err(e) = self.terminate_processes(worker_id).await {
            error!(worker_id, phase = "terminate", error = %e, "Cleanup aborted");
            self.deps
                .event_bus
                .publish(event_factory::cleanup_failed(worker_id, &e.to_string()))
                .await;
            return Err(e);
        }

        self.return_tokens(worker).await;
        self.archive_logs(worker).await;

        let record = match self.transition_state(worker, reason).await {
            Ok(record) => record,
            Err(e) => {
                error!(worker_id, phase = "transition", error = %e, "Cleanup failed");
                self.deps
                    .event_bus
                    .publish(event_factory::cleanup_failed(worker_id, &e.to_string()))
                    .await;
                return Err(e);
            }
        };

        if let Err(e) = self.deps.heartbeats.forget(worker_id).await {
            debug!(worker_id, error = %e, "Failed to drop heartbeat state");
        }

        let elapsed = started.elapsed();
        info!(worker_id, duration_ms = elapsed.as_millis(), "Cleanup completed");
        self.deps
            .event_bus
            .publish(event_factory::cleanup_completed(worker_id, elapsed.as_millis()))
            .await;
        Ok(record)
    }

    /// Phase 1. Missing processes count as already terminated.
    pub async fn terminate_processes(&self, worker_id: &str) -> Result<(), CleanupError> {
        let to_cleanup_error = |source: ProcessError| CleanupError::ProcessTermination {
            worker_id: worker_id.to_string(),
            source,
        };

        let processes = self
            .deps
            .processes
            .locate(worker_id)
            .await
            .map_err(to_cleanup_error)?;
        if processes.is_empty() {
            debug!(worker_id, phase = "terminate", "No process found, treating as terminated");
            self.deps
                .event_bus
                .publish(event_factory::process_already_terminated(worker_id))
                .await;
            return Ok(());
        }

        let handles: Vec<&dyn ProcessHandle> = [&processes.main, &processes.heartbeat]
            .into_iter()
            .filter_map(|h| h.as_deref())
            .collect();
        let pids: Vec<i32> = handles.iter().map(|h| h.pid()).collect();

        let forced = try_join_all(
            handles
                .into_iter()
                .map(|h| stop_process(h, self.graceful_timeout)),
        )
        .await
        .map_err(to_cleanup_error)?
        .into_iter()
        .any(|forced| forced);

        info!(worker_id, phase = "terminate", ?pids, forced, "Processes terminated");
        self.deps
            .event_bus
            .publish(event_factory::process_terminated(worker_id, forced, &pids))
            .await;
        Ok(())
    }

    /// Phase 2. The held/remaining check happens on the freshly loaded
    /// ledger, so allocations made by other processes are returned too.
    pub async fn return_tokens(&self, worker: &WorkerRecord) {
        let worker_id = worker.worker_id.as_str();
        let used = worker.tokens_used();

        let skipped = match self.deps.ledger.release_unused(worker_id, used).await {
            Ok(ReleaseOutcome::Released { tokens }) => {
                info!(worker_id, phase = "tokens", tokens, used, "Tokens returned");
                self.deps
                    .event_bus
                    .publish(event_factory::tokens_returned(worker_id, tokens, used))
                    .await;
                return;
            }
            Ok(ReleaseOutcome::FullyUsed) => "fully_used",
            Ok(ReleaseOutcome::AlreadyReleased) => "already_released",
            Ok(ReleaseOutcome::AlreadyReclaimed) => "already_reclaimed",
            Err(LedgerError::AllocationNotFound(_)) => "no_allocation",
            Err(e) => {
                warn!(worker_id, phase = "tokens", error = %e, "Failed to return tokens");
                "ledger_error"
            }
        };

        debug!(worker_id, phase = "tokens", used, reason = skipped, "Nothing to return");
        self.deps
            .event_bus
            .publish(event_factory::tokens_skipped(worker_id, used, skipped))
            .await;
    }

    /// Phase 3. Best effort.
    pub async fn archive_logs(&self, worker: &WorkerRecord) {
        let worker_id = worker.worker_id.as_str();
        match self.deps.archiver.archive(worker, Utc::now()).await {
            Ok(report) => {
                info!(
                    worker_id,
                    phase = "archive",
                    location = %report.location,
                    files = report.files_archived,
                    "Logs archived"
                );
                self.deps
                    .event_bus
                    .publish(event_factory::logs_archived(
                        worker_id,
                        &report.location,
                        report.files_archived,
                    ))
                    .await;
            }
            Err(e) => {
                warn!(worker_id, phase = "archive", error = %e, "Archival failed");
            }
        }
    }

    /// Phase 4. Idempotent.
    pub async fn transition_state(
        &self,
        worker: &WorkerRecord,
        reason: &str,
    ) -> Result<WorkerRecord, CleanupError> {
        let record = self
            .deps
            .workers
            .transition_to_zombie(&worker.worker_id, reason, Utc::now())
            .await
            .map_err(|source| CleanupError::StateTransition {
                worker_id: worker.worker_id.clone(),
                source,
            })?;

        info!(worker_id = %worker.worker_id, phase = "transition", "Worker moved to zombie store");
        self.deps
            .event_bus
            .publish(event_factory::state_transitioned(
                &worker.worker_id,
                worker.status.as_str(),
                WorkerStatus::Zombie.as_str(),
            ))
            .await;
        Ok(record)
    }
}

/// Graceful stop, then forced kill after `grace`. Returns whether the kill
/// was needed.
async fn stop_process(handle: &dyn ProcessHandle, grace: Duration) -> Result<bool, ProcessError> {
    let pid = handle.pid();
    handle.signal_graceful().await?;
    if handle.wait_with_timeout(grace).await? {
        debug!(pid, "Process exited gracefully");
        return Ok(false);
    }

    warn!(pid, "Process ignored graceful stop, forcing kill");
    handle.kill().await?;
    if handle.wait_with_timeout(KILL_CONFIRM_TIMEOUT).await? {
        Ok(true)
    } else {
        Err(ProcessError::Unkillable { pid })
    }
}
