//! Admission control: a worker only exists once its tokens are reserved.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::domain::errors::AdmissionError;
use crate::domain::models::{RestartQueueEntry, WorkerRecord, WorkerStatus};
use crate::domain::ports::WorkerStore;
use crate::services::{event_factory, EventBus, TokenLedger};

/// A request to admit one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionRequest {
    pub worker_id: String,
    pub task_id: String,
    pub worker_type: String,
    pub owner: String,
    pub tokens: u64,
    #[serde(default)]
    pub restart_attempt: u32,
}

impl AdmissionRequest {
    pub fn new(
        worker_id: impl Into<String>,
        task_id: impl Into<String>,
        worker_type: impl Into<String>,
        owner: impl Into<String>,
        tokens: u64,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            task_id: task_id.into(),
            worker_type: worker_type.into(),
            owner: owner.into(),
            tokens,
            restart_attempt: 0,
        }
    }

    /// Admit the replacement described by a restart queue entry.
    pub fn from_restart(entry: &RestartQueueEntry, tokens: u64) -> Self {
        Self {
            worker_id: entry.new_worker_id.clone(),
            task_id: entry.task_id.clone(),
            worker_type: entry.worker_type.clone(),
            owner: entry.owner.clone(),
            tokens,
            restart_attempt: entry.attempt,
        }
    }

    fn into_record(self) -> WorkerRecord {
        WorkerRecord::new(
            self.worker_id,
            self.task_id,
            self.worker_type,
            self.owner,
            self.tokens,
        )
        .with_restart_attempt(self.restart_attempt)
    }
}

/// Reserves budget and registers workers.
pub struct AdmissionController {
    ledger: Arc<TokenLedger>,
    workers: Arc<dyn WorkerStore>,
    event_bus: Arc<EventBus>,
}

impl AdmissionController {
    pub const fn new(
        ledger: Arc<TokenLedger>,
        workers: Arc<dyn WorkerStore>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            ledger,
            workers,
            event_bus,
        }
    }

    /// Allocate tokens, then register the worker as pending.
    ///
    /// If the record cannot be written the allocation is released again so
    /// no tokens leak.
    #[instrument(skip(self, request), fields(worker_id = %request.worker_id, tokens = request.tokens))]
    pub async fn admit(&self, request: AdmissionRequest) -> Result<WorkerRecord, AdmissionError> {
        self.ledger.allocate(&request.worker_id, request.tokens).await?;

        let record = request.into_record();
        if let Err(e) = self.workers.insert_active(&record).await {
            warn!(error = %e, "Worker record insert failed, releasing allocation");
            if let Err(release_err) = self.ledger.release(&record.worker_id, 0).await {
                warn!(error = %release_err, "Failed to release allocation after insert failure");
            }
            return Err(e.into());
        }

        info!(worker_type = %record.worker_type, "Worker admitted");
        self.event_bus
            .publish(event_factory::worker_admitted(&record))
            .await;
        Ok(record)
    }

    /// Move an admitted worker's tokens into use and mark it active.
    pub async fn mark_active(&self, worker_id: &str) -> Result<WorkerRecord, AdmissionError> {
        let mut record = self
            .workers
            .get_active(worker_id)
            .await?
            .ok_or_else(|| AdmissionError::WorkerNotFound(worker_id.to_string()))?;

        self.ledger.start_using(worker_id).await?;
        record.status = WorkerStatus::Active;
        self.workers.update_active(&record).await?;
        Ok(record)
    }
}
