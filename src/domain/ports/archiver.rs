//! Log archival port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::errors::StoreError;
use crate::domain::models::WorkerRecord;

/// Where a worker's artefacts ended up.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ArchiveReport {
    pub location: String,
    pub files_archived: usize,
}

/// Copies a worker's logs and process metadata into a dated archive.
#[async_trait]
pub trait LogArchiver: Send + Sync {
    async fn archive(
        &self,
        worker: &WorkerRecord,
        at: DateTime<Utc>,
    ) -> Result<ArchiveReport, StoreError>;
}
