//! Null archiver implementation.
//!
//! Used when archival is disabled but the pipeline requires a
//! `LogArchiver` implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::StoreError;
use crate::domain::models::WorkerRecord;
use super::{ArchiveReport, LogArchiver};

/// An archiver that archives nothing.
#[derive(Debug, Clone, Default)]
pub struct NullArchiver;

#[async_trait]
impl LogArchiver for NullArchiver {
    async fn archive(
        &self,
        _worker: &WorkerRecord,
        _at: DateTime<Utc>,
    ) -> Result<ArchiveReport, StoreError> {
        Ok(ArchiveReport::default())
    }
}
