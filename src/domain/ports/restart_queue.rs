//! Restart queue port.

use async_trait::async_trait;

use crate::domain::errors::StoreError;
use crate::domain::models::RestartQueueEntry;

/// Scheduled replacements waiting for the external spawner.
#[async_trait]
pub trait RestartQueue: Send + Sync {
    /// Write one entry, keyed by `new_worker_id`.
    async fn enqueue(&self, entry: &RestartQueueEntry) -> Result<(), StoreError>;

    async fn list(&self) -> Result<Vec<RestartQueueEntry>, StoreError>;

    /// Delete an entry once consumed. Returns `false` if it was not present.
    async fn remove(&self, new_worker_id: &str) -> Result<bool, StoreError>;
}
