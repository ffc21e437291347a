//! Worker record store port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::StoreError;
use crate::domain::models::WorkerRecord;

/// Active and zombie worker collections.
///
/// Records are partitioned per `worker_id`; implementations only need to
/// serialize writes that touch the same worker.
#[async_trait]
pub trait WorkerStore: Send + Sync {
    /// Insert a newly admitted worker into the active collection.
    async fn insert_active(&self, record: &WorkerRecord) -> Result<(), StoreError>;

    /// Overwrite an existing active record.
    async fn update_active(&self, record: &WorkerRecord) -> Result<(), StoreError>;

    async fn get_active(&self, worker_id: &str) -> Result<Option<WorkerRecord>, StoreError>;

    async fn list_active(&self) -> Result<Vec<WorkerRecord>, StoreError>;

    /// Remove an active record. Returns `false` if it was not present.
    async fn remove_active(&self, worker_id: &str) -> Result<bool, StoreError>;

    async fn find_zombie(&self, worker_id: &str) -> Result<Option<WorkerRecord>, StoreError>;

    async fn list_zombies(&self) -> Result<Vec<WorkerRecord>, StoreError>;

    /// Mark the worker as a zombie and relocate it to the zombie collection
    /// dated by `at`, as one state transition.
    ///
    /// Must be idempotent: if the worker was already relocated the existing
    /// zombie record is returned unchanged.
    async fn transition_to_zombie(
        &self,
        worker_id: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<WorkerRecord, StoreError>;
}
