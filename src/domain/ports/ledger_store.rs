//! Ledger persistence port.

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::errors::StoreError;
use crate::domain::models::LedgerRecord;

/// Held while a ledger read-modify-write is in progress. Dropping it
/// releases the store's exclusive lock.
pub trait LedgerLockGuard: Send + Sync {}

impl LedgerLockGuard for () {}

/// Durable storage for the single ledger record.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Load the persisted ledger, or `None` if none exists yet.
    async fn load(&self) -> Result<Option<LedgerRecord>, StoreError>;

    /// Replace the persisted ledger.
    async fn save(&self, record: &LedgerRecord) -> Result<(), StoreError>;

    /// Take the exclusive lock shared by every process using this store,
    /// waiting at most `timeout`. Returns `None` when the wait expires.
    ///
    /// Stores reachable from a single process only need the ledger's own
    /// in-process lock, so the default guard is a no-op.
    async fn lock_exclusive(
        &self,
        _timeout: Duration,
    ) -> Result<Option<Box<dyn LedgerLockGuard>>, StoreError> {
        let guard: Box<dyn LedgerLockGuard> = Box::new(());
        Ok(Some(guard))
    }
}
