//! Event stream persistence port.

use async_trait::async_trait;

use crate::domain::errors::StoreError;
use crate::domain::models::LifecycleEvent;

/// Append-only storage for lifecycle events.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, event: &LifecycleEvent) -> Result<(), StoreError>;

    /// Most recent `limit` events, oldest first.
    async fn recent(&self, limit: usize) -> Result<Vec<LifecycleEvent>, StoreError>;
}
