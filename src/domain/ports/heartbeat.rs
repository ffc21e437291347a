//! Heartbeat registry port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::StoreError;

/// Records liveness pulses per worker.
#[async_trait]
pub trait HeartbeatRegistry: Send + Sync {
    /// Record a pulse for `worker_id` at the current time.
    async fn record(&self, worker_id: &str) -> Result<(), StoreError>;

    /// Time of the last pulse, if any was ever recorded.
    async fn last_heartbeat(&self, worker_id: &str) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Drop all state for a worker that has been cleaned up.
    async fn forget(&self, worker_id: &str) -> Result<(), StoreError>;
}
