use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a scheduled restart.
///
/// The engine only ever writes `Pending`; the external spawner owns the
/// other transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartEntryStatus {
    Pending,
    Spawned,
    Discarded,
}

/// One pending replacement for a cleaned-up worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartQueueEntry {
    pub new_worker_id: String,
    pub task_id: String,
    pub worker_type: String,
    pub owner: String,
    pub scheduled_at: DateTime<Utc>,
    pub original_worker_id: String,
    pub attempt: u32,
    pub status: RestartEntryStatus,
    pub queued_at: DateTime<Utc>,
}

impl RestartQueueEntry {
    /// Whether the backoff delay has elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == RestartEntryStatus::Pending && now >= self.scheduled_at
    }
}
