//! Lifecycle event stream records.
//!
//! The persisted shape is `{sequence, event_type, worker_id, timestamp, data}`
//! and is consumed by external monitoring, so variant names are stable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Every phase transition the subsystem reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventType {
    WorkerAdmitted,
    ZombieDetected,
    ZombieFalsePositive,
    ProcessTerminated,
    TokensReturned,
    LogsArchived,
    StateTransitioned,
    CleanupCompleted,
    CleanupFailed,
    CleanupRateLimited,
    RestartScheduled,
    RestartDisabled,
    RestartSkipped,
    RestartAbandoned,
    RestartBlocked,
    RestartRateLimited,
    RestartDeferred,
    CircuitBreakerTripped,
    CircuitBreakerReset,
    TokensReclaimed,
    Reconciled,
}

impl LifecycleEventType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::WorkerAdmitted => "worker_admitted",
            Self::ZombieDetected => "zombie_detected",
            Self::ZombieFalsePositive => "zombie_false_positive",
            Self::ProcessTerminated => "process_terminated",
            Self::TokensReturned => "tokens_returned",
            Self::LogsArchived => "logs_archived",
            Self::StateTransitioned => "state_transitioned",
            Self::CleanupCompleted => "cleanup_completed",
            Self::CleanupFailed => "cleanup_failed",
            Self::CleanupRateLimited => "cleanup_rate_limited",
            Self::RestartScheduled => "restart_scheduled",
            Self::RestartDisabled => "restart_disabled",
            Self::RestartSkipped => "restart_skipped",
            Self::RestartAbandoned => "restart_abandoned",
            Self::RestartBlocked => "restart_blocked",
            Self::RestartRateLimited => "restart_rate_limited",
            Self::RestartDeferred => "restart_deferred",
            Self::CircuitBreakerTripped => "circuit_breaker_tripped",
            Self::CircuitBreakerReset => "circuit_breaker_reset",
            Self::TokensReclaimed => "tokens_reclaimed",
            Self::Reconciled => "reconciled",
        }
    }
}

impl fmt::Display for LifecycleEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in the append-only event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Assigned by the event bus on publish.
    #[serde(default)]
    pub sequence: u64,
    pub event_type: LifecycleEventType,
    pub worker_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl LifecycleEvent {
    pub fn new(
        event_type: LifecycleEventType,
        worker_id: Option<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            sequence: 0,
            event_type,
            worker_id,
            timestamp: Utc::now(),
            data,
        }
    }
}
