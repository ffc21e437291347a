//! Centralized event construction helpers.
//!
//! Keeps the `data` payload shape for each event type in one place so
//! monitoring consumers see consistent fields.

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::domain::models::{LifecycleEvent, LifecycleEventType, ReclaimReport, WorkerRecord};

/// Build a worker-scoped event.
pub fn worker_event(
    event_type: LifecycleEventType,
    worker_id: &str,
    data: serde_json::Value,
) -> LifecycleEvent {
    LifecycleEvent::new(event_type, Some(worker_id.to_string()), data)
}

/// Build an event that isn't tied to one worker.
pub fn system_event(event_type: LifecycleEventType, data: serde_json::Value) -> LifecycleEvent {
    LifecycleEvent::new(event_type, None, data)
}

pub fn worker_admitted(worker: &WorkerRecord) -> LifecycleEvent {
    worker_event(
        LifecycleEventType::WorkerAdmitted,
        &worker.worker_id,
        json!({
            "task_id": worker.task_id,
            "worker_type": worker.worker_type,
            "tokens": worker.resources.token_allocation,
            "restart_attempt": worker.restart.restart_attempt,
        }),
    )
}

pub fn zombie_detected(
    worker: &WorkerRecord,
    last_heartbeat: Option<DateTime<Utc>>,
    silence_seconds: i64,
) -> LifecycleEvent {
    worker_event(
        LifecycleEventType::ZombieDetected,
        &worker.worker_id,
        json!({
            "worker_type": worker.worker_type,
            "last_heartbeat": last_heartbeat,
            "silence_seconds": silence_seconds,
        }),
    )
}

pub fn zombie_false_positive(worker_id: &str) -> LifecycleEvent {
    worker_event(
        LifecycleEventType::ZombieFalsePositive,
        worker_id,
        json!({ "reason": "heartbeat resumed during verification" }),
    )
}

pub fn process_terminated(worker_id: &str, forced: bool, pids: &[i32]) -> LifecycleEvent {
    worker_event(
        LifecycleEventType::ProcessTerminated,
        worker_id,
        json!({ "forced": forced, "pids": pids }),
    )
}

/// Phase 1 found nothing to stop.
pub fn process_already_terminated(worker_id: &str) -> LifecycleEvent {
    worker_event(
        LifecycleEventType::ProcessTerminated,
        worker_id,
        json!({ "forced": false, "pids": [], "already_terminated": true }),
    )
}

pub fn tokens_returned(worker_id: &str, tokens: u64, actual_used: u64) -> LifecycleEvent {
    worker_event(
        LifecycleEventType::TokensReturned,
        worker_id,
        json!({ "tokens": tokens, "actual_used": actual_used }),
    )
}

/// Phase 2 ran but returned nothing; `reason` says why.
pub fn tokens_skipped(worker_id: &str, actual_used: u64, reason: &str) -> LifecycleEvent {
    worker_event(
        LifecycleEventType::TokensReturned,
        worker_id,
        json!({ "tokens": 0, "actual_used": actual_used, "skipped": reason }),
    )
}

pub fn logs_archived(worker_id: &str, location: &str, files: usize) -> LifecycleEvent {
    worker_event(
        LifecycleEventType::LogsArchived,
        worker_id,
        json!({ "location": location, "files_archived": files }),
    )
}

pub fn state_transitioned(worker_id: &str, from: &str, to: &str) -> LifecycleEvent {
    worker_event(
        LifecycleEventType::StateTransitioned,
        worker_id,
        json!({ "from": from, "to": to }),
    )
}

pub fn cleanup_completed(worker_id: &str, duration_ms: u128) -> LifecycleEvent {
    worker_event(
        LifecycleEventType::CleanupCompleted,
        worker_id,
        json!({ "duration_ms": u64::try_from(duration_ms).unwrap_or(u64::MAX) }),
    )
}

pub fn cleanup_failed(worker_id: &str, error: &str) -> LifecycleEvent {
    worker_event(
        LifecycleEventType::CleanupFailed,
        worker_id,
        json!({ "error": error }),
    )
}

pub fn cleanup_rate_limited(worker_id: &str, limit: u32) -> LifecycleEvent {
    worker_event(
        LifecycleEventType::CleanupRateLimited,
        worker_id,
        json!({ "max_per_minute": limit }),
    )
}

/// Outcome of a restart decision for `worker`.
pub fn restart_decision(
    event_type: LifecycleEventType,
    worker: &WorkerRecord,
    detail: serde_json::Value,
) -> LifecycleEvent {
    let mut data = json!({
        "worker_type": worker.worker_type,
        "task_id": worker.task_id,
        "restart_attempt": worker.restart.restart_attempt,
    });
    if let (Some(map), serde_json::Value::Object(extra)) = (data.as_object_mut(), detail) {
        map.extend(extra);
    }
    worker_event(event_type, &worker.worker_id, data)
}

pub fn circuit_breaker_tripped(worker_type: &str, reason: &str) -> LifecycleEvent {
    system_event(
        LifecycleEventType::CircuitBreakerTripped,
        json!({ "worker_type": worker_type, "reason": reason }),
    )
}

pub fn circuit_breaker_reset(worker_type: &str, manual: bool) -> LifecycleEvent {
    system_event(
        LifecycleEventType::CircuitBreakerReset,
        json!({ "worker_type": worker_type, "manual": manual }),
    )
}

pub fn tokens_reclaimed(report: &ReclaimReport) -> LifecycleEvent {
    system_event(
        LifecycleEventType::TokensReclaimed,
        json!({
            "tokens_reclaimed": report.tokens_reclaimed,
            "workers_cleaned": report.workers_cleaned,
        }),
    )
}

pub fn reconciled(data: serde_json::Value) -> LifecycleEvent {
    system_event(LifecycleEventType::Reconciled, data)
}
