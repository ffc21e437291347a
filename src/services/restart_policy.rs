//! Restart policy engine.
//!
//! Decides whether a cleaned-up worker gets a replacement and, if so,
//! writes one restart queue entry for the external spawner. Eligibility is
//! an ordered short-circuit chain; each refusal emits its own event and
//! leaves every counter untouched.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::errors::StoreError;
use crate::domain::models::{
    LifecycleEventType, RestartConfig, RestartEntryStatus, RestartQueueEntry, WorkerRecord,
    WorkerStatus, DEFAULT_RETRY_KEY,
};
use crate::domain::ports::RestartQueue;
use super::circuit_breaker::{CircuitBreakerService, CircuitCheckResult};
use super::event_bus::EventBus;
use super::event_factory;
use super::rate_limiter::{KeyedMinuteLimiter, MinuteWindowLimiter};
use super::token_ledger::TokenLedger;

/// Retry limit used when neither the worker type nor `default` is configured.
pub const FALLBACK_MAX_RETRIES: u32 = 3;

/// Exponential backoff between restart attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first restart.
    pub base: Duration,
    /// Maximum delay cap.
    pub max: Duration,
}

impl BackoffPolicy {
    /// Delay for a 1-based `attempt`: `min(base * 2^(attempt - 1), max)`.
    ///
    /// Attempt 0 is treated as attempt 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        1u32.checked_shl(attempt.saturating_sub(1))
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Runtime settings for the restart engine.
#[derive(Debug, Clone)]
pub struct RestartSettings {
    pub enabled: bool,
    pub backoff: BackoffPolicy,
    pub max_retries_by_type: BTreeMap<String, u32>,
    pub global_max_per_minute: u32,
    pub per_type_max_per_minute: u32,
}

impl RestartSettings {
    pub fn from_config(config: &RestartConfig) -> Self {
        Self {
            enabled: config.enabled,
            backoff: BackoffPolicy {
                base: Duration::from_secs(config.backoff.base_delay_seconds),
                max: Duration::from_secs(config.backoff.max_delay_seconds),
            },
            max_retries_by_type: config.max_retries_by_type.clone(),
            global_max_per_minute: config.rate_limits.global_max_per_minute,
            per_type_max_per_minute: config.rate_limits.per_type_max_per_minute,
        }
    }

    /// Retry limit for `worker_type`, falling back to the `default` entry.
    pub fn max_retries(&self, worker_type: &str) -> u32 {
        self.max_retries_by_type
            .get(worker_type)
            .or_else(|| self.max_retries_by_type.get(DEFAULT_RETRY_KEY))
            .copied()
            .unwrap_or(FALLBACK_MAX_RETRIES)
    }
}

impl Default for RestartSettings {
    fn default() -> Self {
        Self::from_config(&RestartConfig::default())
    }
}

/// Which restart rate limit refused a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitScope {
    Global,
    WorkerType,
}

impl RateLimitScope {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::WorkerType => "worker_type",
        }
    }
}

/// Outcome of the eligibility chain, in evaluation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartDecision {
    /// Every check passed; rate-limit counters have been incremented.
    Eligible,
    Disabled,
    NotZombie(WorkerStatus),
    RetriesExhausted { attempt: u32, max_retries: u32 },
    CircuitOpen { retry_after: DateTime<Utc> },
    RateLimited { scope: RateLimitScope, limit: u32 },
    InsufficientBudget { required: u64, available: u64 },
}

impl RestartDecision {
    pub const fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible)
    }

    const fn event_type(&self) -> LifecycleEventType {
        match self {
            Self::Eligible => LifecycleEventType::RestartScheduled,
            Self::Disabled => LifecycleEventType::RestartDisabled,
            Self::NotZombie(_) => LifecycleEventType::RestartSkipped,
            Self::RetriesExhausted { .. } => LifecycleEventType::RestartAbandoned,
            Self::CircuitOpen { .. } => LifecycleEventType::RestartBlocked,
            Self::RateLimited { .. } => LifecycleEventType::RestartRateLimited,
            Self::InsufficientBudget { .. } => LifecycleEventType::RestartDeferred,
        }
    }

    fn detail(&self) -> serde_json::Value {
        match self {
            Self::Eligible | Self::Disabled => json!({}),
            Self::NotZombie(status) => json!({ "status": status.as_str() }),
            Self::RetriesExhausted {
                attempt,
                max_retries,
            } => json!({ "attempt": attempt, "max_retries": max_retries }),
            Self::CircuitOpen { retry_after } => json!({ "retry_after": retry_after }),
            Self::RateLimited { scope, limit } => {
                json!({ "scope": scope.as_str(), "max_per_minute": limit })
            }
            Self::InsufficientBudget {
                required,
                available,
            } => json!({ "required": required, "available": available }),
        }
    }
}

/// Decides on and schedules worker replacements.
pub struct RestartPolicyEngine {
    settings: RestartSettings,
    breakers: Arc<CircuitBreakerService>,
    ledger: Arc<TokenLedger>,
    queue: Arc<dyn RestartQueue>,
    event_bus: Arc<EventBus>,
    global_limiter: MinuteWindowLimiter,
    type_limiters: KeyedMinuteLimiter,
    // Rate checks and increments of one decision must not interleave
    // with another's.
    decision_lock: Mutex<()>,
}

impl RestartPolicyEngine {
    pub fn new(
        settings: RestartSettings,
        breakers: Arc<CircuitBreakerService>,
        ledger: Arc<TokenLedger>,
        queue: Arc<dyn RestartQueue>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            global_limiter: MinuteWindowLimiter::new(settings.global_max_per_minute),
            type_limiters: KeyedMinuteLimiter::new(settings.per_type_max_per_minute),
            settings,
            breakers,
            ledger,
            queue,
            event_bus,
            decision_lock: Mutex::new(()),
        }
    }

    pub const fn settings(&self) -> &RestartSettings {
        &self.settings
    }

    /// Run the eligibility chain for `worker`.
    pub async fn should_restart(&self, worker: &WorkerRecord) -> bool {
        self.evaluate_at(worker, Utc::now()).await.is_eligible()
    }

    /// Run the eligibility chain at `now` and report which check decided.
    ///
    /// A refusal emits its event. An eligible result emits nothing; the
    /// `restart_scheduled` event belongs to [`Self::restart`].
    pub async fn evaluate_at(&self, worker: &WorkerRecord, now: DateTime<Utc>) -> RestartDecision {
        let decision = self.decide(worker, now).await;
        if decision.is_eligible() {
            debug!(worker_id = %worker.worker_id, "Restart eligible");
        } else {
            info!(
                worker_id = %worker.worker_id,
                worker_type = %worker.worker_type,
                decision = ?decision,
                "Restart refused"
            );
            self.event_bus
                .publish(event_factory::restart_decision(
                    decision.event_type(),
                    worker,
                    decision.detail(),
                ))
                .await;
        }
        decision
    }

    async fn decide(&self, worker: &WorkerRecord, now: DateTime<Utc>) -> RestartDecision {
        if !self.settings.enabled {
            return RestartDecision::Disabled;
        }

        if worker.status != WorkerStatus::Zombie {
            return RestartDecision::NotZombie(worker.status);
        }

        let max_retries = self.settings.max_retries(&worker.worker_type);
        if worker.restart.restart_attempt >= max_retries {
            return RestartDecision::RetriesExhausted {
                attempt: worker.restart.restart_attempt,
                max_retries,
            };
        }

        if let CircuitCheckResult::Blocked { retry_after, .. } =
            self.breakers.check_at(&worker.worker_type, now).await
        {
            return RestartDecision::CircuitOpen { retry_after };
        }

        let _guard = self.decision_lock.lock().await;

        let type_limiter = self.type_limiters.limiter(&worker.worker_type).await;
        if !type_limiter.has_capacity_at(now).await {
            return RestartDecision::RateLimited {
                scope: RateLimitScope::WorkerType,
                limit: type_limiter.limit(),
            };
        }
        if !self.global_limiter.has_capacity_at(now).await {
            return RestartDecision::RateLimited {
                scope: RateLimitScope::Global,
                limit: self.global_limiter.limit(),
            };
        }

        let required = worker.resources.token_allocation;
        let available = self.available_budget().await;
        if required > available {
            return RestartDecision::InsufficientBudget {
                required,
                available,
            };
        }

        type_limiter.record_at(now).await;
        self.global_limiter.record_at(now).await;
        RestartDecision::Eligible
    }

    /// Budget as persisted right now, including other processes' writes.
    async fn available_budget(&self) -> u64 {
        match self.ledger.refresh().await {
            Ok(summary) => summary.available,
            Err(e) => {
                warn!(error = %e, "Ledger refresh failed, using last snapshot");
                self.ledger.available()
            }
        }
    }

    /// Give back the rate-limit slots an eligible decision at `decided_at`
    /// took.
    async fn release_rate_slots(&self, worker_type: &str, decided_at: DateTime<Utc>) {
        self.type_limiters
            .limiter(worker_type)
            .await
            .unrecord_at(decided_at)
            .await;
        self.global_limiter.unrecord_at(decided_at).await;
    }

    /// Schedule a replacement for `worker`.
    ///
    /// Writes exactly one queue entry; the caller is expected to have
    /// checked eligibility first. If the entry cannot be written, the
    /// rate-limit slots taken by that check are given back.
    pub async fn restart(&self, worker: &WorkerRecord) -> Result<RestartQueueEntry, StoreError> {
        self.restart_at(worker, Utc::now()).await
    }

    pub async fn restart_at(
        &self,
        worker: &WorkerRecord,
        now: DateTime<Utc>,
    ) -> Result<RestartQueueEntry, StoreError> {
        let attempt = worker.restart.restart_attempt.saturating_add(1);
        let delay = self.settings.backoff.delay(attempt);
        let scheduled_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(now);

        let entry = RestartQueueEntry {
            new_worker_id: worker.restart_worker_id(attempt),
            task_id: worker.task_id.clone(),
            worker_type: worker.worker_type.clone(),
            owner: worker.owner.clone(),
            scheduled_at,
            original_worker_id: worker.worker_id.clone(),
            attempt,
            status: RestartEntryStatus::Pending,
            queued_at: now,
        };
        if let Err(e) = self.queue.enqueue(&entry).await {
            self.release_rate_slots(&worker.worker_type, now).await;
            return Err(e);
        }

        info!(
            worker_id = %worker.worker_id,
            new_worker_id = %entry.new_worker_id,
            attempt,
            delay_seconds = delay.as_secs(),
            "Restart scheduled"
        );
        self.event_bus
            .publish(event_factory::restart_decision(
                LifecycleEventType::RestartScheduled,
                worker,
                json!({
                    "new_worker_id": entry.new_worker_id,
                    "attempt": attempt,
                    "delay_seconds": delay.as_secs(),
                    "scheduled_at": scheduled_at,
                }),
            ))
            .await;
        Ok(entry)
    }

    /// Handle a worker whose cleanup just completed: count the failure
    /// against its type's breaker, then schedule a replacement if eligible.
    pub async fn on_worker_cleaned(
        &self,
        worker: &WorkerRecord,
    ) -> Result<Option<RestartQueueEntry>, StoreError> {
        self.breakers.record_failure(&worker.worker_type).await;

        let now = Utc::now();
        if !self.evaluate_at(worker, now).await.is_eligible() {
            return Ok(None);
        }
        match self.restart_at(worker, now).await {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(worker_id = %worker.worker_id, error = %e, "Failed to enqueue restart");
                Err(e)
            }
        }
    }

    /// Restarts counted in the current window, global and for `worker_type`.
    pub async fn rate_counts(&self, worker_type: &str) -> (u32, u32) {
        let now = Utc::now();
        (
            self.global_limiter.count_at(now).await,
            self.type_limiters.limiter(worker_type).await.count_at(now).await,
        )
    }
}
