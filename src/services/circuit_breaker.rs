//! Per-worker-type circuit breakers for restart protection.
//!
//! A breaker trips after repeated cleanups of one worker type inside a
//! failure window and blocks restarts of that type until the reset timeout
//! elapses. Breakers are persisted as one collection keyed by worker type.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::errors::StoreError;
use crate::domain::models::{BreakerCheck, CircuitBreakerSettings, CircuitBreakerState};
use crate::domain::ports::BreakerStore;
use super::event_bus::EventBus;
use super::event_factory;

/// Configuration for circuit breakers.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Whether to enable circuit breakers.
    pub enabled: bool,
    /// Number of failures inside the window that opens the circuit.
    pub failure_threshold: u32,
    /// Window size for tracking failures (older failures are forgotten).
    pub failure_window: Duration,
    /// Duration an open circuit blocks before closing again.
    pub reset_timeout: Duration,
}

impl CircuitBreakerConfig {
    pub fn from_settings(settings: &CircuitBreakerSettings) -> Self {
        Self {
            enabled: settings.enabled,
            failure_threshold: settings.failure_threshold,
            failure_window: seconds(settings.failure_window_seconds),
            reset_timeout: seconds(settings.reset_timeout_seconds),
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from_settings(&CircuitBreakerSettings::default())
    }
}

fn seconds(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX))
}

/// Result of checking a circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitCheckResult {
    /// Restarts are allowed.
    Allowed,
    /// Restarts are blocked.
    Blocked {
        worker_type: String,
        reason: Option<String>,
        retry_after: DateTime<Utc>,
    },
}

impl CircuitCheckResult {
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Statistics for a circuit breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStats {
    pub worker_type: String,
    pub state: String,
    pub reason: Option<String>,
    pub tripped_at: Option<DateTime<Utc>>,
    pub failure_count: u32,
    pub recent_failures: usize,
}

/// Service for managing circuit breakers.
pub struct CircuitBreakerService {
    config: CircuitBreakerConfig,
    circuits: Arc<RwLock<BTreeMap<String, CircuitBreakerState>>>,
    store: Arc<dyn BreakerStore>,
    event_bus: Arc<EventBus>,
}

impl CircuitBreakerService {
    /// Load persisted breakers.
    pub async fn load(
        config: CircuitBreakerConfig,
        store: Arc<dyn BreakerStore>,
        event_bus: Arc<EventBus>,
    ) -> Result<Self, StoreError> {
        let circuits = store.load().await?;
        Ok(Self {
            config,
            circuits: Arc::new(RwLock::new(circuits)),
            store,
            event_bus,
        })
    }

    /// Check whether restarts of `worker_type` are allowed.
    pub async fn check(&self, worker_type: &str) -> CircuitCheckResult {
        self.check_at(worker_type, Utc::now()).await
    }

    /// Check at `now`. An open breaker whose timeout has elapsed is closed
    /// and persisted as part of the check.
    pub async fn check_at(&self, worker_type: &str, now: DateTime<Utc>) -> CircuitCheckResult {
        if !self.config.enabled {
            return CircuitCheckResult::Allowed;
        }

        let mut circuits = self.circuits.write().await;
        let Some(circuit) = circuits.get_mut(worker_type) else {
            return CircuitCheckResult::Allowed;
        };

        match circuit.check_at(now, self.config.reset_timeout) {
            BreakerCheck::Closed => CircuitCheckResult::Allowed,
            BreakerCheck::Open { retry_after } => CircuitCheckResult::Blocked {
                worker_type: worker_type.to_string(),
                reason: circuit.reason.clone(),
                retry_after,
            },
            BreakerCheck::Reset => {
                info!(worker_type, "Circuit breaker reset after timeout");
                self.persist(&circuits).await;
                drop(circuits);
                self.event_bus
                    .publish(event_factory::circuit_breaker_reset(worker_type, false))
                    .await;
                CircuitCheckResult::Allowed
            }
        }
    }

    /// Record a cleanup of a `worker_type` worker. Returns `true` if this
    /// failure tripped the breaker.
    pub async fn record_failure(&self, worker_type: &str) -> bool {
        self.record_failure_at(worker_type, Utc::now()).await
    }

    pub async fn record_failure_at(&self, worker_type: &str, now: DateTime<Utc>) -> bool {
        if !self.config.enabled {
            return false;
        }

        let mut circuits = self.circuits.write().await;
        let circuit = circuits.entry(worker_type.to_string()).or_default();
        let tripped = circuit.record_failure(
            now,
            self.config.failure_threshold,
            self.config.failure_window,
        );
        if !tripped {
            return false;
        }

        let reason = circuit.reason.clone().unwrap_or_default();
        warn!(worker_type, reason = %reason, "Circuit breaker tripped");
        self.persist(&circuits).await;
        drop(circuits);

        self.event_bus
            .publish(event_factory::circuit_breaker_tripped(worker_type, &reason))
            .await;
        true
    }

    /// Open the breaker for `worker_type` by hand.
    pub async fn trip(&self, worker_type: &str, reason: &str) -> Result<(), StoreError> {
        let mut circuits = self.circuits.write().await;
        circuits
            .entry(worker_type.to_string())
            .or_default()
            .trip(reason, Utc::now());
        self.store.save(&circuits).await?;
        drop(circuits);

        warn!(worker_type, reason, "Circuit breaker tripped manually");
        self.event_bus
            .publish(event_factory::circuit_breaker_tripped(worker_type, reason))
            .await;
        Ok(())
    }

    /// Close the breaker for `worker_type` by hand. Returns `false` if it
    /// was not open.
    pub async fn reset(&self, worker_type: &str) -> Result<bool, StoreError> {
        let mut circuits = self.circuits.write().await;
        let Some(circuit) = circuits.get_mut(worker_type).filter(|c| c.active) else {
            return Ok(false);
        };
        circuit.reset();
        self.store.save(&circuits).await?;
        drop(circuits);

        info!(worker_type, "Circuit breaker reset manually");
        self.event_bus
            .publish(event_factory::circuit_breaker_reset(worker_type, true))
            .await;
        Ok(true)
    }

    /// Get statistics for all circuits.
    pub async fn stats(&self) -> Vec<CircuitStats> {
        let circuits = self.circuits.read().await;
        circuits
            .iter()
            .map(|(worker_type, c)| CircuitStats {
                worker_type: worker_type.clone(),
                state: c.state().as_str().to_string(),
                reason: c.reason.clone(),
                tripped_at: c.tripped_at,
                failure_count: c.failure_count,
                recent_failures: c.recent_failures.len(),
            })
            .collect()
    }

    /// Get the state of one circuit.
    pub async fn get(&self, worker_type: &str) -> Option<CircuitBreakerState> {
        self.circuits.read().await.get(worker_type).cloned()
    }

    /// Get configuration.
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    async fn persist(&self, circuits: &BTreeMap<String, CircuitBreakerState>) {
        if let Err(e) = self.store.save(circuits).await {
            warn!("Failed to persist circuit breakers: {}", e);
        }
    }
}
