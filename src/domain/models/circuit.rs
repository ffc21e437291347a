//! Per-worker-type circuit breaker state.
//!
//! Two states only: closed (normal) and open (blocking). An open breaker
//! resets to closed in one step once the reset timeout has elapsed.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, restarts flow normally.
    Closed,
    /// Circuit is open, restarts are blocked.
    Open,
}

impl CircuitState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
        }
    }
}

/// Result of checking a breaker at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerCheck {
    /// Breaker is closed.
    Closed,
    /// Breaker is open until `retry_after`.
    Open { retry_after: DateTime<Utc> },
    /// Breaker was open, the timeout elapsed and it has just closed.
    Reset,
}

/// Persisted breaker record for one worker type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub active: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub tripped_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failure_count: u32,

    /// Failures inside the accounting window. Not persisted.
    #[serde(skip)]
    pub recent_failures: Vec<DateTime<Utc>>,
}

impl CircuitBreakerState {
    pub const fn state(&self) -> CircuitState {
        if self.active {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    /// Open the breaker.
    pub fn trip(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.active = true;
        self.reason = Some(reason.into());
        self.tripped_at = Some(now);
        self.failure_count += 1;
        self.recent_failures.clear();
    }

    /// Close the breaker. Trip history (`reason`, `tripped_at`,
    /// `failure_count`) is kept for inspection.
    pub fn reset(&mut self) {
        self.active = false;
        self.recent_failures.clear();
    }

    /// Check the breaker, auto-resetting if `reset_timeout` has elapsed.
    pub fn check_at(&mut self, now: DateTime<Utc>, reset_timeout: Duration) -> BreakerCheck {
        if !self.active {
            return BreakerCheck::Closed;
        }

        // An open breaker without a trip time was written by hand; treat it
        // as tripped now so it still honours the timeout.
        let tripped_at = *self.tripped_at.get_or_insert(now);
        if now - tripped_at >= reset_timeout {
            self.reset();
            BreakerCheck::Reset
        } else {
            BreakerCheck::Open {
                retry_after: tripped_at + reset_timeout,
            }
        }
    }

    /// Record a failure and trip once `threshold` failures fall inside
    /// `window`. Returns `true` when this call tripped the breaker.
    pub fn record_failure(
        &mut self,
        now: DateTime<Utc>,
        threshold: u32,
        window: Duration,
    ) -> bool {
        self.recent_failures.push(now);

        let cutoff = now - window;
        self.recent_failures.retain(|t| *t > cutoff);

        let count = u32::try_from(self.recent_failures.len()).unwrap_or(u32::MAX);
        if !self.active && count >= threshold {
            self.trip(
                format!("{count} failures within {}s", window.num_seconds()),
                now,
            );
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_closed() {
        let mut breaker = CircuitBreakerState::default();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(
            breaker.check_at(Utc::now(), Duration::seconds(60)),
            BreakerCheck::Closed
        );
    }

    #[test]
    fn test_blocks_until_timeout_then_resets_once() {
        let start = Utc::now();
        let timeout = Duration::seconds(300);
        let mut breaker = CircuitBreakerState::default();
        breaker.trip("too many zombies", start);
        assert_eq!(breaker.failure_count, 1);

        for offset in [0, 1, 150, 299] {
            assert!(matches!(
                breaker.check_at(start + Duration::seconds(offset), timeout),
                BreakerCheck::Open { .. }
            ));
        }

        assert_eq!(
            breaker.check_at(start + Duration::seconds(300), timeout),
            BreakerCheck::Reset
        );
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(
            breaker.check_at(start + Duration::seconds(301), timeout),
            BreakerCheck::Closed
        );
    }

    #[test]
    fn test_retry_after() {
        let start = Utc::now();
        let mut breaker = CircuitBreakerState::default();
        breaker.trip("manual", start);
        match breaker.check_at(start, Duration::seconds(60)) {
            BreakerCheck::Open { retry_after } => {
                assert_eq!(retry_after, start + Duration::seconds(60));
            }
            other => panic!("expected open breaker, got {other:?}"),
        }
    }

    #[test]
    fn test_failures_trip_within_window() {
        let start = Utc::now();
        let window = Duration::seconds(600);
        let mut breaker = CircuitBreakerState::default();

        assert!(!breaker.record_failure(start, 3, window));
        assert!(!breaker.record_failure(start + Duration::seconds(10), 3, window));
        assert!(breaker.record_failure(start + Duration::seconds(20), 3, window));
        assert!(breaker.active);
        assert!(breaker.recent_failures.is_empty());
    }

    #[test]
    fn test_old_failures_are_forgotten() {
        let start = Utc::now();
        let window = Duration::seconds(60);
        let mut breaker = CircuitBreakerState::default();

        breaker.record_failure(start, 2, window);
        assert!(!breaker.record_failure(start + Duration::seconds(120), 2, window));
        assert!(!breaker.active);
        assert_eq!(breaker.recent_failures.len(), 1);
    }

    #[test]
    fn test_persisted_shape_omits_window() {
        let mut breaker = CircuitBreakerState::default();
        breaker.record_failure(Utc::now(), 5, Duration::seconds(60));
        let value = serde_json::to_value(&breaker).unwrap();
        assert_eq!(value["active"], false);
        assert_eq!(value["failure_count"], 0);
        assert!(value.get("recent_failures").is_none());
    }
}
