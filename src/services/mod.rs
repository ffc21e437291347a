//! Service layer: the ledger, detection, termination and restart logic.

pub mod circuit_breaker;
pub mod event_bus;
pub mod event_factory;
pub mod rate_limiter;
pub mod reconciler;
pub mod restart_policy;
pub mod terminator;
pub mod token_ledger;
pub mod zombie_detector;

pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerService, CircuitCheckResult, CircuitStats};
pub use event_bus::{EventBus, EventBusConfig};
pub use rate_limiter::{KeyedMinuteLimiter, MinuteWindowLimiter};
pub use reconciler::{ReconcileReport, Reconciler};
pub use restart_policy::{
    BackoffPolicy, RateLimitScope, RestartDecision, RestartPolicyEngine, RestartSettings,
};
pub use terminator::{Terminator, TerminatorDeps};
pub use token_ledger::{LedgerSettings, TokenLedger};
pub use zombie_detector::{CleanupOutcome, DetectorSettings, Liveness, ZombieDetector};
