//! Warden - worker lifecycle supervisor
//!
//! Warden keeps a pool of ephemeral worker processes inside a shared token
//! budget. It admits workers against a token ledger, detects workers whose
//! heartbeats stopped, tears them down in a fixed order, returns their
//! tokens, and schedules replacements behind backoff, per-type circuit
//! breakers and rate limits.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors and port traits
//! - **Service Layer** (`services`): ledger, detection, termination, restart policy
//! - **Application Layer** (`application`): admission and the lifecycle monitor
//! - **Adapters** (`adapters`): filesystem, in-memory and Unix process implementations
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use warden::application::{AdmissionRequest, WardenRuntime};
//! use warden::infrastructure::config::ConfigLoader;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = WardenRuntime::from_config(ConfigLoader::load()?).await?;
//!     runtime
//!         .admission
//!         .admit(AdmissionRequest::new("w-1", "task-1", "crawler", "scheduler", 2_000))
//!         .await?;
//!
//!     let monitor = runtime.monitor();
//!     let (_, handles) = monitor.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     monitor.shutdown();
//!     handles.join().await;
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::{
    AdmissionController, AdmissionRequest, LifecycleMonitor, MonitorSettings, WardenRuntime,
};
pub use domain::errors::{AdmissionError, CleanupError, LedgerError, ProcessError, StoreError};
pub use domain::models::{
    Config, LedgerSummary, LifecycleEvent, LifecycleEventType, RestartQueueEntry, WorkerRecord,
    WorkerStatus,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    CircuitBreakerService, EventBus, RestartDecision, RestartPolicyEngine, TokenLedger,
    ZombieDetector,
};
