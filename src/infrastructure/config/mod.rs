//! Configuration loading.
//!
//! Serialized defaults are merged with `.warden/config.yaml`,
//! `.warden/local.yaml` and `WARDEN_*` environment variables, then
//! validated.

pub mod loader;

pub use loader::{ConfigError, ConfigLoader};
