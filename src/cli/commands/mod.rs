//! CLI command implementations.

pub mod breaker;
pub mod ledger;
pub mod reconcile;
pub mod restart;
pub mod run;
pub mod worker;

use anyhow::{Context, Result};

use crate::application::WardenRuntime;
use crate::domain::models::Config;

/// Open the filesystem-backed runtime for a command.
pub async fn open_runtime(config: Config) -> Result<WardenRuntime> {
    let state_dir = config.storage.state_dir.clone();
    WardenRuntime::from_config(config)
        .await
        .with_context(|| format!("Failed to open warden state in {state_dir}"))
}
