//! `warden reconcile`

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::services::ReconcileReport;

use super::open_runtime;

#[derive(Debug, Serialize)]
pub struct ReconcileOutput {
    #[serde(flatten)]
    pub report: ReconcileReport,
}

impl CommandOutput for ReconcileOutput {
    fn to_human(&self) -> String {
        let r = &self.report;
        if r.is_clean() {
            return "State is consistent, nothing to repair.".to_string();
        }
        format!(
            "Removed {} duplicate active record(s), completed {} relocation(s), released {} allocation(s)",
            r.duplicates_removed.len(),
            r.relocations_completed.len(),
            r.allocations_released.len()
        )
    }
}

pub async fn execute(config: Config, json_mode: bool) -> Result<()> {
    let runtime = open_runtime(config).await?;
    let report = runtime
        .reconciler
        .run()
        .await
        .context("Reconciliation failed")?;
    output(&ReconcileOutput { report }, json_mode);
    Ok(())
}
