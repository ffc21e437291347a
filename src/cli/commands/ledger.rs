//! Ledger CLI commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::cli::output::{list_table, output, ActionOutput, CommandOutput};
use crate::domain::models::{Config, LedgerRecord, LedgerSummary, ReclaimReport};
use crate::services::event_factory;

use super::open_runtime;

#[derive(Args, Debug)]
pub struct LedgerArgs {
    #[command(subcommand)]
    pub command: LedgerCommands,
}

#[derive(Subcommand, Debug)]
pub enum LedgerCommands {
    /// Show budget counters and held allocations
    Summary,
    /// Reserve tokens for a worker
    Allocate {
        worker_id: String,
        tokens: u64,
    },
    /// Move a worker's allocation into use
    Start { worker_id: String },
    /// Return a worker's tokens to the budget
    Release {
        worker_id: String,
        /// Tokens actually consumed, recorded as metadata
        #[arg(long, default_value = "0")]
        actual_used: u64,
    },
    /// Force-return allocations older than the stale timeout
    Reclaim {
        /// Override the configured stale timeout
        #[arg(long)]
        older_than_secs: Option<u64>,
    },
    /// Drop released allocations from the ledger
    Compact,
}

#[derive(Debug, Serialize)]
pub struct AllocationRow {
    pub worker_id: String,
    pub tokens: u64,
    pub status: String,
    pub allocated_at: String,
}

#[derive(Debug, Serialize)]
pub struct LedgerSummaryOutput {
    #[serde(flatten)]
    pub summary: LedgerSummary,
    pub allocations: Vec<AllocationRow>,
}

impl LedgerSummaryOutput {
    fn from_record(record: &LedgerRecord) -> Self {
        Self {
            summary: record.summary(),
            allocations: record
                .allocations
                .iter()
                .filter(|(_, a)| a.status.is_held())
                .map(|(id, a)| AllocationRow {
                    worker_id: id.clone(),
                    tokens: a.tokens,
                    status: a.status.to_string(),
                    allocated_at: a.allocated_at.to_rfc3339(),
                })
                .collect(),
        }
    }
}

impl CommandOutput for LedgerSummaryOutput {
    fn to_human(&self) -> String {
        let s = &self.summary;
        let mut lines = vec![
            format!("Total budget: {}", s.total_budget),
            format!("Allocated:    {}", s.allocated),
            format!("In use:       {}", s.in_use),
            format!("Available:    {}", s.available),
            format!(
                "Allocations:  {} held / {} tracked",
                s.held_allocations, s.total_allocations
            ),
        ];
        if !self.allocations.is_empty() {
            let mut table = list_table(&["worker", "tokens", "status", "allocated at"]);
            for row in &self.allocations {
                table.add_row(vec![
                    row.worker_id.clone(),
                    row.tokens.to_string(),
                    row.status.clone(),
                    row.allocated_at.clone(),
                ]);
            }
            lines.push(String::new());
            lines.push(table.to_string());
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct ReclaimOutput {
    #[serde(flatten)]
    pub report: ReclaimReport,
}

impl CommandOutput for ReclaimOutput {
    fn to_human(&self) -> String {
        if self.report.workers_cleaned.is_empty() {
            return "No stale allocations.".to_string();
        }
        format!(
            "Reclaimed {} tokens from {} worker(s): {}",
            self.report.tokens_reclaimed,
            self.report.workers_cleaned.len(),
            self.report.workers_cleaned.join(", ")
        )
    }
}

pub async fn execute(args: LedgerArgs, config: Config, json_mode: bool) -> Result<()> {
    let runtime = open_runtime(config).await?;
    let ledger = &runtime.ledger;

    match args.command {
        LedgerCommands::Summary => {
            output(&LedgerSummaryOutput::from_record(&ledger.record()), json_mode);
        }
        LedgerCommands::Allocate { worker_id, tokens } => {
            ledger.allocate(&worker_id, tokens).await?;
            let out = ActionOutput::ok(format!(
                "Allocated {tokens} tokens to {worker_id} ({} available)",
                ledger.available()
            ))
            .with_data(ledger.summary());
            output(&out, json_mode);
        }
        LedgerCommands::Start { worker_id } => {
            let tokens = ledger.start_using(&worker_id).await?;
            output(
                &ActionOutput::ok(format!("{worker_id} is now using {tokens} tokens")),
                json_mode,
            );
        }
        LedgerCommands::Release {
            worker_id,
            actual_used,
        } => {
            let outcome = ledger.release(&worker_id, actual_used).await?;
            let returned = outcome.tokens_returned();
            let message = if returned > 0 {
                format!("Returned {returned} tokens from {worker_id}")
            } else {
                format!("Allocation for {worker_id} was already returned")
            };
            output(
                &ActionOutput::ok(message).with_data(serde_json::json!({ "tokens_returned": returned })),
                json_mode,
            );
        }
        LedgerCommands::Reclaim { older_than_secs } => {
            let report = match older_than_secs {
                Some(secs) => {
                    let timeout = chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX));
                    ledger.reclaim_older_than(timeout).await?
                }
                None => ledger.reclaim_stale().await?,
            };
            if !report.workers_cleaned.is_empty() {
                runtime
                    .event_bus
                    .publish(event_factory::tokens_reclaimed(&report))
                    .await;
            }
            output(&ReclaimOutput { report }, json_mode);
        }
        LedgerCommands::Compact => {
            let removed = ledger.compact().await?;
            output(
                &ActionOutput::ok(format!("Removed {removed} released allocation(s)"))
                    .with_data(serde_json::json!({ "removed": removed })),
                json_mode,
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::LedgerRecord;
    use chrono::Utc;

    #[test]
    fn test_summary_lists_only_held_allocations() {
        let mut record = LedgerRecord::new(1000);
        let now = Utc::now();
        record.allocate("w-1", 300, now).unwrap();
        record.allocate("w-2", 200, now).unwrap();
        record.release("w-2", 50, now).unwrap();

        let out = LedgerSummaryOutput::from_record(&record);
        assert_eq!(out.allocations.len(), 1);
        assert_eq!(out.allocations[0].worker_id, "w-1");

        let human = out.to_human();
        assert!(human.contains("Available:    700"));
        assert!(human.contains("w-1"));

        let json = out.to_json();
        assert_eq!(json["available"], 700);
        assert_eq!(json["allocations"][0]["status"], "allocated");
    }
}
