//! Circuit breaker CLI commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::cli::output::{list_table, output, render_list, ActionOutput, CommandOutput};
use crate::domain::models::Config;
use crate::services::CircuitStats;

use super::open_runtime;

#[derive(Args, Debug)]
pub struct BreakerArgs {
    #[command(subcommand)]
    pub command: BreakerCommands,
}

#[derive(Subcommand, Debug)]
pub enum BreakerCommands {
    /// Show every known breaker
    List,
    /// Open the breaker for a worker type, blocking its restarts
    Trip {
        worker_type: String,
        #[arg(long, default_value = "manual trip")]
        reason: String,
    },
    /// Close the breaker for a worker type
    Reset { worker_type: String },
}

#[derive(Debug, Serialize)]
pub struct BreakerListOutput {
    pub breakers: Vec<CircuitStats>,
    pub total: usize,
}

impl CommandOutput for BreakerListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["type", "state", "trips", "recent failures", "reason", "tripped at"]);
        for b in &self.breakers {
            table.add_row(vec![
                b.worker_type.clone(),
                b.state.clone(),
                b.failure_count.to_string(),
                b.recent_failures.to_string(),
                b.reason.clone().unwrap_or_default(),
                b.tripped_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            ]);
        }
        render_list("breaker", &table, self.total)
    }
}

pub async fn execute(args: BreakerArgs, config: Config, json_mode: bool) -> Result<()> {
    let runtime = open_runtime(config).await?;
    let breakers = &runtime.breakers;

    match args.command {
        BreakerCommands::List => {
            let stats = breakers.stats().await;
            output(
                &BreakerListOutput {
                    total: stats.len(),
                    breakers: stats,
                },
                json_mode,
            );
        }
        BreakerCommands::Trip {
            worker_type,
            reason,
        } => {
            breakers.trip(&worker_type, &reason).await?;
            output(
                &ActionOutput::ok(format!("Circuit breaker for {worker_type} is open: {reason}")),
                json_mode,
            );
        }
        BreakerCommands::Reset { worker_type } => {
            let message = if breakers.reset(&worker_type).await? {
                format!("Circuit breaker for {worker_type} reset")
            } else {
                format!("Circuit breaker for {worker_type} was not open")
            };
            output(&ActionOutput::ok(message), json_mode);
        }
    }

    Ok(())
}
