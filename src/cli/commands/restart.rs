//! Restart queue CLI commands.

use anyhow::Result;
use chrono::Utc;
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::cli::output::{list_table, output, render_list, CommandOutput};
use crate::domain::models::{Config, RestartQueueEntry};

use super::open_runtime;

#[derive(Args, Debug)]
pub struct RestartArgs {
    #[command(subcommand)]
    pub command: RestartCommands,
}

#[derive(Subcommand, Debug)]
pub enum RestartCommands {
    /// Show scheduled replacements
    Queue {
        /// Only entries whose backoff has elapsed
        #[arg(long)]
        due: bool,
    },
}

#[derive(Debug, Serialize)]
pub struct RestartQueueOutput {
    pub entries: Vec<RestartQueueEntry>,
    pub total: usize,
}

impl CommandOutput for RestartQueueOutput {
    fn to_human(&self) -> String {
        let now = Utc::now();
        let mut table = list_table(&["new worker", "replaces", "type", "attempt", "scheduled", "due"]);
        for e in &self.entries {
            table.add_row(vec![
                e.new_worker_id.clone(),
                e.original_worker_id.clone(),
                e.worker_type.clone(),
                e.attempt.to_string(),
                e.scheduled_at.to_rfc3339(),
                if e.is_due(now) { "yes" } else { "no" }.to_string(),
            ]);
        }
        render_list("restart", &table, self.total)
    }
}

pub async fn execute(args: RestartArgs, config: Config, json_mode: bool) -> Result<()> {
    let runtime = open_runtime(config).await?;

    match args.command {
        RestartCommands::Queue { due } => {
            let now = Utc::now();
            let entries: Vec<_> = runtime
                .restart_queue
                .list()
                .await?
                .into_iter()
                .filter(|e| !due || e.is_due(now))
                .collect();
            output(
                &RestartQueueOutput {
                    total: entries.len(),
                    entries,
                },
                json_mode,
            );
        }
    }

    Ok(())
}
