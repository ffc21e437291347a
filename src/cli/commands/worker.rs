//! Worker CLI commands.

use anyhow::Result;
use chrono::Utc;
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::application::AdmissionRequest;
use crate::cli::output::{list_table, output, render_list, truncate, ActionOutput, CommandOutput};
use crate::domain::models::{Config, WorkerRecord};
use crate::domain::ports::HeartbeatRegistry;

use super::open_runtime;

#[derive(Args, Debug)]
pub struct WorkerArgs {
    #[command(subcommand)]
    pub command: WorkerCommands,
}

#[derive(Subcommand, Debug)]
pub enum WorkerCommands {
    /// List active workers with their heartbeat age
    List,
    /// Reserve tokens and register a new worker
    Admit {
        worker_id: String,
        #[arg(long)]
        task_id: String,
        #[arg(long = "type")]
        worker_type: String,
        #[arg(long, default_value = "cli")]
        owner: String,
        #[arg(long)]
        tokens: u64,
        /// Also move the allocation into use and mark the worker active
        #[arg(long)]
        start: bool,
    },
    /// Record a heartbeat for a worker
    Heartbeat { worker_id: String },
    /// List cleaned-up workers
    Zombies,
}

#[derive(Debug, Serialize)]
pub struct WorkerRow {
    pub worker_id: String,
    pub worker_type: String,
    pub task_id: String,
    pub status: String,
    pub tokens: u64,
    pub restart_attempt: u32,
    /// Seconds since the last heartbeat (or since creation if none)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub silence_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleaned_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_reason: Option<String>,
}

impl From<&WorkerRecord> for WorkerRow {
    fn from(worker: &WorkerRecord) -> Self {
        Self {
            worker_id: worker.worker_id.clone(),
            worker_type: worker.worker_type.clone(),
            task_id: worker.task_id.clone(),
            status: worker.status.to_string(),
            tokens: worker.resources.token_allocation,
            restart_attempt: worker.restart.restart_attempt,
            silence_seconds: None,
            cleaned_at: worker.cleanup.as_ref().map(|c| c.cleaned_at.to_rfc3339()),
            cleanup_reason: worker.cleanup.as_ref().map(|c| c.reason.clone()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WorkerListOutput {
    pub workers: Vec<WorkerRow>,
    pub total: usize,
    #[serde(skip)]
    pub zombies: bool,
}

impl CommandOutput for WorkerListOutput {
    fn to_human(&self) -> String {
        let mut table = if self.zombies {
            list_table(&["worker", "type", "tokens", "cleaned at", "reason"])
        } else {
            list_table(&["worker", "type", "status", "tokens", "silent for", "restart"])
        };
        for w in &self.workers {
            if self.zombies {
                table.add_row(vec![
                    truncate(&w.worker_id, 32),
                    w.worker_type.clone(),
                    w.tokens.to_string(),
                    w.cleaned_at.clone().unwrap_or_default(),
                    w.cleanup_reason.clone().unwrap_or_default(),
                ]);
            } else {
                table.add_row(vec![
                    truncate(&w.worker_id, 32),
                    w.worker_type.clone(),
                    w.status.clone(),
                    w.tokens.to_string(),
                    w.silence_seconds
                        .map_or_else(|| "-".to_string(), |s| format!("{s}s")),
                    w.restart_attempt.to_string(),
                ]);
            }
        }
        let noun = if self.zombies { "zombie" } else { "worker" };
        render_list(noun, &table, self.total)
    }
}

pub async fn execute(args: WorkerArgs, config: Config, json_mode: bool) -> Result<()> {
    let runtime = open_runtime(config).await?;

    match args.command {
        WorkerCommands::List => {
            let now = Utc::now();
            let mut workers = Vec::new();
            for worker in runtime.workers.list_active().await? {
                let last = runtime.heartbeats.last_heartbeat(&worker.worker_id).await?;
                let mut row = WorkerRow::from(&worker);
                row.silence_seconds =
                    Some((now - last.unwrap_or(worker.created_at)).num_seconds());
                workers.push(row);
            }
            let out = WorkerListOutput {
                total: workers.len(),
                workers,
                zombies: false,
            };
            output(&out, json_mode);
        }
        WorkerCommands::Admit {
            worker_id,
            task_id,
            worker_type,
            owner,
            tokens,
            start,
        } => {
            let request = AdmissionRequest::new(worker_id, task_id, worker_type, owner, tokens);
            let mut record = runtime.admission.admit(request).await?;
            if start {
                record = runtime.admission.mark_active(&record.worker_id).await?;
            }
            let out = ActionOutput::ok(format!(
                "Admitted {} ({} tokens, {})",
                record.worker_id, tokens, record.status
            ))
            .with_data(&record);
            output(&out, json_mode);
        }
        WorkerCommands::Heartbeat { worker_id } => {
            runtime.heartbeats.record(&worker_id).await?;
            output(
                &ActionOutput::ok(format!("Heartbeat recorded for {worker_id}")),
                json_mode,
            );
        }
        WorkerCommands::Zombies => {
            let mut zombies = runtime.workers.list_zombies().await?;
            zombies.sort_by(|a, b| {
                let at = |w: &WorkerRecord| w.cleanup.as_ref().map(|c| c.cleaned_at);
                at(b).cmp(&at(a))
            });
            let out = WorkerListOutput {
                total: zombies.len(),
                workers: zombies.iter().map(WorkerRow::from).collect(),
                zombies: true,
            };
            output(&out, json_mode);
        }
    }

    Ok(())
}
