//! `warden run`: the lifecycle monitor daemon.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::output::{output, ActionOutput, CommandOutput};
use crate::domain::models::{Config, ReclaimReport, RestartQueueEntry};
use crate::services::ReconcileReport;

use super::open_runtime;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Run a single liveness and reclamation pass, then exit
    #[arg(long)]
    pub once: bool,
}

#[derive(Debug, Serialize)]
pub struct RunOnceOutput {
    pub reconciled: ReconcileReport,
    pub cleaned: Vec<String>,
    pub restarts: Vec<RestartQueueEntry>,
    pub reclaimed: ReclaimReport,
}

impl CommandOutput for RunOnceOutput {
    fn to_human(&self) -> String {
        let mut lines = Vec::new();
        if !self.reconciled.is_clean() {
            lines.push("Repaired state from an interrupted run.".to_string());
        }
        if self.cleaned.is_empty() {
            lines.push("No zombies found.".to_string());
        } else {
            lines.push(format!("Cleaned up: {}", self.cleaned.join(", ")));
        }
        for entry in &self.restarts {
            lines.push(format!(
                "Scheduled {} (attempt {}) at {}",
                entry.new_worker_id,
                entry.attempt,
                entry.scheduled_at.to_rfc3339()
            ));
        }
        if self.reclaimed.tokens_reclaimed > 0 {
            lines.push(format!(
                "Reclaimed {} stale tokens",
                self.reclaimed.tokens_reclaimed
            ));
        }
        lines.join("\n")
    }
}

pub async fn execute(args: RunArgs, config: Config, json_mode: bool) -> Result<()> {
    let runtime = open_runtime(config).await?;
    let monitor = runtime.monitor();

    if args.once {
        let reconciled = runtime.reconciler.run().await.context("Reconciliation failed")?;
        let cleaned = monitor.liveness_pass().await.context("Liveness pass failed")?;
        let mut restarts = Vec::new();
        for worker in &cleaned {
            match runtime.restarts.on_worker_cleaned(worker).await {
                Ok(Some(entry)) => restarts.push(entry),
                Ok(None) => {}
                Err(e) => warn!(worker_id = %worker.worker_id, error = %e, "Restart scheduling failed"),
            }
        }
        let reclaimed = monitor.reclaim_pass().await.context("Reclamation failed")?;
        let out = RunOnceOutput {
            reconciled,
            cleaned: cleaned.into_iter().map(|w| w.worker_id).collect(),
            restarts,
            reclaimed,
        };
        output(&out, json_mode);
        return Ok(());
    }

    let (_, handles) = monitor.start().await.context("Failed to start lifecycle monitor")?;
    wait_for_shutdown_signal()
        .await
        .context("Failed to install signal handlers")?;
    info!("Shutdown signal received");
    monitor.shutdown();
    handles.join().await;

    output(&ActionOutput::ok("Lifecycle monitor stopped"), json_mode);
    Ok(())
}

/// Completes on SIGINT, SIGTERM or SIGQUIT.
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
