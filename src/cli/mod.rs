//! Command-line interface.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::{
    breaker::BreakerArgs, ledger::LedgerArgs, restart::RestartArgs, run::RunArgs,
    worker::WorkerArgs,
};

#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(about = "Warden - worker lifecycle supervisor", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Load defaults plus this file instead of .warden/config.yaml,
    /// .warden/local.yaml and WARDEN_* variables
    #[arg(short, long, global = true, env = "WARDEN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the lifecycle monitor until interrupted
    Run(RunArgs),

    /// Repair persisted state left by an interrupted run
    Reconcile,

    /// Token budget ledger
    Ledger(LedgerArgs),

    /// Worker records and heartbeats
    Worker(WorkerArgs),

    /// Per worker type circuit breakers
    Breaker(BreakerArgs),

    /// Scheduled replacements
    Restart(RestartArgs),
}

/// Report a command failure and exit non-zero.
pub fn handle_error(err: &anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let chain: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
        println!(
            "{}",
            serde_json::json!({ "success": false, "error": err.to_string(), "causes": chain })
        );
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1);
}
