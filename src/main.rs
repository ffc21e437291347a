//! Warden CLI entry point.

use anyhow::{Context, Result};
use clap::Parser;

use warden::cli::commands;
use warden::cli::{handle_error, Cli, Commands};
use warden::domain::models::Config;
use warden::infrastructure::config::ConfigLoader;
use warden::infrastructure::logging::{LogConfig, LoggerImpl};

fn load_config(cli: &Cli) -> Result<Config> {
    match cli.config {
        Some(ref path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
    .context("Failed to load configuration")
}

async fn dispatch(cli: Cli, config: Config) -> Result<()> {
    let json = cli.json;
    match cli.command {
        Commands::Run(args) => commands::run::execute(args, config, json).await,
        Commands::Reconcile => commands::reconcile::execute(config, json).await,
        Commands::Ledger(args) => commands::ledger::execute(args, config, json).await,
        Commands::Worker(args) => commands::worker::execute(args, config, json).await,
        Commands::Breaker(args) => commands::breaker::execute(args, config, json).await,
        Commands::Restart(args) => commands::restart::execute(args, config, json).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => handle_error(&err, json),
    };

    let _logger = match LoggerImpl::init(&LogConfig::from_settings(&config.logging)) {
        Ok(logger) => logger,
        Err(err) => handle_error(&err, json),
    };

    if let Err(err) = dispatch(cli, config).await {
        tracing::debug!(error = %err, "Command failed");
        handle_error(&err, json);
    }
}
