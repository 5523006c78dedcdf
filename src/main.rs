use clap::Parser;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;

mod agent;
mod audit;
mod cli;
mod commands;
mod config;
mod error;
mod fsutil;
mod gate;
mod process;
mod skill;
mod template;
mod trust;

use cli::{Cli, Commands, Globals};
use config::{Config, LogLevel};

fn setup_logging(log_level: LogLevel) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("steward")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("steward.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    // RUST_LOG env var takes precedence, otherwise use the resolved level
    let from_env = std::env::var("RUST_LOG").is_ok();
    let mut builder = env_logger::Builder::new();
    if from_env {
        builder.parse_default_env();
    } else {
        builder.filter_level(log_level.to_filter());
    }

    builder.target(env_logger::Target::Pipe(target)).init();

    info!("Logging initialized, writing to: {}", log_file.display());
    info!(
        "Log level: {} (from {})",
        log_level.to_filter(),
        if from_env { "RUST_LOG env" } else { "config" }
    );
    Ok(())
}

fn run(cli: Cli, config: Config) -> Result<()> {
    let globals = Globals {
        yes: cli.yes,
        quiet: cli.quiet,
    };
    match cli.command {
        Commands::Agent { action } => commands::agent::run(action, &config, globals),
        Commands::Audit { action } => commands::audit::run(action, &config, globals),
        Commands::Skill { action } => commands::skill::run(action, &config, globals),
        Commands::Trust { action } => commands::trust::run(action),
        Commands::Config { action } => commands::config::run(action, &config, cli.config.as_ref()),
        Commands::Completions { shell } => commands::completions::run(shell),
    }
}

fn main() -> Result<()> {
    // Parse CLI arguments first
    let cli = Cli::parse();

    // Load configuration (before logging, so log messages in Config::load are silent)
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else if cli.quiet {
        LogLevel::Warn
    } else {
        config.log_level
    };
    setup_logging(log_level).context("Failed to setup logging")?;
    process::watch_interrupts().context("Failed to install the Ctrl-C handler")?;

    info!("Starting steward with config from: {:?}", Config::source_path(cli.config.as_ref()));

    run(cli, config).context("Command failed")?;

    Ok(())
}
