//! Bastion CLI.
//!
//! Offline tooling around the module runtime: validating module directories
//! and running declarative lifecycle suites against them.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use bastion_config::BastionConfig;
use bastion_telemetry::{LogConfig, setup_logging};
use clap::{Parser, Subcommand};

mod commands;
mod suite;
mod theme;

/// Bastion - sandboxed module runtime
#[derive(Parser)]
#[command(name = "bastion")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to a configuration file
    #[arg(short, long, global = true, env = "BASTION_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every `*.suite.toml` under a directory
    Test {
        /// Directory to search for suites
        dir: PathBuf,

        /// Only run cases whose name contains this text
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// List module manifests under a directory and whether they validate
    Modules {
        /// Modules root
        dir: PathBuf,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(config: &BastionConfig, verbose: bool) -> Result<bastion_telemetry::LogGuard> {
    let mut log_config =
        LogConfig::try_from(&config.logging).context("invalid logging configuration")?;
    if verbose {
        log_config.level = "debug".to_owned();
    }
    setup_logging(&log_config).context("failed to initialize logging")
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = BastionConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    let _guard = init_logging(&config, cli.verbose)?;

    let passed = match cli.command {
        Commands::Test { dir, filter } => {
            commands::test::run(&dir, config, filter.as_deref()).await?
        },
        Commands::Modules { dir, json } => commands::modules::run(&dir, json)?,
    };

    Ok(if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
