// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0

//! # Helix CLI
//!
//! The `helix` binary drives a Helix swarm from the operator's side.
//!
//! ## Commands
//!
//! - `helix simulate` - Fly a simulated swarm through an experiment
//! - `helix agent run` - Run one agent node on the MQTT broker
//! - `helix ground monitor|command|stop|return|run` - Ground station over MQTT
//! - `helix deconflict` - Compute a deconflicted altitude ladder
//! - `helix experiment validate|show` - Inspect experiment files
//! - `helix config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;

mod commands;

use commands::{
    AgentCommand, BrokerArgs, ConfigCommand, DeconflictArgs, ExperimentCommand, GroundCommand,
    SimulateArgs,
};

/// Helix - corridor path following for drone swarms
#[derive(Parser)]
#[command(name = "helix")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "HELIX_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "HELIX_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, global = true, env = "HELIX_LOG_FORMAT", value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Compact,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Fly a simulated swarm over the in-memory bus
    #[command(name = "simulate")]
    Simulate(SimulateArgs),

    /// Agent node on the MQTT broker
    #[command(name = "agent")]
    Agent {
        #[command(subcommand)]
        command: AgentCommand,
    },

    /// Ground station on the MQTT broker
    #[command(name = "ground")]
    Ground {
        #[command(flatten)]
        broker: BrokerArgs,

        #[command(subcommand)]
        command: GroundCommand,
    },

    /// Compute deconflicted altitudes
    #[command(name = "deconflict")]
    Deconflict(DeconflictArgs),

    /// Experiment file operations
    #[command(name = "experiment")]
    Experiment {
        #[command(subcommand)]
        command: ExperimentCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.log_format)?;

    match cli.command {
        Some(Commands::Simulate(args)) => commands::simulate::execute(args, cli.config).await,
        Some(Commands::Agent { command }) => {
            commands::agent::handle_command(command, cli.config).await
        }
        Some(Commands::Ground { broker, command }) => {
            commands::ground::handle_command(command, broker, cli.config).await
        }
        Some(Commands::Deconflict(args)) => commands::deconflict::execute(args, cli.config),
        Some(Commands::Experiment { command }) => {
            commands::experiment::handle_command(command, cli.config)
        }
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }

    Ok(())
}
