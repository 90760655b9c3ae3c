// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use helix_core::domain::node_config::NodeConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a configuration file with every default filled in
    Generate {
        /// Output path (default: ./helix-config.yaml)
        #[arg(short, long, default_value = "./helix-config.yaml")]
        output: PathBuf,

        /// Agent id written into the generated file
        #[arg(long)]
        agent_id: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate {
            output,
            agent_id,
            force,
        } => generate(output, agent_id, force),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = NodeConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. HELIX_CONFIG_PATH: {}",
            std::env::var("HELIX_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./helix-config.yaml");
        println!("  4. ~/.helix/config.yaml");
        println!("  5. /etc/helix/config.yaml");
        println!();
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Node Identity:".bold());
    println!("  Name: {}", config.metadata.name);
    println!("  Agent ID: {}", spec.agent.id);
    let reference = spec.geodetic_reference;
    println!(
        "  Reference: {:.7}, {:.7} @ {:.1} m",
        reference.latitude_deg, reference.longitude_deg, reference.altitude_m
    );
    println!();

    println!("{}", "Control:".bold());
    println!("  Max speed: {} m/s", spec.control.max_speed);
    println!("  Max accel: {} m/s²", spec.control.max_accel);
    println!("  Control period: {:?}", spec.control.control_period);
    println!("  Publish period: {:?}", spec.control.publish_period);
    println!("  Battery period: {:?}", spec.control.battery_period);
    println!("  Link-loss grace: {:?}", spec.control.link_loss_grace);
    println!("  Stale peer timeout: {:?}", spec.control.stale_peer_timeout);
    println!();

    println!("{}", "Flight:".bold());
    println!("  Takeoff altitude: {} m", spec.flight.takeoff_altitude);
    println!(
        "  Altitude fence: {} .. {} m",
        spec.flight.altitude_fence.min, spec.flight.altitude_fence.max
    );
    let ladder = spec.flight.deconfliction;
    println!(
        "  Deconfliction: step {} m within {} .. {} m",
        ladder.step, ladder.min_height, ladder.max_height
    );
    println!("  Min proximity: {} m", spec.flight.min_proximity);
    println!();

    println!("{}", "Experiments:".bold());
    println!("  Directory: {}", spec.experiments.directory.display());
    println!("  Default: {}", spec.experiments.default);
    println!();

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = NodeConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

fn generate(output: PathBuf, agent_id: Option<String>, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            output.display()
        );
    }

    let mut config = NodeConfigManifest::default();
    if let Some(id) = agent_id {
        config.spec.agent.id = id;
    }
    config
        .validate()
        .context("Generated configuration is invalid")?;

    config
        .to_yaml_file(&output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
