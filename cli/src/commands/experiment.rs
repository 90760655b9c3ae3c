// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Experiment file commands
//!
//! Commands: validate, show

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use helix_core::domain::corridor::Path as CorridorPath;
use helix_core::domain::node_config::NodeConfigManifest;
use helix_core::infrastructure::experiment_loader::LoadedExperiment;

#[derive(Subcommand)]
pub enum ExperimentCommand {
    /// Validate an experiment file and build its corridor
    Validate {
        /// File path, or a name resolved in the configured experiments directory
        #[arg(value_name = "EXPERIMENT")]
        experiment: String,
    },

    /// Print a summary of an experiment
    Show {
        /// File path, or a name resolved in the configured experiments directory
        #[arg(value_name = "EXPERIMENT")]
        experiment: String,

        /// Print the parsed experiment as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
}

pub fn handle_command(command: ExperimentCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ExperimentCommand::Validate { experiment } => {
            let loaded = load(&experiment, config_override)?;
            println!(
                "{}",
                format!(
                    "✓ Experiment '{}' is valid ({} paths)",
                    loaded.config.name,
                    loaded.corridor.len()
                )
                .green()
            );
            Ok(())
        }
        ExperimentCommand::Show { experiment, json } => {
            let loaded = load(&experiment, config_override)?;
            if json {
                let rendered = serde_json::to_string_pretty(loaded.config.as_ref())
                    .context("Failed to serialize experiment")?;
                println!("{}", rendered);
            } else {
                print_summary(&loaded);
            }
            Ok(())
        }
    }
}

/// Load `experiment` as a path if it exists, otherwise by name from the
/// configured experiments directory.
fn load(experiment: &str, config_override: Option<PathBuf>) -> Result<LoadedExperiment> {
    let direct = Path::new(experiment);
    if direct.is_file() {
        return LoadedExperiment::load(direct);
    }
    let config = NodeConfigManifest::load_or_default(config_override)
        .context("Failed to load configuration")?;
    LoadedExperiment::load_named(&config.spec.experiments.directory, experiment)
}

fn path_length(path: &CorridorPath) -> f64 {
    path.waypoints()
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).norm())
        .sum()
}

fn print_summary(loaded: &LoadedExperiment) {
    let config = &loaded.config;
    println!("{} {}", "Experiment:".bold(), config.name);
    if let Some(description) = &config.description {
        println!("  {}", description.dimmed());
    }
    println!();

    println!("{}", "Paths:".bold());
    for path in loaded.corridor.paths() {
        println!(
            "  [{}] {:?} {:?}, {} waypoints, {:.1} m",
            path.id,
            path.shape,
            path.repeat,
            path.len(),
            path_length(path)
        );
        if !path.switching_points().is_empty() {
            println!("      switching at {:?}", path.switching_points());
        }
    }
    println!();

    let plan = &config.swarm;
    println!("{}", "Swarm plan:".bold());
    println!("  Initial paths: {:?}", plan.initial_paths);
    if !plan.start_delays.is_empty() {
        println!("  Start delays (s): {:?}", plan.start_delays);
    }
    for (rank, permissions) in plan.pass_permissions.iter().enumerate() {
        println!("  Rank {} may pass: {:?}", rank, permissions);
    }
    println!("  Pre-start positions: {}", plan.pre_start_positions.len());
    println!();

    println!("{}", "Forces:".bold());
    println!("  r_conflict: {} m, r_collision: {} m", config.r_conflict, config.r_collision);
    println!(
        "  Force field: {}",
        if config.force_field_enabled() { "enabled" } else { "disabled" }
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CORRIDOR: &str = r#"
name: corridor
paths:
  - waypoints: [[0, 0, -15], [30, 0, -15], [30, 40, -15]]
    lane_radius: 2
"#;

    #[test]
    fn test_loads_by_path_and_by_name() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("corridor.yaml");
        std::fs::write(&file, CORRIDOR).unwrap();

        let by_path = load(file.to_str().unwrap(), None).unwrap();
        assert_eq!(by_path.config.name, "corridor");
        assert!((path_length(&by_path.corridor.paths()[0]) - 70.0).abs() < 1e-9);

        let config = dir.path().join("helix-config.yaml");
        let mut manifest = NodeConfigManifest::default();
        manifest.spec.experiments.directory = dir.path().to_path_buf();
        manifest.to_yaml_file(&config).unwrap();
        let by_name = load("corridor", Some(config)).unwrap();
        assert_eq!(by_name.corridor.len(), 1);
    }

    #[test]
    fn test_invalid_experiment_is_rejected() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("broken.yaml");
        std::fs::write(&file, "name: broken\npaths: []\n").unwrap();
        assert!(load(file.to_str().unwrap(), None).is_err());
    }
}
