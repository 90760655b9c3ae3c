// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0

// Experiment Loader
//
// Reads experiment files from disk (YAML or JSON, chosen by extension),
// validates them and builds the corridor model. Everything here runs before
// any vehicle moves, so every failure is fatal to the mission start.

use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::domain::corridor::CorridorModel;
use crate::domain::experiment::{ConfigError, ExperimentConfig};

const EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Yaml,
    Json,
}

fn format_of(path: &Path) -> Result<Format, ConfigError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "yaml" | "yml" => Ok(Format::Yaml),
        "json" => Ok(Format::Json),
        _ => Err(ConfigError::UnsupportedFormat(ext)),
    }
}

/// Parse an experiment document without touching the filesystem.
pub fn parse_experiment(content: &str, path: &Path) -> Result<ExperimentConfig, ConfigError> {
    let display = path.display().to_string();
    let config: ExperimentConfig = match format_of(path)? {
        Format::Yaml => serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            path: display,
            message: e.to_string(),
        })?,
        Format::Json => serde_json::from_str(content).map_err(|e| ConfigError::Parse {
            path: display,
            message: e.to_string(),
        })?,
    };
    config.validate()?;
    Ok(config)
}

pub fn load_experiment(path: impl AsRef<Path>) -> Result<ExperimentConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_experiment(&content, path)
}

/// Locate `name` inside `dir`, trying each supported extension.
///
/// A name that already carries an extension is used as-is.
pub fn resolve_experiment(dir: impl AsRef<Path>, name: &str) -> Option<PathBuf> {
    let dir = dir.as_ref();
    let direct = dir.join(name);
    if Path::new(name).extension().is_some() {
        return direct.exists().then_some(direct);
    }
    EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{}.{}", name, ext)))
        .find(|candidate| candidate.exists())
}

/// A validated experiment plus the corridor model derived from it.
#[derive(Debug, Clone)]
pub struct LoadedExperiment {
    pub config: Arc<ExperimentConfig>,
    pub corridor: Arc<CorridorModel>,
}

impl LoadedExperiment {
    pub fn from_config(config: ExperimentConfig) -> anyhow::Result<Self> {
        let corridor = CorridorModel::from_experiment(&config)
            .with_context(|| format!("Invalid corridor in experiment '{}'", config.name))?;
        Ok(Self {
            config: Arc::new(config),
            corridor: Arc::new(corridor),
        })
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let config = load_experiment(path)
            .with_context(|| format!("Failed to load experiment {:?}", path))?;
        let loaded = Self::from_config(config)?;
        info!(
            experiment = %loaded.config.name,
            paths = loaded.corridor.len(),
            "Loaded experiment from {:?}",
            path
        );
        Ok(loaded)
    }

    pub fn load_named(dir: impl AsRef<Path>, name: &str) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        let path = resolve_experiment(dir, name)
            .with_context(|| format!("Experiment '{}' not found in {:?}", name, dir))?;
        Self::load(path)
    }
}
