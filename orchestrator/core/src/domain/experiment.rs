// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0

// Experiment Configuration Types
//
// Describes one flight experiment shared by every agent of the swarm:
// - corridor paths (waypoints, lane radii, shape, rotation, repeat policy)
// - per-rank swarm plan (initial path, start delay, pass permissions, pre-start position)
// - controller gains, force limits and separation radii
// - optional vortex force field
//
// Files are loaded by `infrastructure::experiment_loader` (YAML or JSON).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::domain::corridor::{PathId, RepeatPolicy, RotationSense, ShapeKind};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("unsupported config extension '{0}' (expected .yaml, .yml or .json)")]
    UnsupportedFormat(String),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Lane radius given either once for the whole path or per waypoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RadiusSpec {
    Uniform(f64),
    PerWaypoint(Vec<f64>),
}

impl RadiusSpec {
    pub fn expand(&self, waypoints: usize) -> Vec<f64> {
        match self {
            RadiusSpec::Uniform(r) => vec![*r; waypoints],
            RadiusSpec::PerWaypoint(radii) => radii.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSpec {
    /// `[north, east, down]` in metres, local frame.
    pub waypoints: Vec<[f64; 3]>,

    pub lane_radius: RadiusSpec,

    #[serde(default)]
    pub shape: ShapeKind,

    #[serde(default)]
    pub rotation: RotationSense,

    #[serde(default)]
    pub repeat: RepeatPolicy,

    /// One normal per waypoint, required for ribbons.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ribbon_normals: Vec<[f64; 3]>,

    /// Waypoint indices from which the agent may leave this path.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub switching_points: Vec<usize>,
}

/// Per-rank assignments. Entry `i` of each list applies to the agent of
/// priority rank `i`; every list is consulted independently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwarmPlan {
    #[serde(default)]
    pub initial_paths: Vec<PathId>,

    /// Seconds after mission start before the agent begins moving.
    #[serde(default)]
    pub start_delays: Vec<f64>,

    #[serde(default)]
    pub pass_permissions: Vec<BTreeMap<PathId, Vec<PathId>>>,

    #[serde(default)]
    pub pre_start_positions: Vec<[f64; 3]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForceGains {
    #[serde(default = "default_gain")]
    pub migration: f64,
    #[serde(default = "default_gain")]
    pub lane_cohesion: f64,
    #[serde(default = "default_gain")]
    pub rotation: f64,
    #[serde(default = "default_gain")]
    pub separation: f64,
    #[serde(default)]
    pub force_field: f64,
}

impl Default for ForceGains {
    fn default() -> Self {
        Self {
            migration: default_gain(),
            lane_cohesion: default_gain(),
            rotation: default_gain(),
            separation: default_gain(),
            force_field: 0.0,
        }
    }
}

/// Magnitude caps applied to each force term before the gains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForceLimits {
    #[serde(default = "default_unit_limit")]
    pub migration: f64,
    #[serde(default = "default_unit_limit")]
    pub lane_cohesion: f64,
    #[serde(default = "default_unit_limit")]
    pub rotation: f64,
    #[serde(default = "default_separation_limit")]
    pub separation: f64,
    #[serde(default = "default_unit_limit")]
    pub force_field: f64,
}

impl Default for ForceLimits {
    fn default() -> Self {
        Self {
            migration: default_unit_limit(),
            lane_cohesion: default_unit_limit(),
            rotation: default_unit_limit(),
            separation: default_separation_limit(),
            force_field: default_unit_limit(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VortexField {
    pub centre: [f64; 3],
    /// Vortex axes; the magnitude of each axis scales its contribution.
    #[serde(default)]
    pub axes: Vec<[f64; 3]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub paths: Vec<PathSpec>,

    #[serde(default)]
    pub swarm: SwarmPlan,

    #[serde(default)]
    pub gains: ForceGains,

    #[serde(default)]
    pub limits: ForceLimits,

    /// Peers closer than this start repelling.
    #[serde(default = "default_r_conflict")]
    pub r_conflict: f64,

    /// Peers closer than this get the full unit push.
    #[serde(default = "default_r_collision")]
    pub r_collision: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vortex: Option<VortexField>,
}

fn default_gain() -> f64 {
    1.0
}

fn default_unit_limit() -> f64 {
    1.0
}

fn default_separation_limit() -> f64 {
    5.0
}

fn default_r_conflict() -> f64 {
    5.0
}

fn default_r_collision() -> f64 {
    2.0
}

impl ExperimentConfig {
    /// Check everything that is not corridor geometry.
    ///
    /// Geometry is validated when the corridor model is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid("name", "cannot be empty"));
        }
        if self.paths.is_empty() {
            return Err(ConfigError::invalid("paths", "at least one path is required"));
        }

        if !(self.r_collision.is_finite() && self.r_collision >= 0.0) {
            return Err(ConfigError::invalid("r_collision", "must be finite and >= 0"));
        }
        if !(self.r_conflict.is_finite() && self.r_conflict > self.r_collision) {
            return Err(ConfigError::invalid(
                "r_conflict",
                format!("must be finite and greater than r_collision ({})", self.r_collision),
            ));
        }

        let gains = [
            ("gains.migration", self.gains.migration),
            ("gains.lane_cohesion", self.gains.lane_cohesion),
            ("gains.rotation", self.gains.rotation),
            ("gains.separation", self.gains.separation),
            ("gains.force_field", self.gains.force_field),
        ];
        for (field, value) in gains {
            if !value.is_finite() {
                return Err(ConfigError::invalid(field, "must be finite"));
            }
        }

        let limits = [
            ("limits.migration", self.limits.migration),
            ("limits.lane_cohesion", self.limits.lane_cohesion),
            ("limits.rotation", self.limits.rotation),
            ("limits.separation", self.limits.separation),
            ("limits.force_field", self.limits.force_field),
        ];
        for (field, value) in limits {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::invalid(field, "must be finite and >= 0"));
            }
        }

        let path_count = self.paths.len();
        for (rank, path) in self.swarm.initial_paths.iter().enumerate() {
            if *path >= path_count {
                return Err(ConfigError::invalid(
                    format!("swarm.initial_paths[{}]", rank),
                    format!("path {} does not exist ({} paths)", path, path_count),
                ));
            }
        }
        for (rank, delay) in self.swarm.start_delays.iter().enumerate() {
            if !(delay.is_finite() && *delay >= 0.0) {
                return Err(ConfigError::invalid(
                    format!("swarm.start_delays[{}]", rank),
                    "must be finite and >= 0",
                ));
            }
        }
        for (rank, map) in self.swarm.pass_permissions.iter().enumerate() {
            for (from, targets) in map {
                if *from >= path_count || targets.iter().any(|t| *t >= path_count) {
                    return Err(ConfigError::invalid(
                        format!("swarm.pass_permissions[{}]", rank),
                        format!("references a path outside 0..{}", path_count),
                    ));
                }
            }
        }
        for (rank, position) in self.swarm.pre_start_positions.iter().enumerate() {
            if position.iter().any(|c| !c.is_finite()) {
                return Err(ConfigError::invalid(
                    format!("swarm.pre_start_positions[{}]", rank),
                    "must be finite",
                ));
            }
        }

        if let Some(vortex) = &self.vortex {
            if vortex.centre.iter().any(|c| !c.is_finite()) {
                return Err(ConfigError::invalid("vortex.centre", "must be finite"));
            }
            for (i, axis) in vortex.axes.iter().enumerate() {
                let norm_sq: f64 = axis.iter().map(|c| c * c).sum();
                if !(norm_sq.is_finite() && norm_sq > 0.0) {
                    return Err(ConfigError::invalid(
                        format!("vortex.axes[{}]", i),
                        "must be a finite non-zero vector",
                    ));
                }
            }
        }

        Ok(())
    }

    pub fn force_field_enabled(&self) -> bool {
        self.vortex.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
name: two-lanes
paths:
  - waypoints: [[0, 0, -10], [50, 0, -10], [100, 0, -10]]
    lane_radius: 2.0
    repeat: STOP
    switching_points: [1]
  - waypoints: [[0, 4, -10], [50, 4, -10], [100, 4, -10]]
    lane_radius: [2.0, 2.0, 2.0]
    shape: cylinder
    rotation: -1
swarm:
  initial_paths: [0, 1]
  start_delays: [0, 5.5]
  pass_permissions:
    - {0: [1]}
    - {}
gains:
  migration: 2.0
r_conflict: 6
r_collision: 2
"#;

    #[test]
    fn test_parse_sample() {
        let config: ExperimentConfig = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(config.name, "two-lanes");
        assert_eq!(config.paths.len(), 2);
        assert_eq!(config.paths[0].repeat, RepeatPolicy::Stop);
        assert_eq!(config.paths[1].shape, ShapeKind::Cylinder);
        assert_eq!(config.paths[1].rotation, RotationSense::Negative);
        assert_eq!(config.paths[0].lane_radius.expand(3), vec![2.0; 3]);
        assert_eq!(config.swarm.pass_permissions[0][&0], vec![1]);
        assert_eq!(config.gains.migration, 2.0);
        assert_eq!(config.gains.separation, 1.0);
        assert_eq!(config.limits.separation, 5.0);
        assert!(!config.force_field_enabled());
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_bad_rotation_sense() {
        let yaml = SAMPLE.replace("rotation: -1", "rotation: 2");
        assert!(serde_yaml::from_str::<ExperimentConfig>(&yaml).is_err());
    }

    #[test]
    fn test_validate_separation_radii() {
        let mut config: ExperimentConfig = serde_yaml::from_str(SAMPLE).unwrap();
        config.r_conflict = 2.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { ref field, .. }) if field == "r_conflict"
        ));
    }

    #[test]
    fn test_validate_path_references() {
        let mut config: ExperimentConfig = serde_yaml::from_str(SAMPLE).unwrap();
        config.swarm.initial_paths = vec![0, 7];
        assert!(config.validate().is_err());

        let mut config: ExperimentConfig = serde_yaml::from_str(SAMPLE).unwrap();
        config.swarm.pass_permissions = vec![BTreeMap::from([(0, vec![9])])];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_vortex_axis() {
        let mut config: ExperimentConfig = serde_yaml::from_str(SAMPLE).unwrap();
        config.vortex = Some(VortexField {
            centre: [0.0, 0.0, -10.0],
            axes: vec![[0.0, 0.0, 0.0]],
        });
        assert!(config.validate().is_err());
    }
}
