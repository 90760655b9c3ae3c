// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0

// Node Configuration Types
//
// Defines the configuration schema for a Helix agent node, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Agent identity and geodetic reference of the flying site
// - Control loop limits and task periods
// - Flight envelope (takeoff altitude, altitude fence, deconfliction ladder)
// - Experiment discovery and batch-run timing
// - MQTT broker endpoint and logging settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::agent::AgentId;
use crate::domain::controller::ControlLimits;
use crate::domain::experiment::ConfigError;
use crate::domain::geodesy::GeodeticPosition;
use crate::domain::protocol::ParameterUpdate;

pub const API_VERSION: &str = "helix.swarm/v1";
pub const KIND: &str = "NodeConfig";

/// Top-level Kubernetes-style node configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfigManifest {
    /// API version (must be "helix.swarm/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "NodeConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: NodeConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable node name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfigSpec {
    pub agent: AgentSettings,

    /// Origin of the local NED frame; its altitude is the site elevation.
    #[serde(default)]
    pub geodetic_reference: GeodeticPosition,

    #[serde(default)]
    pub control: ControlSettings,

    #[serde(default)]
    pub flight: FlightSettings,

    #[serde(default)]
    pub experiments: ExperimentSettings,

    #[serde(default)]
    pub broker: BrokerSettings,

    #[serde(default)]
    pub runner: RunnerSettings,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Swarm-wide unique id, e.g. "P101"
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlSettings {
    /// Maximum commanded speed in m/s
    #[serde(default = "default_max_speed")]
    pub max_speed: f64,

    /// Maximum commanded acceleration in m/s^2
    #[serde(default = "default_max_accel")]
    pub max_accel: f64,

    #[serde(default = "default_control_period", with = "humantime_serde")]
    pub control_period: Duration,

    #[serde(default = "default_publish_period", with = "humantime_serde")]
    pub publish_period: Duration,

    #[serde(default = "default_battery_period", with = "humantime_serde")]
    pub battery_period: Duration,

    /// How long the own link may stay down before the fail-safe hold
    #[serde(default = "default_link_loss_grace", with = "humantime_serde")]
    pub link_loss_grace: Duration,

    /// Lost peers are dropped from the pose table after this long
    #[serde(default = "default_stale_peer_timeout", with = "humantime_serde")]
    pub stale_peer_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightSettings {
    /// Takeoff height above the launch point in metres
    #[serde(default = "default_takeoff_altitude")]
    pub takeoff_altitude: f64,

    #[serde(default)]
    pub altitude_fence: AltitudeFence,

    #[serde(default)]
    pub deconfliction: DeconflictionSettings,

    /// Horizontal tolerance for deconflicted transit legs in metres
    #[serde(default = "default_position_tolerance")]
    pub position_tolerance: f64,

    /// Vertical tolerance for deconflicted transit legs in metres
    #[serde(default = "default_altitude_tolerance")]
    pub altitude_tolerance: f64,

    #[serde(default = "default_maneuver_poll", with = "humantime_serde")]
    pub maneuver_poll: Duration,

    /// Pause between transit legs so the whole swarm reaches each level
    #[serde(default = "default_transit_settle", with = "humantime_serde")]
    pub transit_settle: Duration,

    /// Minimum separation reported by the ground station proximity monitor
    #[serde(default = "default_min_proximity")]
    pub min_proximity: f64,
}

/// Allowed height band (metres above the reference) while following.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AltitudeFence {
    #[serde(default = "default_fence_min")]
    pub min: f64,
    #[serde(default = "default_fence_max")]
    pub max: f64,
}

impl AltitudeFence {
    pub fn contains(&self, height_m: f64) -> bool {
        height_m >= self.min && height_m <= self.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeconflictionSettings {
    /// Ladder spacing in metres
    #[serde(default = "default_deconfliction_step")]
    pub step: f64,
    /// Lowest allowed ladder height above the site
    #[serde(default = "default_deconfliction_min")]
    pub min_height: f64,
    /// Highest allowed ladder height above the site
    #[serde(default = "default_deconfliction_max")]
    pub max_height: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentSettings {
    #[serde(default = "default_experiments_dir")]
    pub directory: PathBuf,

    /// Experiment used when no `current_experiment` message was received
    #[serde(default = "default_experiment_name")]
    pub default: String,
}

/// MQTT broker shared by every agent and the ground station.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSettings {
    #[serde(default = "default_broker_host")]
    pub host: String,

    #[serde(default = "default_broker_port")]
    pub port: u16,

    /// The broker publishes a session's last will after 1.5 keep-alives of silence
    #[serde(default = "default_keep_alive", with = "humantime_serde")]
    pub keep_alive: Duration,

    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Delay between reconnection attempts after the link drops
    #[serde(default = "default_reconnect_delay", with = "humantime_serde")]
    pub reconnect_delay: Duration,
}

/// Timing of batch experiment runs driven from the ground station.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSettings {
    /// How long every agent has to report READY after pre_start
    #[serde(default = "default_ready_timeout", with = "humantime_serde")]
    pub ready_timeout: Duration,

    /// Upper bound on one experiment; repeating paths never report DONE
    #[serde(default = "default_experiment_timeout", with = "humantime_serde")]
    pub experiment_timeout: Duration,

    /// Pause after selecting an experiment and after the closing hold
    #[serde(default = "default_runner_settle", with = "humantime_serde")]
    pub settle: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g. "info", "debug", "helix_swarm=debug")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "compact" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_max_speed() -> f64 {
    3.0
}

fn default_max_accel() -> f64 {
    2.0
}

fn default_control_period() -> Duration {
    Duration::from_millis(100)
}

fn default_publish_period() -> Duration {
    Duration::from_millis(100)
}

fn default_battery_period() -> Duration {
    Duration::from_secs(10)
}

fn default_link_loss_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_stale_peer_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_takeoff_altitude() -> f64 {
    20.0
}

fn default_fence_min() -> f64 {
    5.0
}

fn default_fence_max() -> f64 {
    120.0
}

fn default_deconfliction_step() -> f64 {
    1.0
}

fn default_deconfliction_min() -> f64 {
    10.0
}

fn default_deconfliction_max() -> f64 {
    100.0
}

fn default_position_tolerance() -> f64 {
    1.0
}

fn default_altitude_tolerance() -> f64 {
    0.5
}

fn default_maneuver_poll() -> Duration {
    Duration::from_secs(1)
}

fn default_transit_settle() -> Duration {
    Duration::from_secs(10)
}

fn default_min_proximity() -> f64 {
    2.0
}

fn default_experiments_dir() -> PathBuf {
    PathBuf::from("experiments")
}

fn default_experiment_name() -> String {
    "default".to_string()
}

fn default_broker_host() -> String {
    "localhost".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(5)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_reconnect_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_ready_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_experiment_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_runner_settle() -> Duration {
    Duration::from_secs(5)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            max_speed: default_max_speed(),
            max_accel: default_max_accel(),
            control_period: default_control_period(),
            publish_period: default_publish_period(),
            battery_period: default_battery_period(),
            link_loss_grace: default_link_loss_grace(),
            stale_peer_timeout: default_stale_peer_timeout(),
        }
    }
}

impl Default for AltitudeFence {
    fn default() -> Self {
        Self {
            min: default_fence_min(),
            max: default_fence_max(),
        }
    }
}

impl Default for DeconflictionSettings {
    fn default() -> Self {
        Self {
            step: default_deconfliction_step(),
            min_height: default_deconfliction_min(),
            max_height: default_deconfliction_max(),
        }
    }
}

impl Default for FlightSettings {
    fn default() -> Self {
        Self {
            takeoff_altitude: default_takeoff_altitude(),
            altitude_fence: AltitudeFence::default(),
            deconfliction: DeconflictionSettings::default(),
            position_tolerance: default_position_tolerance(),
            altitude_tolerance: default_altitude_tolerance(),
            maneuver_poll: default_maneuver_poll(),
            transit_settle: default_transit_settle(),
            min_proximity: default_min_proximity(),
        }
    }
}

impl Default for ExperimentSettings {
    fn default() -> Self {
        Self {
            directory: default_experiments_dir(),
            default: default_experiment_name(),
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            keep_alive: default_keep_alive(),
            connect_timeout: default_connect_timeout(),
            reconnect_delay: default_reconnect_delay(),
        }
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            ready_timeout: default_ready_timeout(),
            experiment_timeout: default_experiment_timeout(),
            settle: default_runner_settle(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for NodeConfigSpec {
    fn default() -> Self {
        Self {
            agent: AgentSettings {
                id: "S001".to_string(),
            },
            geodetic_reference: GeodeticPosition::default(),
            control: ControlSettings::default(),
            flight: FlightSettings::default(),
            experiments: ExperimentSettings::default(),
            broker: BrokerSettings::default(),
            runner: RunnerSettings::default(),
            observability: None,
        }
    }
}

impl Default for NodeConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "helix-node".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: NodeConfigSpec::default(),
        }
    }
}

impl NodeConfigSpec {
    pub fn agent_id(&self) -> Result<AgentId, ConfigError> {
        AgentId::new(self.agent.id.clone())
            .map_err(|e| ConfigError::invalid("spec.agent.id", e.to_string()))
    }

    pub fn control_limits(&self) -> ControlLimits {
        ControlLimits {
            max_speed: self.control.max_speed,
            max_accel: self.control.max_accel,
            period: self.control.control_period,
        }
    }

    /// Apply a runtime parameter update. Nothing changes if any value is invalid.
    pub fn apply_parameter_update(&mut self, update: &ParameterUpdate) -> Result<(), ConfigError> {
        let checks = [
            ("max_speed", update.max_speed),
            ("max_accel", update.max_accel),
            ("takeoff_altitude", update.takeoff_altitude),
        ];
        for (field, value) in checks {
            if let Some(v) = value {
                if !(v.is_finite() && v > 0.0) {
                    return Err(ConfigError::invalid(field, "must be finite and > 0"));
                }
            }
        }
        if let Some(v) = update.max_speed {
            self.control.max_speed = v;
        }
        if let Some(v) = update.max_accel {
            self.control.max_accel = v;
        }
        if let Some(v) = update.takeoff_altitude {
            self.flight.takeoff_altitude = v;
        }
        Ok(())
    }
}

impl NodeConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. HELIX_CONFIG_PATH environment variable
    /// 2. ./helix-config.yaml (working directory)
    /// 3. ~/.helix/config.yaml (user home)
    /// 4. /etc/helix/config.yaml (system, Unix)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("HELIX_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./helix-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".helix").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/helix/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // 1. Explicit CLI path (fail if missing/invalid)
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        // 2. Discovery (Env -> Cwd -> Home -> System)
        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("HELIX_AGENT_ID") {
            tracing::info!("Environment override: HELIX_AGENT_ID={}", val);
            self.spec.agent.id = val;
        }

        if let Some(val) = lookup("HELIX_BROKER_HOST") {
            tracing::info!("Environment override: HELIX_BROKER_HOST={}", val);
            self.spec.broker.host = val;
        }

        if let Some(val) = lookup("HELIX_BROKER_PORT") {
            match val.parse::<u16>() {
                Ok(port) => {
                    tracing::info!("Environment override: HELIX_BROKER_PORT={}", port);
                    self.spec.broker.port = port;
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for HELIX_BROKER_PORT: '{}'. Expected a port number. Ignoring.",
                        val
                    );
                }
            }
        }

        if let Some(val) = lookup("HELIX_MAX_SPEED") {
            match val.parse::<f64>() {
                Ok(speed) => {
                    tracing::info!("Environment override: HELIX_MAX_SPEED={}", speed);
                    self.spec.control.max_speed = speed;
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for HELIX_MAX_SPEED: '{}'. Expected a number. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_version != API_VERSION {
            return Err(ConfigError::invalid(
                "apiVersion",
                format!("'{}', must be '{}'", self.api_version, API_VERSION),
            ));
        }
        if self.kind != KIND {
            return Err(ConfigError::invalid(
                "kind",
                format!("'{}', must be '{}'", self.kind, KIND),
            ));
        }
        if self.metadata.name.is_empty() {
            return Err(ConfigError::invalid("metadata.name", "cannot be empty"));
        }

        let spec = &self.spec;
        spec.agent_id()?;

        if !spec.geodetic_reference.is_finite() {
            return Err(ConfigError::invalid("spec.geodetic_reference", "must be finite"));
        }

        let positive = [
            ("spec.control.max_speed", spec.control.max_speed),
            ("spec.control.max_accel", spec.control.max_accel),
            ("spec.flight.takeoff_altitude", spec.flight.takeoff_altitude),
            ("spec.flight.deconfliction.step", spec.flight.deconfliction.step),
            ("spec.flight.position_tolerance", spec.flight.position_tolerance),
            ("spec.flight.altitude_tolerance", spec.flight.altitude_tolerance),
            ("spec.flight.min_proximity", spec.flight.min_proximity),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::invalid(field, "must be finite and > 0"));
            }
        }

        let periods = [
            ("spec.control.control_period", spec.control.control_period),
            ("spec.control.publish_period", spec.control.publish_period),
            ("spec.control.battery_period", spec.control.battery_period),
            ("spec.flight.maneuver_poll", spec.flight.maneuver_poll),
        ];
        for (field, period) in periods {
            if period.is_zero() {
                return Err(ConfigError::invalid(field, "must be greater than zero"));
            }
        }

        let fence = spec.flight.altitude_fence;
        if !(fence.min.is_finite() && fence.max.is_finite() && fence.min < fence.max) {
            return Err(ConfigError::invalid(
                "spec.flight.altitude_fence",
                format!("min ({}) must be below max ({})", fence.min, fence.max),
            ));
        }

        let ladder = spec.flight.deconfliction;
        if ladder.min_height >= ladder.max_height {
            return Err(ConfigError::invalid(
                "spec.flight.deconfliction",
                "min_height must be below max_height",
            ));
        }

        let broker = &spec.broker;
        if broker.host.trim().is_empty() {
            return Err(ConfigError::invalid("spec.broker.host", "cannot be empty"));
        }
        if broker.port == 0 {
            return Err(ConfigError::invalid("spec.broker.port", "must be greater than zero"));
        }
        if broker.keep_alive < Duration::from_secs(5) {
            return Err(ConfigError::invalid("spec.broker.keep_alive", "must be at least 5s"));
        }

        if spec.experiments.default.trim().is_empty() {
            return Err(ConfigError::invalid("spec.experiments.default", "cannot be empty"));
        }

        if let Some(obs) = &spec.observability {
            if !matches!(obs.logging.format.as_str(), "compact" | "json") {
                return Err(ConfigError::invalid(
                    "spec.observability.logging.format",
                    format!("'{}', expected compact or json", obs.logging.format),
                ));
            }
        }

        Ok(())
    }
}
