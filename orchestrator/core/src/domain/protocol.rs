// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Telemetry & Command Topics
//!
//! Every message exchanged between agents and the ground station travels on
//! one of the topics below. Topic strings are built and parsed only here.
//!
//! | Topic | Payload |
//! |-------|---------|
//! | `{id}/T` | 10 big-endian `f32`: lat, lon, alt, N, E, D, vN, vE, vD, heading |
//! | `{id}/B` | big-endian `i16` battery percent |
//! | `{id}/flight_mode` | mode name |
//! | `{id}/telemetry/arm_status` | `true` / `false` |
//! | `detection` | bare agent id |
//! | `commands/{id}`, `commands` | command name |
//! | `emergency_stop` | ignored |
//! | `{id}/home/altitude` | decimal metres AMSL |
//! | `{id}/connection_status` | `Connected` / `Disconnected` (retained) |
//! | `{id}/current_experiment` | experiment name |
//! | `{id}/update_parameters` | JSON [`ParameterUpdate`] |
//! | `{id}/errors` | free text |
//! | `{id}/status` | `READY` after pre-start, `DONE` at the end of a path |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::agent::AgentId;

pub const DETECTION: &str = "detection";
pub const BROADCAST_COMMANDS: &str = "commands";
pub const EMERGENCY_STOP: &str = "emergency_stop";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("unrecognised topic '{0}'")]
    UnknownTopic(String),

    #[error("invalid payload on '{topic}': {reason}")]
    InvalidPayload { topic: String, reason: String },
}

impl ProtocolError {
    pub fn invalid_payload(topic: &Topic, reason: impl Into<String>) -> Self {
        ProtocolError::InvalidPayload {
            topic: topic.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Telemetry(AgentId),
    Battery(AgentId),
    FlightMode(AgentId),
    ArmStatus(AgentId),
    Detection,
    Command(AgentId),
    BroadcastCommand,
    EmergencyStop,
    HomeAltitude(AgentId),
    ConnectionStatus(AgentId),
    CurrentExperiment(AgentId),
    UpdateParameters(AgentId),
    Errors(AgentId),
    Status(AgentId),
}

impl Topic {
    /// The agent a per-agent topic belongs to.
    pub fn agent(&self) -> Option<&AgentId> {
        match self {
            Topic::Telemetry(id)
            | Topic::Battery(id)
            | Topic::FlightMode(id)
            | Topic::ArmStatus(id)
            | Topic::Command(id)
            | Topic::HomeAltitude(id)
            | Topic::ConnectionStatus(id)
            | Topic::CurrentExperiment(id)
            | Topic::UpdateParameters(id)
            | Topic::Errors(id)
            | Topic::Status(id) => Some(id),
            Topic::Detection | Topic::BroadcastCommand | Topic::EmergencyStop => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Telemetry(id) => write!(f, "{}/T", id),
            Topic::Battery(id) => write!(f, "{}/B", id),
            Topic::FlightMode(id) => write!(f, "{}/flight_mode", id),
            Topic::ArmStatus(id) => write!(f, "{}/telemetry/arm_status", id),
            Topic::Detection => f.write_str(DETECTION),
            Topic::Command(id) => write!(f, "{}/{}", BROADCAST_COMMANDS, id),
            Topic::BroadcastCommand => f.write_str(BROADCAST_COMMANDS),
            Topic::EmergencyStop => f.write_str(EMERGENCY_STOP),
            Topic::HomeAltitude(id) => write!(f, "{}/home/altitude", id),
            Topic::ConnectionStatus(id) => write!(f, "{}/connection_status", id),
            Topic::CurrentExperiment(id) => write!(f, "{}/current_experiment", id),
            Topic::UpdateParameters(id) => write!(f, "{}/update_parameters", id),
            Topic::Errors(id) => write!(f, "{}/errors", id),
            Topic::Status(id) => write!(f, "{}/status", id),
        }
    }
}

impl FromStr for Topic {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || ProtocolError::UnknownTopic(s.to_string());
        match s {
            DETECTION => return Ok(Topic::Detection),
            BROADCAST_COMMANDS => return Ok(Topic::BroadcastCommand),
            EMERGENCY_STOP => return Ok(Topic::EmergencyStop),
            _ => {}
        }

        if let Some(id) = s.strip_prefix("commands/") {
            return AgentId::new(id).map(Topic::Command).map_err(|_| unknown());
        }

        let (id, rest) = s.split_once('/').ok_or_else(unknown)?;
        let id = AgentId::new(id).map_err(|_| unknown())?;
        match rest {
            "T" => Ok(Topic::Telemetry(id)),
            "B" => Ok(Topic::Battery(id)),
            "flight_mode" => Ok(Topic::FlightMode(id)),
            "telemetry/arm_status" => Ok(Topic::ArmStatus(id)),
            "home/altitude" => Ok(Topic::HomeAltitude(id)),
            "connection_status" => Ok(Topic::ConnectionStatus(id)),
            "current_experiment" => Ok(Topic::CurrentExperiment(id)),
            "update_parameters" => Ok(Topic::UpdateParameters(id)),
            "errors" => Ok(Topic::Errors(id)),
            "status" => Ok(Topic::Status(id)),
            _ => Err(unknown()),
        }
    }
}

/// Session state as published on `{id}/connection_status` and as reported
/// by a transport's link monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Disconnected => "Disconnected",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Connected" => Ok(ConnectionStatus::Connected),
            "Disconnected" => Ok(ConnectionStatus::Disconnected),
            other => Err(format!("expected Connected or Disconnected, got '{}'", other)),
        }
    }
}

/// Experiment progress as published on `{id}/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentStatus {
    /// Pre-start transit complete; the agent accepts `Experiment`.
    Ready,
    /// The agent has passed the last waypoint of a non-repeating path.
    Done,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Ready => "READY",
            AgentStatus::Done => "DONE",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "READY" => Ok(AgentStatus::Ready),
            "DONE" => Ok(AgentStatus::Done),
            other => Err(format!("expected READY or DONE, got '{}'", other)),
        }
    }
}

/// Partial override of runtime-tunable node parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_accel: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub takeoff_altitude: Option<f64>,
}

impl ParameterUpdate {
    pub fn is_empty(&self) -> bool {
        self.max_speed.is_none() && self.max_accel.is_none() && self.takeoff_altitude.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> AgentId {
        AgentId::new(s).unwrap()
    }

    #[test]
    fn test_topic_strings() {
        let p = id("P101");
        assert_eq!(Topic::Telemetry(p.clone()).to_string(), "P101/T");
        assert_eq!(Topic::Battery(p.clone()).to_string(), "P101/B");
        assert_eq!(Topic::ArmStatus(p.clone()).to_string(), "P101/telemetry/arm_status");
        assert_eq!(Topic::Command(p.clone()).to_string(), "commands/P101");
        assert_eq!(Topic::HomeAltitude(p.clone()).to_string(), "P101/home/altitude");
        assert_eq!(Topic::ConnectionStatus(p).to_string(), "P101/connection_status");
        assert_eq!(Topic::BroadcastCommand.to_string(), "commands");
    }

    #[test]
    fn test_topic_parse_roundtrip() {
        let p = id("S003");
        let topics = [
            Topic::Telemetry(p.clone()),
            Topic::Battery(p.clone()),
            Topic::FlightMode(p.clone()),
            Topic::ArmStatus(p.clone()),
            Topic::Detection,
            Topic::Command(p.clone()),
            Topic::BroadcastCommand,
            Topic::EmergencyStop,
            Topic::HomeAltitude(p.clone()),
            Topic::ConnectionStatus(p.clone()),
            Topic::CurrentExperiment(p.clone()),
            Topic::UpdateParameters(p.clone()),
            Topic::Errors(p.clone()),
            Topic::Status(p),
        ];
        for topic in topics {
            assert_eq!(topic.to_string().parse::<Topic>().unwrap(), topic);
        }
    }

    #[test]
    fn test_unknown_topics() {
        assert!("P101/unknown".parse::<Topic>().is_err());
        assert!("P101".parse::<Topic>().is_err());
        assert!("/T".parse::<Topic>().is_err());
    }

    #[test]
    fn test_parameter_update_rejects_unknown_fields() {
        let update: ParameterUpdate = serde_json::from_str(r#"{"max_speed": 2.5}"#).unwrap();
        assert_eq!(update.max_speed, Some(2.5));
        assert!(update.max_accel.is_none());
        assert!(serde_json::from_str::<ParameterUpdate>(r#"{"speed": 1}"#).is_err());
    }

    #[test]
    fn test_agent_status() {
        assert_eq!(Topic::Status(id("S001")).to_string(), "S001/status");
        assert_eq!("READY".parse(), Ok(AgentStatus::Ready));
        assert_eq!("DONE\n".parse(), Ok(AgentStatus::Done));
        assert!("ready".parse::<AgentStatus>().is_err());
        assert_eq!(AgentStatus::Done.to_string(), "DONE");
    }

    #[test]
    fn test_connection_status_parse() {
        assert_eq!("Connected".parse(), Ok(ConnectionStatus::Connected));
        assert_eq!("Disconnected\n".parse(), Ok(ConnectionStatus::Disconnected));
        assert!("up".parse::<ConnectionStatus>().is_err());
    }
}
