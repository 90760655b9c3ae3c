// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identifier of a swarm member, e.g. `P101` (real vehicle) or `S003` (simulated).
///
/// The digits embedded in the id define the agent's priority rank; see
/// [`AgentId::numeric_part`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AgentIdError {
    #[error("agent id cannot be empty")]
    Empty,
    #[error("agent id '{0}' must not contain '/', '+' or '#'")]
    ReservedCharacter(String),
}

impl AgentId {
    pub fn new(id: impl Into<String>) -> Result<Self, AgentIdError> {
        let id = id.into();
        if id.is_empty() {
            return Err(AgentIdError::Empty);
        }
        if id.contains(['/', '+', '#']) {
            return Err(AgentIdError::ReservedCharacter(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Integer formed by the decimal digits of the id (`P101` -> 101, `S003` -> 3).
    ///
    /// Ids without digits rank as 0. Overlong digit runs saturate.
    pub fn numeric_part(&self) -> u64 {
        self.0
            .chars()
            .filter_map(|c| c.to_digit(10))
            .fold(0u64, |acc, d| acc.saturating_mul(10).saturating_add(d as u64))
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AgentId {
    type Err = AgentIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.trim())
    }
}

impl AsRef<str> for AgentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Autopilot flight mode as reported by the vehicle driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightMode {
    #[default]
    Unknown,
    Ready,
    Takeoff,
    Hold,
    Offboard,
    Land,
    ReturnToLaunch,
    Other(String),
}

impl fmt::Display for FlightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlightMode::Unknown => f.write_str("UNKNOWN"),
            FlightMode::Ready => f.write_str("READY"),
            FlightMode::Takeoff => f.write_str("TAKEOFF"),
            FlightMode::Hold => f.write_str("HOLD"),
            FlightMode::Offboard => f.write_str("OFFBOARD"),
            FlightMode::Land => f.write_str("LAND"),
            FlightMode::ReturnToLaunch => f.write_str("RETURN_TO_LAUNCH"),
            FlightMode::Other(name) => f.write_str(name),
        }
    }
}

impl From<&str> for FlightMode {
    fn from(s: &str) -> Self {
        match s {
            "UNKNOWN" => FlightMode::Unknown,
            "READY" => FlightMode::Ready,
            "TAKEOFF" => FlightMode::Takeoff,
            "HOLD" => FlightMode::Hold,
            "OFFBOARD" => FlightMode::Offboard,
            "LAND" => FlightMode::Land,
            "RETURN_TO_LAUNCH" => FlightMode::ReturnToLaunch,
            other => FlightMode::Other(other.to_string()),
        }
    }
}
