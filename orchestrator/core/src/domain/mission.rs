// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Top-level mission state machine.
//!
//! ```text
//! Idle --takeoff--> Holding --pre_start--> PreStart --Experiment--> Following
//!                      ^                                               |
//!                      +-------------------- hold ---------------------+
//! Following/Holding/PreStart --return--> Returning
//! any --land--> Landed      any --hold--> Holding
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::protocol::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionState {
    #[default]
    Idle,
    PreStart,
    Following,
    Holding,
    Returning,
    Landed,
}

impl fmt::Display for MissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MissionState::Idle => "idle",
            MissionState::PreStart => "pre_start",
            MissionState::Following => "following",
            MissionState::Holding => "holding",
            MissionState::Returning => "returning",
            MissionState::Landed => "landed",
        };
        f.write_str(name)
    }
}

/// Operator command as carried on `commands/{id}` and `commands`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    Arm,
    Takeoff,
    PreStart,
    Experiment,
    Hold,
    Return,
    Land,
}

impl Command {
    pub const ALL: [Command; 7] = [
        Command::Arm,
        Command::Takeoff,
        Command::PreStart,
        Command::Experiment,
        Command::Hold,
        Command::Return,
        Command::Land,
    ];

    /// Wire name, matched exactly (case-sensitive).
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Arm => "arm",
            Command::Takeoff => "takeoff",
            Command::PreStart => "pre_start",
            Command::Experiment => "Experiment",
            Command::Hold => "hold",
            Command::Return => "return",
            Command::Land => "land",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownCommand(s.to_string()))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MissionError {
    #[error("command '{command}' is not valid in state '{state}'")]
    InvalidTransition { state: MissionState, command: Command },
    #[error("no mission prepared; send pre_start first")]
    NotPrepared,
}

impl MissionState {
    /// State reached by applying `command`, or an error if the command is
    /// not accepted here. `hold` and `land` are accepted everywhere.
    pub fn apply(self, command: Command) -> Result<MissionState, MissionError> {
        use MissionState::*;

        let next = match (self, command) {
            (_, Command::Hold) => Some(Holding),
            (_, Command::Land) => Some(Landed),
            (Idle | Landed, Command::Arm) => Some(Idle),
            (Idle, Command::Takeoff) => Some(Holding),
            (Idle | Holding | PreStart, Command::PreStart) => Some(PreStart),
            (PreStart | Holding, Command::Experiment) => Some(Following),
            (PreStart | Following | Holding, Command::Return) => Some(Returning),
            _ => None,
        };
        next.ok_or(MissionError::InvalidTransition {
            state: self,
            command,
        })
    }

    pub fn is_airborne_task(self) -> bool {
        matches!(self, MissionState::PreStart | MissionState::Following | MissionState::Returning)
    }
}
