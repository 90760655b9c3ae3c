// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Application Layer
//!
//! Runtime services built on the core capabilities: the agent node that
//! flies one vehicle, the operator ground station with its batch experiment
//! runner, and the telemetry and maneuver tasks the node is assembled from.

pub mod agent_node;
pub mod experiment_runner;
pub mod ground_station;
pub mod maneuver;
pub mod telemetry;

pub use agent_node::{AgentNode, NodeHandle};
pub use experiment_runner::{ExperimentReport, ExperimentRunner, RunOutcome};
pub use ground_station::{GroundStation, GROUND_STATION_ID};
pub use maneuver::{Maneuver, ManeuverOutcome, TransitSettings};
