// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the Helix CLI

pub mod agent;
pub mod config;
pub mod deconflict;
pub mod experiment;
pub mod ground;
pub mod simulate;

pub use self::agent::AgentCommand;
pub use self::config::ConfigCommand;
pub use self::deconflict::DeconflictArgs;
pub use self::experiment::ExperimentCommand;
pub use self::ground::{BrokerArgs, GroundCommand};
pub use self::simulate::SimulateArgs;
