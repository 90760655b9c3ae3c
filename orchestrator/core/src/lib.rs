// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Helix Core
//!
//! Corridor model, path-following controller and the replicated-telemetry
//! protocol shared by every Helix agent.
//!
//! # Architecture
//!
//! - **domain:** pure types and algorithms (corridor geometry, controller,
//!   mission state machine, topic grammar, driver and transport traits)
//! - **infrastructure:** adapters (wire codec, in-memory broker, simulated
//!   vehicle, experiment loader, event bus)

pub mod domain;
pub mod infrastructure;

pub use domain::*;
