// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # `helix-swarm`: Swarm Coordination and Agent Runtime
//!
//! Everything that needs more than one agent to make sense: the shared
//! priority order, altitude deconfliction, the proximity monitor, and the
//! node runtime that joins a vehicle driver to the swarm bus.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `priority_order`, `assign_initial_state`, `deconflict`, `proximity_check` |
//! | [`application`] | Application | `AgentNode`, `GroundStation`, `ExperimentRunner`, telemetry and maneuver tasks |
//!
//! ## Key Concepts
//!
//! - **No coordinator**: each agent computes bootstrap order and altitude
//!   ladders from its own pose table replica. Agreement follows from the
//!   functions being deterministic, not from a consensus round.
//! - **Supersession**: every accepted command cancels the task started by
//!   the previous one, so at most one of pre-start transit, control loop or
//!   return-home is ever flying the vehicle.
//! - **Fail-safe hold**: actuation errors, a lost bus link past its grace
//!   period and altitude fence breaches all end in Hold.

pub mod application;
pub mod domain;

pub use domain::*;
