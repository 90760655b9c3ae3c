// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Domain Layer
//!
//! Pure functions every agent evaluates on its own replica of swarm state.
//!
//! | Module | Key Items |
//! |--------|-----------|
//! | [`deconfliction`] | `deconflict`, `DeconflictionParams` |
//! | [`bootstrap`] | `priority_order`, `assign_initial_state`, `InitialAssignment` |
//! | [`proximity`] | `proximity_check`, `ProximityAlert` |

pub mod bootstrap;
pub mod deconfliction;
pub mod proximity;

pub use bootstrap::{assign_initial_state, bootstrap_order, priority_order, InitialAssignment};
pub use deconfliction::{deconflict, deconflict_map, DeconflictionParams};
pub use proximity::{proximity_check, ProximityAlert};
