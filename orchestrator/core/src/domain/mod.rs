// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod agent;
pub mod controller;
pub mod corridor;
pub mod driver;
pub mod events;
pub mod experiment;
pub mod geodesy;
pub mod geometry;
pub mod mission;
pub mod node_config;
pub mod pose;
pub mod protocol;
pub mod transport;
