// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod broker;
pub mod codec;
pub mod event_bus;
pub mod experiment_loader;
pub mod mqtt;
pub mod sim_vehicle;

pub use broker::{BrokerClient, InMemoryBroker};
pub use event_bus::{EventBus, EventBusError};
pub use experiment_loader::LoadedExperiment;
pub use mqtt::MqttTransport;
