// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Agent node commands
//!
//! Commands: run

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use helix_core::domain::geodesy::LocalFrame;
use helix_core::domain::geometry::Vec3;
use helix_core::domain::node_config::{NodeConfigManifest, NodeConfigSpec};
use helix_core::infrastructure::event_bus::EventBus;
use helix_core::infrastructure::mqtt::MqttTransport;
use helix_core::infrastructure::sim_vehicle::SimulatedVehicle;
use helix_swarm::application::AgentNode;

use super::simulate::spawn_event_printer;

#[derive(Subcommand)]
pub enum AgentCommand {
    /// Run one agent node on the MQTT broker, flying a simulated vehicle
    Run {
        /// Agent id (overrides the configured id)
        #[arg(value_name = "ID")]
        id: Option<String>,

        /// Launch point as NORTH,EAST metres from the geodetic reference
        #[arg(long, value_name = "N,E", value_parser = parse_launch, default_value = "0,0")]
        launch: (f64, f64),

        /// Broker host (overrides the configured host)
        #[arg(long)]
        host: Option<String>,

        /// Broker port (overrides the configured port)
        #[arg(long)]
        port: Option<u16>,
    },
}

fn parse_launch(raw: &str) -> Result<(f64, f64), String> {
    let (north, east) = raw
        .split_once(',')
        .ok_or_else(|| format!("expected N,E, got '{}'", raw))?;
    let parse = |value: &str| {
        value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| format!("invalid coordinate '{}'", value))
    };
    Ok((parse(north)?, parse(east)?))
}

pub async fn handle_command(command: AgentCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        AgentCommand::Run {
            id,
            launch,
            host,
            port,
        } => {
            let config = NodeConfigManifest::load_or_default(config_override)
                .context("Failed to load configuration")?;
            let settings = resolve(config.spec, id, host, port);
            run(settings, launch).await
        }
    }
}

fn resolve(
    mut settings: NodeConfigSpec,
    id: Option<String>,
    host: Option<String>,
    port: Option<u16>,
) -> NodeConfigSpec {
    if let Some(id) = id {
        settings.agent.id = id;
    }
    if let Some(host) = host {
        settings.broker.host = host;
    }
    if let Some(port) = port {
        settings.broker.port = port;
    }
    settings
}

async fn run(settings: NodeConfigSpec, launch: (f64, f64)) -> Result<()> {
    let transport = MqttTransport::new(settings.broker.clone());
    let endpoint = transport.endpoint();
    let events = EventBus::with_default_capacity();
    let cancel = CancellationToken::new();
    let printer = spawn_event_printer(events.subscribe(), cancel.child_token());

    let frame = LocalFrame::new(settings.geodetic_reference);
    let vehicle = SimulatedVehicle::spawn(
        frame,
        Vec3::new(launch.0, launch.1, 0.0),
        cancel.child_token(),
    );
    let node = AgentNode::new(settings, Arc::new(vehicle), Arc::new(transport), events)
        .context("Invalid agent settings")?;
    let handle = node
        .start()
        .await
        .with_context(|| format!("Failed to join the swarm on {}", endpoint))?;
    println!(
        "{}",
        format!("Agent {} joined the swarm on {}", node.id(), endpoint).green()
    );
    println!("{}", "Press Ctrl-C to stop".dimmed());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    println!("{}", "Shutting down".yellow());

    handle.shutdown().await?;
    cancel.cancel();
    let _ = printer.await;
    Ok(())
}
