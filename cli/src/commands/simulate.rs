// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Simulated swarm flight
//!
//! Spawns one agent node per simulated vehicle on an in-memory bus, plus a
//! ground station, and walks the swarm through arm, takeoff, pre_start and
//! the experiment before sending everyone home.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use helix_core::domain::agent::AgentId;
use helix_core::domain::events::SwarmEvent;
use helix_core::domain::geodesy::LocalFrame;
use helix_core::domain::geometry::Vec3;
use helix_core::domain::mission::{Command, MissionState};
use helix_core::domain::node_config::{NodeConfigManifest, NodeConfigSpec};
use helix_core::domain::protocol::AgentStatus;
use helix_core::infrastructure::broker::InMemoryBroker;
use helix_core::infrastructure::event_bus::{EventBus, EventBusError, EventReceiver};
use helix_core::infrastructure::experiment_loader::LoadedExperiment;
use helix_core::infrastructure::sim_vehicle::SimulatedVehicle;
use helix_swarm::application::{AgentNode, GroundStation, NodeHandle};

const POLL: Duration = Duration::from_millis(200);

#[derive(Args)]
pub struct SimulateArgs {
    /// Number of simulated agents
    #[arg(short = 'n', long, default_value_t = 3)]
    agents: usize,

    /// Experiment file (default: the configured default experiment)
    #[arg(short, long, value_name = "FILE")]
    experiment: Option<PathBuf>,

    /// Seconds to fly the experiment before returning
    #[arg(short, long, default_value_t = 60)]
    duration: u64,

    /// East spacing between launch points in metres
    #[arg(long, default_value_t = 6.0)]
    spacing: f64,

    /// Agent id prefix; ids are numbered from 101
    #[arg(long, default_value = "P")]
    prefix: String,

    /// Seconds allowed for each mission phase to complete
    #[arg(long, default_value_t = 120)]
    phase_timeout: u64,
}

pub async fn execute(args: SimulateArgs, config_override: Option<PathBuf>) -> Result<()> {
    if args.agents == 0 {
        anyhow::bail!("--agents must be at least 1");
    }
    let config = NodeConfigManifest::load_or_default(config_override)
        .context("Failed to load configuration")?;
    let mut base = config.spec;
    if let Some(path) = &args.experiment {
        point_at_experiment(&mut base, path)?;
    }

    // Load once up front so a broken experiment fails before anything moves.
    let experiment =
        LoadedExperiment::load_named(&base.experiments.directory, &base.experiments.default)?;
    println!(
        "{}",
        format!(
            "Simulating {} agents on '{}' ({} paths)",
            args.agents,
            experiment.config.name,
            experiment.corridor.len()
        )
        .bold()
    );

    let broker = InMemoryBroker::new();
    let events = EventBus::with_default_capacity();
    let vehicles = CancellationToken::new();
    let printer = spawn_event_printer(events.subscribe(), vehicles.child_token());

    let station = GroundStation::new(&base, Arc::new(broker.client()), events.clone())?;
    station.start().await?;

    let frame = LocalFrame::new(base.geodetic_reference);
    let mut handles: Vec<NodeHandle> = Vec::with_capacity(args.agents);
    for rank in 0..args.agents {
        let mut settings = base.clone();
        settings.agent.id = format!("{}{}", args.prefix, 101 + rank);
        let start = Vec3::new(0.0, rank as f64 * args.spacing, 0.0);
        let vehicle = SimulatedVehicle::spawn(frame, start, vehicles.child_token());
        let node = AgentNode::new(
            settings,
            Arc::new(vehicle),
            Arc::new(broker.client()),
            events.clone(),
        )
        .context("Invalid agent settings")?;
        handles.push(node.start().await?);
    }
    let nodes: Vec<Arc<AgentNode>> = handles.iter().map(|h| h.node().clone()).collect();

    let result = fly(&args, &base, &station, &nodes).await;

    print_summary(&nodes);
    for handle in handles {
        handle.shutdown().await?;
    }
    station.shutdown().await?;
    vehicles.cancel();
    let _ = printer.await;
    result
}

/// Use `path` as the experiment for every node.
fn point_at_experiment(settings: &mut NodeConfigSpec, path: &std::path::Path) -> Result<()> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Invalid experiment path {:?}", path))?;
    settings.experiments.directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    settings.experiments.default = name.to_string();
    Ok(())
}

async fn fly(
    args: &SimulateArgs,
    settings: &NodeConfigSpec,
    station: &Arc<GroundStation>,
    nodes: &[Arc<AgentNode>],
) -> Result<()> {
    let phase_timeout = Duration::from_secs(args.phase_timeout);
    let expected = nodes.len();
    wait_until("discovery", phase_timeout, || {
        nodes.iter().all(|n| n.table().len() == expected)
            && station.table().connected_ids().len() == expected
    })
    .await?;

    station.send_command(None, Command::Arm).await?;
    tokio::time::sleep(Duration::from_secs(1)).await;

    station.send_command(None, Command::Takeoff).await?;
    let target = settings.flight.takeoff_altitude * 0.9;
    wait_until("takeoff", phase_timeout, || {
        nodes.iter().all(|n| {
            n.mission_state() == MissionState::Holding
                && n
                    .table()
                    .get(n.id())
                    .is_some_and(|pose| -pose.position.z >= target)
        })
    })
    .await?;

    let ids: Vec<AgentId> = nodes.iter().map(|n| n.id().clone()).collect();
    station.clear_statuses();
    station.send_command(None, Command::PreStart).await?;
    if !station
        .wait_for_status(&ids, AgentStatus::Ready, phase_timeout)
        .await
    {
        anyhow::bail!("Timed out waiting for pre_start");
    }
    println!("{} pre_start", "✓".green());

    station.send_command(None, Command::Experiment).await?;
    info!(duration_secs = args.duration, "Experiment running");
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.duration)) => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            println!("{}", "Interrupted, returning early".yellow());
        }
    }

    let assigned = station.return_all().await?;
    println!("{}", "Return altitudes:".bold());
    for (id, altitude) in &assigned {
        println!("  {:<8} {:>9.2} m", id.to_string(), altitude);
    }
    wait_until("return", phase_timeout, || {
        nodes
            .iter()
            .all(|n| n.mission_state() == MissionState::Returning)
    })
    .await
}

async fn wait_until(phase: &str, timeout: Duration, mut done: impl FnMut() -> bool) -> Result<()> {
    let poll = async {
        while !done() {
            tokio::time::sleep(POLL).await;
        }
    };
    tokio::time::timeout(timeout, poll)
        .await
        .with_context(|| format!("Timed out waiting for {}", phase))?;
    println!("{} {}", "✓".green(), phase);
    Ok(())
}

pub(crate) fn spawn_event_printer(
    mut events: EventReceiver,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(event) => {
                    if let Some(line) = describe(&event) {
                        println!("{}", line);
                    }
                }
                Err(EventBusError::Lagged(_)) | Err(EventBusError::Empty) => continue,
                Err(EventBusError::Closed) => break,
            }
        }
    })
}

/// One console line per event worth showing; routine discovery chatter is
/// left to the logs.
fn describe(event: &SwarmEvent) -> Option<String> {
    let line = match event {
        SwarmEvent::MissionStateChanged {
            agent_id, from, to, ..
        } => format!("{} {} -> {}", agent_id.to_string().cyan(), from, to),
        SwarmEvent::LaneSwitched {
            agent_id,
            from_path,
            to_path,
            to_index,
            ..
        } => format!(
            "{} switched lane {} -> {} at waypoint {}",
            agent_id.to_string().cyan(),
            from_path,
            to_path,
            to_index
        ),
        SwarmEvent::ProximityWarning { a, b, distance, .. } => format!(
            "{}",
            format!("proximity: {} and {} at {:.2} m", a, b, distance).yellow()
        ),
        SwarmEvent::AltitudeFenceBreached {
            agent_id, height_m, ..
        } => format!(
            "{}",
            format!("{} left the altitude fence at {:.1} m", agent_id, height_m).red()
        ),
        SwarmEvent::CommandRejected {
            agent_id, reason, ..
        } => format!("{}", format!("{} rejected command: {}", agent_id, reason).red()),
        SwarmEvent::OwnLinkLost { agent_id, .. } => {
            format!("{}", format!("{} lost its link", agent_id).red())
        }
        _ => return None,
    };
    Some(line)
}

fn print_summary(nodes: &[Arc<AgentNode>]) {
    println!();
    println!("{}", "Final state:".bold());
    for node in nodes {
        let position = node
            .table()
            .get(node.id())
            .map(|pose| pose.position)
            .unwrap_or_else(Vec3::zeros);
        let lane = node
            .lane()
            .map(|(path, index)| format!("path {} waypoint {}", path, index))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<8} {:<10} N {:>8.1} E {:>8.1} H {:>6.1}  {}",
            node.id().to_string(),
            node.mission_state().to_string(),
            position.x,
            position.y,
            -position.z,
            lane
        );
    }
}
