// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Ground station commands
//!
//! Commands: monitor, command, stop, return, run
//!
//! Every command joins the MQTT broker as the ground station, listens for a
//! short discovery window so the pose replica fills up, and then acts.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use helix_core::domain::agent::AgentId;
use helix_core::domain::mission::Command;
use helix_core::domain::node_config::{NodeConfigManifest, NodeConfigSpec};
use helix_core::infrastructure::event_bus::EventBus;
use helix_core::infrastructure::mqtt::MqttTransport;
use helix_swarm::application::{ExperimentRunner, GroundStation, RunOutcome};

use super::simulate::spawn_event_printer;

#[derive(Args)]
pub struct BrokerArgs {
    /// Broker host (overrides the configured host)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Broker port (overrides the configured port)
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Seconds to listen for agents before acting
    #[arg(long, global = true, default_value_t = 3)]
    discover: u64,
}

#[derive(Subcommand)]
pub enum GroundCommand {
    /// Print the swarm's pose table and events until Ctrl-C
    Monitor {
        /// Seconds between table refreshes
        #[arg(long, default_value_t = 2)]
        interval: u64,
    },

    /// Send a mission command to one agent or the whole swarm
    Command {
        /// arm, takeoff, pre_start, experiment, hold, return or land
        #[arg(value_name = "COMMAND", value_parser = parse_command)]
        command: Command,

        /// Target agent (default: broadcast)
        #[arg(long)]
        agent: Option<String>,
    },

    /// Emergency stop: every agent holds immediately
    Stop,

    /// Deconflict return altitudes and send every connected agent home
    Return,

    /// Fly experiments one after another, waiting for READY and DONE
    Run {
        /// Experiment names, in order
        #[arg(value_name = "EXPERIMENT", required = true)]
        experiments: Vec<String>,

        /// Agents taking part (default: every connected agent)
        #[arg(long, value_delimiter = ',')]
        agents: Vec<String>,
    },
}

fn parse_command(raw: &str) -> Result<Command, String> {
    Command::ALL
        .into_iter()
        .find(|c| c.as_str().eq_ignore_ascii_case(raw.trim()))
        .ok_or_else(|| format!("unknown command '{}'", raw))
}

fn parse_agents(raw: &[String]) -> Result<Vec<AgentId>> {
    raw.iter()
        .map(|id| AgentId::new(id.trim()).with_context(|| format!("Invalid agent id '{}'", id)))
        .collect()
}

pub async fn handle_command(
    command: GroundCommand,
    broker: BrokerArgs,
    config_override: Option<PathBuf>,
) -> Result<()> {
    let config = NodeConfigManifest::load_or_default(config_override)
        .context("Failed to load configuration")?;
    let settings = resolve(config.spec, &broker);
    let events = EventBus::with_default_capacity();
    let transport = MqttTransport::new(settings.broker.clone());
    let endpoint = transport.endpoint();
    let station = GroundStation::new(&settings, Arc::new(transport), events.clone())?;
    station
        .start()
        .await
        .with_context(|| format!("Failed to reach the broker at {}", endpoint))?;
    tokio::time::sleep(Duration::from_secs(broker.discover)).await;

    let result = match command {
        GroundCommand::Monitor { interval } => {
            monitor(&station, &events, Duration::from_secs(interval.max(1))).await
        }
        GroundCommand::Command { command, agent } => {
            let target = agent.map(|id| AgentId::new(&id)).transpose()?;
            station.send_command(target.as_ref(), command).await?;
            let scope = target.map_or_else(|| "all agents".to_string(), |id| id.to_string());
            println!("{} sent {} to {}", "✓".green(), command, scope);
            Ok(())
        }
        GroundCommand::Stop => {
            station.emergency_stop().await?;
            println!("{}", "Emergency stop sent".red().bold());
            Ok(())
        }
        GroundCommand::Return => {
            let assigned = station.return_all().await?;
            if assigned.is_empty() {
                println!("{}", "No connected agents to return".yellow());
            }
            for (id, altitude) in &assigned {
                println!("  {:<8} {:>9.2} m", id.to_string(), altitude);
            }
            Ok(())
        }
        GroundCommand::Run {
            experiments,
            agents,
        } => run(&station, &settings, &experiments, &agents).await,
    };

    station.shutdown().await?;
    result
}

fn resolve(mut settings: NodeConfigSpec, broker: &BrokerArgs) -> NodeConfigSpec {
    if let Some(host) = &broker.host {
        settings.broker.host = host.clone();
    }
    if let Some(port) = broker.port {
        settings.broker.port = port;
    }
    settings
}

async fn monitor(
    station: &Arc<GroundStation>,
    events: &EventBus,
    interval: Duration,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let printer = spawn_event_printer(events.subscribe(), cancel.child_token());
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
            _ = ticker.tick() => print_table(station),
        }
    }
    cancel.cancel();
    let _ = printer.await;
    Ok(())
}

fn print_table(station: &GroundStation) {
    let snapshot = station.table().snapshot();
    println!();
    let header = format!(
        "{:<8} {:<6} {:<10} {:>8} {:>8} {:>7} {:>6}",
        "AGENT", "LINK", "MODE", "N", "E", "H", "BATT"
    );
    println!("{}", header.bold());
    for (id, pose) in &snapshot {
        let link = if pose.is_connected() { "up".green() } else { "down".red() };
        let battery = pose
            .battery_percent
            .map(|b| format!("{:.0}%", b))
            .unwrap_or_else(|| "-".to_string());
        if pose.has_fix() {
            println!(
                "{:<8} {:<6} {:<10} {:>8.1} {:>8.1} {:>7.1} {:>6}",
                id.to_string(),
                link,
                pose.flight_mode.to_string(),
                pose.position.x,
                pose.position.y,
                -pose.position.z,
                battery
            );
        } else {
            println!(
                "{:<8} {:<6} {:<10} {:>26} {:>6}",
                id.to_string(),
                link,
                "-",
                "no fix",
                battery
            );
        }
    }
    for alert in station.proximity_alerts() {
        println!(
            "{}",
            format!(
                "proximity: {} and {} at {:.2} m",
                alert.a, alert.b, alert.distance
            )
            .yellow()
        );
    }
}

async fn run(
    station: &Arc<GroundStation>,
    settings: &NodeConfigSpec,
    experiments: &[String],
    agents: &[String],
) -> Result<()> {
    let agents = if agents.is_empty() {
        station.table().connected_ids()
    } else {
        parse_agents(agents)?
    };
    if agents.is_empty() {
        anyhow::bail!("No connected agents found on the broker");
    }
    println!(
        "{}",
        format!("Running {} experiments with {:?}", experiments.len(), agents).bold()
    );

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };
    let runner = ExperimentRunner::new(station.clone(), settings.runner.clone());
    let reports = runner.run_all(&agents, experiments, &cancel).await;
    interrupt.abort();

    for report in reports? {
        let outcome = match report.outcome {
            RunOutcome::Completed => "completed".green(),
            RunOutcome::TimedOut => "timed out".yellow(),
        };
        println!(
            "  {:<24} {} after {:.1} s",
            report.name,
            outcome,
            report.elapsed.as_secs_f64()
        );
    }
    Ok(())
}
