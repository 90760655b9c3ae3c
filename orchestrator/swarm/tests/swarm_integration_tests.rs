// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end swarm scenarios over the in-memory broker.
//!
//! Every node flies a simulated vehicle and talks to its peers only through
//! the bus, so these tests cover discovery, link loss, eviction and a full
//! pre_start to Experiment mission the way a field deployment would run it.
//! All tests run on a paused clock.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use helix_core::domain::agent::AgentId;
use helix_core::domain::events::SwarmEvent;
use helix_core::domain::geodesy::{GeodeticPosition, LocalFrame};
use helix_core::domain::geometry::Vec3;
use helix_core::domain::mission::{Command, MissionState};
use helix_core::domain::node_config::NodeConfigSpec;
use helix_core::domain::transport::{Message, SessionOptions, Transport};
use helix_core::infrastructure::broker::InMemoryBroker;
use helix_core::infrastructure::event_bus::{EventBus, EventReceiver};
use helix_core::infrastructure::sim_vehicle::SimulatedVehicle;
use helix_swarm::application::{AgentNode, GroundStation, NodeHandle};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const EXPERIMENT: &str = r#"
name: corridor
paths:
  - waypoints: [[0, 0, -15], [100, 0, -15], [200, 0, -15]]
    lane_radius: 2
  - waypoints: [[0, 6, -15], [100, 6, -15], [200, 6, -15]]
    lane_radius: 2
swarm:
  initial_paths: [0, 1]
  pre_start_positions: [[0, 0, -15], [0, 6, -15]]
"#;

fn id(s: &str) -> AgentId {
    AgentId::new(s).unwrap()
}

fn settings(agent: &str, experiments: &Path) -> NodeConfigSpec {
    let mut settings = NodeConfigSpec::default();
    settings.agent.id = agent.to_string();
    settings.geodetic_reference = GeodeticPosition::new(51.0, -2.0, 80.0);
    settings.experiments.directory = experiments.to_path_buf();
    settings.experiments.default = "corridor".to_string();
    settings.flight.transit_settle = Duration::from_secs(1);
    settings.flight.maneuver_poll = Duration::from_millis(200);
    settings
}

struct Swarm {
    broker: InMemoryBroker,
    events: EventBus,
    nodes: Vec<NodeHandle>,
    _experiments: TempDir,
    _vehicles: CancellationToken,
}

impl Swarm {
    async fn launch(agents: &[(&str, Vec3)]) -> Self {
        let experiments = TempDir::new().unwrap();
        std::fs::write(experiments.path().join("corridor.yaml"), EXPERIMENT).unwrap();

        let broker = InMemoryBroker::new();
        let events = EventBus::with_default_capacity();
        let vehicles = CancellationToken::new();
        let mut nodes = Vec::new();
        for (agent, start) in agents {
            let settings = settings(agent, experiments.path());
            let frame = LocalFrame::new(settings.geodetic_reference);
            let vehicle = SimulatedVehicle::spawn(frame, *start, vehicles.child_token());
            let node = AgentNode::new(
                settings,
                Arc::new(vehicle),
                Arc::new(broker.client()),
                events.clone(),
            )
            .unwrap();
            nodes.push(node.start().await.unwrap());
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        Self {
            broker,
            events,
            nodes,
            _experiments: experiments,
            _vehicles: vehicles,
        }
    }

    fn node(&self, agent: &str) -> &Arc<AgentNode> {
        self.nodes
            .iter()
            .map(|handle| handle.node())
            .find(|node| node.id().as_str() == agent)
            .unwrap()
    }

    fn broadcast(&self, command: Command) {
        self.broker
            .inject(Message::new("commands", command.as_str().to_string()));
    }

    async fn shutdown(self) {
        for node in self.nodes {
            node.shutdown().await.unwrap();
        }
    }
}

fn drain(events: &mut EventReceiver) -> Vec<SwarmEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

#[tokio::test(start_paused = true)]
async fn test_agents_discover_each_other() {
    let swarm = Swarm::launch(&[
        ("P101", Vec3::zeros()),
        ("P102", Vec3::new(0.0, 6.0, 0.0)),
        ("P103", Vec3::new(0.0, 12.0, 0.0)),
    ])
    .await;

    for agent in ["P101", "P102", "P103"] {
        let table = swarm.node(agent).table();
        assert_eq!(table.len(), 3, "{} sees {:?}", agent, table.ids());
        assert!(table.ids().iter().all(|peer| table.get(peer).unwrap().is_connected()));
    }

    // Peer telemetry reaches every replica.
    let seen_by_p101 = swarm.node("P101").table().get(&id("P103")).unwrap();
    assert!((seen_by_p101.position - Vec3::new(0.0, 12.0, 0.0)).norm() < 1e-6);
    swarm.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_late_joiner_is_discovered() {
    let swarm = Swarm::launch(&[("P101", Vec3::zeros())]).await;
    let mut events = swarm.events.subscribe();

    let late = AgentNode::new(
        settings("P102", Path::new("experiments")),
        Arc::new(SimulatedVehicle::spawn(
            LocalFrame::new(GeodeticPosition::new(51.0, -2.0, 80.0)),
            Vec3::new(3.0, 0.0, 0.0),
            CancellationToken::new(),
        )),
        Arc::new(swarm.broker.client()),
        swarm.events.clone(),
    )
    .unwrap();
    let late = late.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(swarm.node("P101").table().contains(&id("P102")));
    assert!(late.node().table().contains(&id("P101")));
    let discovered: Vec<(String, String)> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            SwarmEvent::AgentDiscovered { agent_id, peer, .. } => {
                Some((agent_id.to_string(), peer.to_string()))
            }
            _ => None,
        })
        .collect();
    assert!(discovered.contains(&("P101".to_string(), "P102".to_string())));
    assert!(discovered.contains(&("P102".to_string(), "P101".to_string())));

    late.shutdown().await.unwrap();
    swarm.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_triggers_fail_safe_hold_and_recovery() {
    let swarm = Swarm::launch(&[("P101", Vec3::zeros()), ("P102", Vec3::new(0.0, 6.0, 0.0))]).await;
    let p101 = swarm.node("P101").clone();
    let mut events = swarm.events.subscribe_agent(id("P101"));

    p101.dispatch(Command::Arm).await.unwrap();
    p101.dispatch(Command::Takeoff).await.unwrap();
    tokio::time::sleep(Duration::from_secs(6)).await;
    p101.dispatch(Command::Return).await.unwrap();
    assert_eq!(p101.mission_state(), MissionState::Returning);

    assert!(swarm.broker.sever("P101"));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!swarm.node("P102").table().get(&id("P101")).unwrap().is_connected());

    // Still inside the grace period.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(p101.mission_state(), MissionState::Returning);

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(p101.mission_state(), MissionState::Holding);

    assert!(swarm.broker.restore("P101"));
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(swarm.node("P102").table().get(&id("P101")).unwrap().is_connected());

    let mut kinds = Vec::new();
    while let Ok(Ok(event)) = tokio::time::timeout(Duration::from_millis(10), events.recv()).await {
        kinds.push(event);
    }
    let lost = kinds
        .iter()
        .position(|e| matches!(e, SwarmEvent::OwnLinkLost { .. }))
        .expect("own link loss reported");
    let held = kinds
        .iter()
        .position(|e| {
            matches!(
                e,
                SwarmEvent::MissionStateChanged {
                    from: MissionState::Returning,
                    to: MissionState::Holding,
                    ..
                }
            )
        })
        .expect("fail-safe hold reported");
    let restored = kinds
        .iter()
        .position(|e| matches!(e, SwarmEvent::OwnLinkRestored { .. }))
        .expect("own link restore reported");
    assert!(lost < held && held < restored);
    swarm.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stale_peer_is_evicted_and_rediscovered() {
    let swarm = Swarm::launch(&[("P101", Vec3::zeros()), ("P102", Vec3::new(0.0, 6.0, 0.0))]).await;
    let mut events = swarm.events.subscribe_agent(id("P102"));

    swarm.broker.sever("P101");
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(swarm.node("P102").table().contains(&id("P101")));

    tokio::time::sleep(Duration::from_secs(12)).await;
    assert!(!swarm.node("P102").table().contains(&id("P101")));

    swarm.broker.restore("P101");
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(swarm.node("P102").table().contains(&id("P101")));

    let mut evicted = false;
    let mut rediscovered = false;
    while let Ok(Ok(event)) = tokio::time::timeout(Duration::from_millis(10), events.recv()).await {
        match event {
            SwarmEvent::PeerEvicted { peer, .. } if peer == id("P101") => evicted = true,
            SwarmEvent::AgentDiscovered { peer, .. } if evicted && peer == id("P101") => {
                rediscovered = true
            }
            _ => {}
        }
    }
    assert!(evicted && rediscovered);
    swarm.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_pre_start_then_experiment_flies_the_corridor() {
    let swarm = Swarm::launch(&[
        ("P101", Vec3::new(-5.0, 0.0, 0.0)),
        ("P102", Vec3::new(-5.0, 6.0, 0.0)),
    ])
    .await;

    swarm.broadcast(Command::Arm);
    tokio::time::sleep(Duration::from_millis(100)).await;
    swarm.broadcast(Command::Takeoff);
    tokio::time::sleep(Duration::from_secs(8)).await;
    swarm.broadcast(Command::PreStart);

    let mut ready = false;
    for _ in 0..600 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if ["P101", "P102"].iter().all(|a| swarm.node(a).is_prepared()) {
            ready = true;
            break;
        }
    }
    assert!(ready, "pre-start transit did not complete");

    for (agent, y) in [("P101", 0.0), ("P102", 6.0)] {
        let node = swarm.node(agent);
        let pose = node.table().get(node.id()).unwrap();
        assert!((pose.position - Vec3::new(0.0, y, -15.0)).norm() < 1.5, "{} at {:?}", agent, pose.position);
        assert_eq!(node.mission_state(), MissionState::PreStart);
    }
    assert_eq!(swarm.node("P101").lane().map(|(path, _)| path), Some(0));
    assert_eq!(swarm.node("P102").lane().map(|(path, _)| path), Some(1));

    swarm.broadcast(Command::Experiment);
    tokio::time::sleep(Duration::from_secs(10)).await;

    for agent in ["P101", "P102"] {
        let node = swarm.node(agent);
        assert_eq!(node.mission_state(), MissionState::Following);
        let pose = node.table().get(node.id()).unwrap();
        assert!(pose.position.x > 5.0, "{} did not advance: {:?}", agent, pose.position);
        assert!(pose.velocity.norm() <= 3.0 + 1e-6);
    }

    swarm.broadcast(Command::Hold);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(swarm.node("P101").mission_state(), MissionState::Holding);
    assert_eq!(swarm.node("P101").lane().map(|(path, _)| path), Some(0));
    swarm.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_ground_station_assigns_return_altitudes() {
    let swarm = Swarm::launch(&[("P101", Vec3::zeros()), ("P102", Vec3::new(0.0, 6.0, 0.0))]).await;
    let station = GroundStation::new(
        &settings("P101", Path::new("experiments")),
        Arc::new(swarm.broker.client()),
        swarm.events.clone(),
    )
    .unwrap();
    station.start().await.unwrap();

    let operator = swarm.broker.client();
    operator.connect(SessionOptions::new("operator")).await.unwrap();
    operator.subscribe("+/home/altitude").await.unwrap();

    swarm.broadcast(Command::Arm);
    tokio::time::sleep(Duration::from_millis(100)).await;
    swarm.broadcast(Command::Takeoff);
    tokio::time::sleep(Duration::from_secs(8)).await;

    let assigned = station.return_all().await.unwrap();
    assert_eq!(assigned.len(), 2);
    let rungs: Vec<f64> = assigned.values().copied().collect();
    assert!((rungs[0] - rungs[1]).abs() >= 1.0 - 1e-9);

    tokio::time::sleep(Duration::from_millis(200)).await;
    for agent in ["P101", "P102"] {
        assert_eq!(swarm.node(agent).mission_state(), MissionState::Returning);
    }
    let first = operator.recv().await.unwrap();
    assert!(first.topic.ends_with("/home/altitude"));

    station.shutdown().await.unwrap();
    swarm.shutdown().await;
}
