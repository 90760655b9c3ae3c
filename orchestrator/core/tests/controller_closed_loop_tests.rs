// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Closed-loop tests for the path follower.
//!
//! Each test integrates the commanded velocity of a point-mass agent at the
//! control period and checks properties that must hold on every tick:
//! - the command is finite and within the speed and acceleration limits
//! - every force term respects its configured magnitude limit
//! - the waypoint index never moves backwards on a non-repeating path
//! - a committed lane switch is never undone
//!
//! A seeded sweep additionally throws random positions, velocities and peer
//! sets at every path shape and the vortex field.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;

use helix_core::domain::agent::AgentId;
use helix_core::domain::controller::{ControlLimits, ControlOutput, PathFollower};
use helix_core::domain::corridor::{CorridorModel, SwitchPermissions};
use helix_core::domain::experiment::ExperimentConfig;
use helix_core::domain::geometry::Vec3;
use helix_core::domain::pose::{PoseSnapshot, ReplicatedPose};

const DT: f64 = 0.1;

const L_SHAPED: &str = r#"
name: l-shaped
paths:
  - waypoints: [[0, 0, -10], [30, 0, -10], [30, 30, -10]]
    lane_radius: 2
    repeat: STOP
"#;

const TWO_LANES: &str = r#"
name: two-lanes
paths:
  - waypoints: [[0, 0, -10], [10, 0, -10], [20, 0, -10], [30, 0, -10]]
    lane_radius: 1
    repeat: STOP
    switching_points: [1]
  - waypoints: [[0, 2, -10], [10, 2, -10], [20, 2, -10], [30, 2, -10]]
    lane_radius: 1
    repeat: STOP
    switching_points: [1]
swarm:
  pass_permissions:
    - {0: [1], 1: [0]}
"#;

const RIBBON: &str = r#"
name: ribbon
paths:
  - waypoints: [[0, 0, -10], [20, 0, -12], [20, 20, -10], [0, 20, -10]]
    lane_radius: [2, 3, 2, 1.5]
    shape: ribbon
    repeat: REPEAT
    ribbon_normals: [[0, 0, 1], [0.1, 0, 1], [0, 0, 1], [0, 1, 1]]
"#;

const CYLINDER: &str = r#"
name: cylinder
paths:
  - waypoints: [[0, 0, -10], [15, 5, -10], [30, 0, -14]]
    lane_radius: 2.5
    shape: cylinder
    rotation: -1
    repeat: STAY
"#;

const VORTEX: &str = r#"
name: vortex
paths:
  - waypoints: [[0, 0, -10], [30, 0, -10], [30, 30, -10]]
    lane_radius: 2
    repeat: STOP
gains:
  force_field: 1
vortex:
  centre: [15, 15, -10]
  axes: [[0, 0, 1], [2, 0, 0]]
"#;

fn id(s: &str) -> AgentId {
    AgentId::new(s).unwrap()
}

fn follower(yaml: &str, permissions: SwitchPermissions) -> (PathFollower, ExperimentConfig) {
    let config: ExperimentConfig = serde_yaml::from_str(yaml).unwrap();
    let corridor = Arc::new(CorridorModel::from_experiment(&config).unwrap());
    let follower = PathFollower::new(corridor, &config, 0, permissions, Duration::ZERO).unwrap();
    (follower, config)
}

/// Point-mass agent flying the follower's commands.
struct Agent {
    id: AgentId,
    position: Vec3,
    velocity: Vec3,
    gps_time_us: u64,
}

impl Agent {
    fn new(name: &str, position: Vec3) -> Self {
        Self {
            id: id(name),
            position,
            velocity: Vec3::zeros(),
            gps_time_us: 1_000_000,
        }
    }

    fn pose(&self) -> ReplicatedPose {
        let mut pose = ReplicatedPose::at_position(self.position);
        pose.velocity = self.velocity;
        pose.gps_time_us = self.gps_time_us;
        pose
    }

    fn snapshot(&self, peers: &[(&str, Vec3)]) -> PoseSnapshot {
        let mut snapshot = PoseSnapshot::new();
        snapshot.insert(self.id.clone(), self.pose());
        for (name, position) in peers {
            snapshot.insert(id(name), ReplicatedPose::at_position(*position));
        }
        snapshot
    }

    fn fly(&mut self, output: &ControlOutput) {
        self.velocity = output.command.to_vector();
        self.position += self.velocity * DT;
        self.gps_time_us += (DT * 1e6) as u64;
    }
}

fn assert_within_limits(output: &ControlOutput, previous: &Vec3, limits: &ControlLimits, config: &ExperimentConfig) {
    let velocity = output.command.to_vector();
    assert!(output.command.is_finite());
    assert!(velocity.norm() <= limits.max_speed + 1e-9, "speed {}", velocity.norm());
    let max_delta = limits.max_accel * limits.period.as_secs_f64();
    assert!((velocity - previous).norm() <= max_delta + 1e-9);

    let forces = &output.forces;
    let bounds = &config.limits;
    assert!(forces.migration.norm() <= bounds.migration + 1e-9);
    assert!(forces.lane_cohesion.norm() <= bounds.lane_cohesion + 1e-9);
    assert!(forces.rotation.norm() <= bounds.rotation + 1e-9);
    assert!(forces.separation.norm() <= bounds.separation + 1e-9);
    assert!(forces.force_field.norm() <= bounds.force_field + 1e-9);
}

#[test]
fn test_follows_l_shaped_corridor_to_the_end() {
    let (mut follower, config) = follower(L_SHAPED, SwitchPermissions::new());
    let limits = ControlLimits::default();
    let mut agent = Agent::new("P101", Vec3::new(0.0, 0.0, -10.0));
    let mut last_index = 0;

    for _ in 0..1500 {
        let previous = agent.velocity;
        let output = follower.tick(&agent.id, &agent.snapshot(&[]), &limits);
        assert_within_limits(&output, &previous, &limits, &config);
        assert!(output.index >= last_index, "index went back from {} to {}", last_index, output.index);
        last_index = output.index;
        agent.fly(&output);
    }

    assert!(follower.has_passed_last_point(0));
    // Index 2 is only reached once the agent is past the final waypoint plane.
    assert!(agent.position.y >= 30.0 - 1e-6, "ended at {:?}", agent.position);
    assert!(agent.velocity.norm() < 1e-6, "still moving after Stop: {:?}", agent.velocity);
}

#[test]
fn test_lane_switch_is_committed_once() {
    let permissions = SwitchPermissions::from_map(&[(0, vec![1]), (1, vec![0])].into_iter().collect());
    let (mut follower, config) = follower(TWO_LANES, permissions);
    let limits = ControlLimits::default();

    // Drifted east of lane 0, just past its switching point.
    let mut agent = Agent::new("P101", Vec3::new(11.0, 1.5, -10.0));
    follower.seed_index(&agent.position);

    let mut switches = 0;
    for step in 0..400 {
        let previous = agent.velocity;
        let output = follower.tick(&agent.id, &agent.snapshot(&[]), &limits);
        assert_within_limits(&output, &previous, &limits, &config);
        if let Some(event) = &output.switched {
            assert_eq!(step, 0);
            assert_eq!((event.from_path, event.to_path), (0, 1));
            switches += 1;
        }
        assert_eq!(output.path, 1);
        agent.fly(&output);
    }

    assert_eq!(switches, 1);
    assert_eq!(follower.switch_history().len(), 1);
    assert!((agent.position.y - 2.0).abs() < 1.0, "left lane 1: {:?}", agent.position);
}

#[test]
fn test_non_finite_peer_does_not_poison_the_command() {
    let (mut follower, config) = follower(L_SHAPED, SwitchPermissions::new());
    let limits = ControlLimits::default();
    let mut agent = Agent::new("P101", Vec3::new(1.0, 0.5, -10.0));

    for _ in 0..50 {
        let previous = agent.velocity;
        let snapshot = agent.snapshot(&[
            ("P102", Vec3::new(f64::NAN, 0.0, -10.0)),
            ("P103", Vec3::new(f64::INFINITY, f64::NEG_INFINITY, 0.0)),
        ]);
        let output = follower.tick(&agent.id, &snapshot, &limits);
        assert!(!output.sanitized);
        assert_within_limits(&output, &previous, &limits, &config);
        agent.fly(&output);
    }
    assert!(agent.position.x > 1.0);
}

#[test]
fn test_nearest_peer_is_tracked() {
    let (mut follower, config) = follower(L_SHAPED, SwitchPermissions::new());
    let limits = ControlLimits::default();
    let mut agent = Agent::new("P101", Vec3::new(0.0, 0.0, -10.0));
    let blocker = Vec3::new(10.0, 0.0, -10.0);

    for _ in 0..300 {
        let previous = agent.velocity;
        let output = follower.tick(&agent.id, &agent.snapshot(&[("P102", blocker)]), &limits);
        assert_within_limits(&output, &previous, &limits, &config);
        agent.fly(&output);
    }

    let nearest = follower.nearest_peer().expect("peer was observed");
    assert_eq!(nearest.peer.as_str(), "P102");
    assert!(nearest.distance > 0.0);
}

fn random_vec(rng: &mut StdRng, half_extent: f64) -> Vec3 {
    Vec3::new(
        rng.random_range(-half_extent..half_extent),
        rng.random_range(-half_extent..half_extent),
        rng.random_range(-half_extent..half_extent),
    )
}

/// Current velocity inside the speed bound, so the acceleration clamp is
/// measured from a reachable state.
fn random_velocity(rng: &mut StdRng, max_speed: f64) -> Vec3 {
    let direction = random_vec(rng, 1.0);
    if direction.norm() < 1e-6 {
        return Vec3::zeros();
    }
    direction.normalize() * rng.random_range(0.0..max_speed)
}

#[test]
fn test_random_states_respect_output_limits() {
    let mut rng = StdRng::seed_from_u64(0x5eed_c0de);
    let limits = ControlLimits::default();

    for yaml in [RIBBON, CYLINDER, VORTEX, L_SHAPED] {
        let (mut follower, config) = follower(yaml, SwitchPermissions::new());
        follower.start_mission(0);
        for sample in 0..300 {
            let centre = Vec3::new(15.0, 15.0, -10.0);
            let mut agent = Agent::new("P101", centre + random_vec(&mut rng, 20.0));
            agent.velocity = random_velocity(&mut rng, limits.max_speed);
            follower.seed_index(&agent.position);

            let peer_count = rng.random_range(0..9);
            let names: Vec<String> = (0..peer_count).map(|k| format!("P{}", 102 + k)).collect();
            let peers: Vec<(&str, Vec3)> = names
                .iter()
                .map(|name| {
                    let position = if rng.random_bool(0.1) {
                        agent.position
                    } else {
                        agent.position + random_vec(&mut rng, 6.0)
                    };
                    (name.as_str(), position)
                })
                .collect();

            let output = follower.tick(&agent.id, &agent.snapshot(&peers), &limits);
            assert!(!output.sanitized, "{} sample {} was sanitized", config.name, sample);
            assert_within_limits(&output, &agent.velocity, &limits, &config);
        }
    }
}

#[test]
fn test_crowded_separation_is_capped() {
    let (mut follower, config) = follower(L_SHAPED, SwitchPermissions::new());
    let limits = ControlLimits::default();
    let agent = Agent::new("P101", Vec3::new(5.0, 0.0, -10.0));
    follower.start_mission(0);

    // Eight peers inside r_collision, all to the west: eight unit pushes east.
    let names: Vec<String> = (0..8).map(|k| format!("P{}", 102 + k)).collect();
    let peers: Vec<(&str, Vec3)> = names
        .iter()
        .enumerate()
        .map(|(k, name)| {
            let dz = (k as f64 - 3.5) * 0.05;
            (name.as_str(), Vec3::new(5.0, -1.0, -10.0 + dz))
        })
        .collect();
    assert!(peers.len() > 5);

    let output = follower.tick(&agent.id, &agent.snapshot(&peers), &limits);
    let separation = output.forces.separation;
    assert!((separation.norm() - config.limits.separation).abs() < 1e-9, "{:?}", separation);
    assert!(separation.y > 4.9);
    assert_within_limits(&output, &agent.velocity, &limits, &config);
}
