// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Bootstrap
//!
//! Every agent derives the same priority order from the replicated id set and
//! reads its initial lane, start delay, pass permissions and pre-start
//! position from the per-rank lists of the experiment. No messages are
//! exchanged: membership changes never need a coordination round.

use helix_core::domain::agent::AgentId;
use helix_core::domain::corridor::{PathId, SwitchPermissions};
use helix_core::domain::experiment::ExperimentConfig;
use helix_core::domain::geometry::{self, Vec3};
use helix_core::domain::pose::PoseSnapshot;
use std::collections::BTreeMap;
use std::time::Duration;

/// What an agent of a given rank starts the mission with.
#[derive(Debug, Clone, PartialEq)]
pub struct InitialAssignment {
    pub rank: usize,
    pub initial_path: PathId,
    pub start_delay: Duration,
    pub permissions: SwitchPermissions,
    pub pre_start_position: Vec3,
}

/// Ids sorted by their numeric part, then by the full id.
pub fn priority_order<'a>(ids: impl IntoIterator<Item = &'a AgentId>) -> Vec<AgentId> {
    let mut order: Vec<AgentId> = ids.into_iter().cloned().collect();
    order.sort_by(|a, b| {
        a.numeric_part()
            .cmp(&b.numeric_part())
            .then_with(|| a.cmp(b))
    });
    order.dedup();
    order
}

/// Priority order over the connected agents of a table snapshot.
pub fn bootstrap_order(snapshot: &PoseSnapshot) -> Vec<AgentId> {
    priority_order(
        snapshot
            .iter()
            .filter(|(_, pose)| pose.is_connected())
            .map(|(id, _)| id),
    )
}

/// Current NED position of every agent that has reported one.
pub fn current_positions(snapshot: &PoseSnapshot) -> BTreeMap<AgentId, Vec3> {
    snapshot
        .iter()
        .filter(|(_, pose)| pose.has_fix())
        .map(|(id, pose)| (id.clone(), pose.position))
        .collect()
}

/// Geodetic altitudes of `order` in order, skipping agents without a fix.
pub fn current_altitudes(order: &[AgentId], snapshot: &PoseSnapshot) -> Vec<(AgentId, f64)> {
    order
        .iter()
        .filter_map(|id| {
            snapshot
                .get(id)
                .filter(|pose| pose.has_fix())
                .map(|pose| (id.clone(), pose.geodetic.altitude_m))
        })
        .collect()
}

/// Assign per-rank initial state. Each list of the plan is consulted on its
/// own: past its end the agent gets path 0, no delay, no permissions, or its
/// current position (origin if unknown) respectively.
pub fn assign_initial_state(
    order: &[AgentId],
    config: &ExperimentConfig,
    current_positions: &BTreeMap<AgentId, Vec3>,
) -> BTreeMap<AgentId, InitialAssignment> {
    let plan = &config.swarm;
    order
        .iter()
        .enumerate()
        .map(|(rank, id)| {
            let initial_path = plan.initial_paths.get(rank).copied().unwrap_or(0);
            let start_delay = plan
                .start_delays
                .get(rank)
                .and_then(|secs| Duration::try_from_secs_f64(*secs).ok())
                .unwrap_or(Duration::ZERO);
            let permissions = plan
                .pass_permissions
                .get(rank)
                .map(SwitchPermissions::from_map)
                .unwrap_or_default();
            let pre_start_position = plan
                .pre_start_positions
                .get(rank)
                .copied()
                .map(geometry::from_array)
                .or_else(|| current_positions.get(id).copied())
                .unwrap_or_else(Vec3::zeros);

            (
                id.clone(),
                InitialAssignment {
                    rank,
                    initial_path,
                    start_delay,
                    permissions,
                    pre_start_position,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use helix_core::domain::geodesy::GeodeticPosition;
    use helix_core::domain::pose::{LinkState, ReplicatedPose};
    use tokio::time::Instant;

    fn id(s: &str) -> AgentId {
        AgentId::new(s).unwrap()
    }

    fn config() -> ExperimentConfig {
        serde_yaml::from_str(
            r#"
name: lanes
paths:
  - waypoints: [[0, 0, -10], [20, 0, -10]]
    lane_radius: 1
  - waypoints: [[0, 5, -10], [20, 5, -10]]
    lane_radius: 1
swarm:
  initial_paths: [1, 0, 1]
  start_delays: [0, 2.5]
  pass_permissions:
    - {1: [0]}
  pre_start_positions: [[0, 5, -10]]
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_priority_order_uses_numeric_part() {
        let ids = [id("P110"), id("S003"), id("P101"), id("P9")];
        let order = priority_order(&ids);
        let names: Vec<&str> = order.iter().map(|a| a.as_str()).collect();
        assert_eq!(names, ["S003", "P9", "P101", "P110"]);
    }

    #[test]
    fn test_priority_ties_broken_by_full_id() {
        let ids = [id("S101"), id("P101"), id("P101")];
        let order = priority_order(&ids);
        let names: Vec<&str> = order.iter().map(|a| a.as_str()).collect();
        assert_eq!(names, ["P101", "S101"]);
    }

    #[test]
    fn test_assignments_per_rank_with_fallbacks() {
        let order = priority_order(&[id("P101"), id("P102"), id("P103"), id("P104")]);
        let mut positions = BTreeMap::new();
        positions.insert(id("P102"), Vec3::new(1.0, 2.0, -3.0));

        let assigned = assign_initial_state(&order, &config(), &positions);
        assert_eq!(assigned.len(), 4);

        let first = &assigned[&id("P101")];
        assert_eq!(first.rank, 0);
        assert_eq!(first.initial_path, 1);
        assert!(first.permissions.permits(1, 0));
        assert_eq!(first.pre_start_position, Vec3::new(0.0, 5.0, -10.0));

        let second = &assigned[&id("P102")];
        assert_eq!(second.initial_path, 0);
        assert_eq!(second.start_delay, Duration::from_millis(2500));
        assert!(second.permissions.is_empty());
        assert_eq!(second.pre_start_position, Vec3::new(1.0, 2.0, -3.0));

        let third = &assigned[&id("P103")];
        assert_eq!(third.initial_path, 1);
        assert_eq!(third.start_delay, Duration::ZERO);

        let fourth = &assigned[&id("P104")];
        assert_eq!(fourth.initial_path, 0);
        assert_eq!(fourth.pre_start_position, Vec3::zeros());
    }

    #[test]
    fn test_lost_agents_are_excluded() {
        let now = Instant::now();
        let mut snapshot = PoseSnapshot::new();
        snapshot.insert(id("P102"), ReplicatedPose::new(now));
        let mut lost = ReplicatedPose::new(now);
        lost.link = LinkState::Lost { since: now };
        snapshot.insert(id("P101"), lost);
        snapshot.insert(id("P103"), ReplicatedPose::new(now));

        let order = bootstrap_order(&snapshot);
        let names: Vec<&str> = order.iter().map(|a| a.as_str()).collect();
        assert_eq!(names, ["P102", "P103"]);
    }

    #[test]
    fn test_agents_without_fix_have_no_position_or_altitude() {
        let now = Instant::now();
        let mut snapshot = PoseSnapshot::new();
        let mut located = ReplicatedPose::at_position(Vec3::new(3.0, 0.0, -20.0));
        located.geodetic = GeodeticPosition::new(51.0, -2.0, 120.0);
        snapshot.insert(id("P101"), located);
        snapshot.insert(id("P102"), ReplicatedPose::new(now));

        let order = bootstrap_order(&snapshot);
        assert_eq!(order.len(), 2, "membership does not wait for telemetry");

        let positions = current_positions(&snapshot);
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[&id("P101")], Vec3::new(3.0, 0.0, -20.0));

        let altitudes = current_altitudes(&order, &snapshot);
        assert_eq!(altitudes, vec![(id("P101"), 120.0)]);
    }
}
