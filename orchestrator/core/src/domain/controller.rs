// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Path-Following Controller
//!
//! Per-agent guidance law. Every control tick the [`PathFollower`]:
//!
//! 1. advances its waypoint index past points it has already overtaken,
//! 2. commits a lane switch when the agent has drifted into an adjacent
//!    lane's capture cone,
//! 3. evaluates five magnitude-limited force terms (migration, lane cohesion,
//!    rotation, separation, force field),
//! 4. gates them by the configured start delay and the path's terminal policy,
//! 5. combines them with the mission gains and limits speed and acceleration.
//!
//! The follower owns its state exclusively; peers are only read through a
//! [`PoseSnapshot`]. All degenerate geometry has a defined fallback and a
//! non-finite result is collapsed to a zero command, so the output is always
//! safe to hand to the vehicle driver.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::agent::AgentId;
use crate::domain::corridor::{
    build_adjacency, CorridorError, CorridorModel, LaneAdjacency, Path, PathId, RepeatPolicy,
    ShapeKind, SwitchPermissions,
};
use crate::domain::driver::VelocityNedYaw;
use crate::domain::experiment::{ExperimentConfig, ForceGains, ForceLimits};
use crate::domain::geometry::{self, Vec3, EPSILON};
use crate::domain::pose::PoseSnapshot;

/// Minimum cosine between the pass vector and the lateral error for a switch.
pub const SWITCH_COSINE: f64 = 0.9;

/// Below this length a vector has no meaningful direction for the switch test.
pub const SWITCH_DIRECTION_TOLERANCE: f64 = 0.05;

/// Lane-cohesion fallback when the agent sits exactly on the centreline.
const CENTRELINE_NUDGE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlLimits {
    pub max_speed: f64,
    pub max_accel: f64,
    pub period: Duration,
}

impl Default for ControlLimits {
    fn default() -> Self {
        Self {
            max_speed: 3.0,
            max_accel: 2.0,
            period: Duration::from_millis(100),
        }
    }
}

/// The five guidance terms of one tick, each already magnitude-limited.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ForceTerms {
    pub migration: Vec3,
    pub lane_cohesion: Vec3,
    pub rotation: Vec3,
    pub separation: Vec3,
    pub force_field: Vec3,
}

impl ForceTerms {
    fn zero_path_terms(&mut self) {
        self.migration = Vec3::zeros();
        self.lane_cohesion = Vec3::zeros();
        self.rotation = Vec3::zeros();
    }

    pub fn combine(&self, gains: &ForceGains) -> Vec3 {
        self.migration * gains.migration
            + self.lane_cohesion * gains.lane_cohesion
            + self.rotation * gains.rotation
            + self.separation * gains.separation
            + self.force_field * gains.force_field
    }
}

/// Closest approach to any peer observed during the mission.
#[derive(Debug, Clone, PartialEq)]
pub struct NearestPeer {
    pub peer: AgentId,
    pub distance: f64,
    pub own_position: Vec3,
    pub peer_position: Vec3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchEvent {
    pub from_path: PathId,
    pub from_index: usize,
    pub to_path: PathId,
    pub to_index: usize,
    pub position: [f64; 3],
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlOutput {
    pub command: VelocityNedYaw,
    pub forces: ForceTerms,
    pub path: PathId,
    pub index: usize,
    pub switched: Option<SwitchEvent>,
    /// The raw command was non-finite and has been replaced by zero.
    pub sanitized: bool,
}

impl ControlOutput {
    fn idle(path: PathId, index: usize) -> Self {
        Self {
            command: VelocityNedYaw::default(),
            forces: ForceTerms::default(),
            path,
            index,
            switched: None,
            sanitized: true,
        }
    }
}

#[derive(Debug, Clone)]
struct Vortex {
    centre: Vec3,
    axes: Vec<Vec3>,
}

#[derive(Debug, Clone)]
pub struct PathFollower {
    corridor: Arc<CorridorModel>,
    adjacency: LaneAdjacency,
    gains: ForceGains,
    limits: ForceLimits,
    r_conflict: f64,
    r_collision: f64,
    vortex: Option<Vortex>,

    path: PathId,
    index: usize,
    permissions: SwitchPermissions,
    passed_last: Vec<bool>,
    start_delay: Duration,
    mission_start_us: Option<u64>,
    last_forces: ForceTerms,
    nearest: Option<NearestPeer>,
    switch_history: Vec<SwitchEvent>,
}

impl PathFollower {
    pub fn new(
        corridor: Arc<CorridorModel>,
        experiment: &ExperimentConfig,
        initial_path: PathId,
        permissions: SwitchPermissions,
        start_delay: Duration,
    ) -> Result<Self, CorridorError> {
        corridor.path(initial_path)?;
        let adjacency = build_adjacency(&corridor, &permissions);
        let vortex = experiment.vortex.as_ref().map(|v| Vortex {
            centre: geometry::from_array(v.centre),
            axes: v.axes.iter().copied().map(geometry::from_array).collect(),
        });
        let passed_last = vec![false; corridor.len()];

        Ok(Self {
            corridor,
            adjacency,
            gains: experiment.gains,
            limits: experiment.limits,
            r_conflict: experiment.r_conflict,
            r_collision: experiment.r_collision,
            vortex,
            path: initial_path,
            index: 0,
            permissions,
            passed_last,
            start_delay,
            mission_start_us: None,
            last_forces: ForceTerms::default(),
            nearest: None,
            switch_history: Vec::new(),
        })
    }

    /// Start at the waypoint nearest to `position` on the current path.
    pub fn seed_index(&mut self, position: &Vec3) {
        self.index = self.current_path().nearest_index(position);
        debug!(path = self.path, index = self.index, "Seeded path index");
    }

    /// Anchor the start-delay clock, normally when the Experiment command is
    /// accepted. Without this call the first tick with a valid GPS time
    /// becomes the mission start.
    pub fn start_mission(&mut self, gps_time_us: u64) {
        self.mission_start_us = Some(gps_time_us);
    }

    pub fn mission_start(&self) -> Option<u64> {
        self.mission_start_us
    }

    pub fn path(&self) -> PathId {
        self.path
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn permissions(&self) -> &SwitchPermissions {
        &self.permissions
    }

    pub fn has_passed_last_point(&self, path: PathId) -> bool {
        self.passed_last.get(path).copied().unwrap_or(false)
    }

    /// Past the end of the current path with nothing left to follow.
    pub fn has_finished(&self) -> bool {
        !self.current_path().repeat.wraps() && self.has_passed_last_point(self.path)
    }

    pub fn last_forces(&self) -> &ForceTerms {
        &self.last_forces
    }

    pub fn nearest_peer(&self) -> Option<&NearestPeer> {
        self.nearest.as_ref()
    }

    pub fn switch_history(&self) -> &[SwitchEvent] {
        &self.switch_history
    }

    pub fn start_delay(&self) -> Duration {
        self.start_delay
    }

    fn current_path(&self) -> &Path {
        &self.corridor.paths()[self.path]
    }

    pub fn tick(
        &mut self,
        own_id: &AgentId,
        snapshot: &PoseSnapshot,
        limits: &ControlLimits,
    ) -> ControlOutput {
        let Some(own) = snapshot.get(own_id) else {
            warn!(agent_id = %own_id, "Own pose missing from table, commanding zero velocity");
            return ControlOutput::idle(self.path, self.index);
        };
        let position = own.position;
        if !geometry::is_finite(&position) {
            warn!(agent_id = %own_id, "Own position is not finite, commanding zero velocity");
            return ControlOutput::idle(self.path, self.index);
        }

        self.advance_index(&position);
        let switched = self.check_switch(own_id, &position);

        let mut forces = self.path_terms(&position);
        forces.separation = self.separation(own_id, &position, snapshot);
        if let Some(vortex) = &self.vortex {
            forces.force_field = geometry::limit_magnitude(
                vortex_field(vortex, &position),
                self.limits.force_field,
            );
            let to_final = self.current_path().final_waypoint() - position;
            forces.migration = geometry::limit_magnitude(to_final, self.limits.migration);
            forces.lane_cohesion = Vec3::zeros();
            forces.rotation = Vec3::zeros();
        }

        if own.gps_time_us != 0 {
            let start = *self.mission_start_us.get_or_insert(own.gps_time_us);
            let elapsed_us = own.gps_time_us.saturating_sub(start);
            if u128::from(elapsed_us) <= self.start_delay.as_micros() {
                forces = ForceTerms::default();
            }
        }

        let path = self.current_path();
        if self.has_passed_last_point(self.path) {
            match path.repeat {
                RepeatPolicy::Stop => forces.zero_path_terms(),
                RepeatPolicy::Stay => forces.migration = Vec3::zeros(),
                RepeatPolicy::Repeat => {}
            }
        }

        let desired = forces.combine(&self.gains);
        let (velocity, sanitized) = shape_velocity(desired, own.velocity, limits);
        if sanitized {
            warn!(
                agent_id = %own_id,
                path = self.path,
                index = self.index,
                "Non-finite velocity command replaced by zero"
            );
        }

        self.last_forces = forces;
        ControlOutput {
            command: VelocityNedYaw::from_vector(&velocity, 0.0),
            forces,
            path: self.path,
            index: self.index,
            switched,
            sanitized,
        }
    }

    fn advance_index(&mut self, position: &Vec3) {
        let path = &self.corridor.paths()[self.path];
        let wraps = path.repeat.wraps();
        let mut index = self.index;
        let mut passed_last = self.passed_last[self.path];

        for _ in 0..path.len() {
            if !wraps && passed_last {
                break;
            }
            if !wraps && index == path.last_index() {
                // Sitting on the last index is not enough; the agent must be
                // level with or beyond the final waypoint.
                passed_last = (position - path.waypoint(index)).dot(&path.direction(index)) >= 0.0;
                break;
            }
            let next = path.next_index(index);
            if (position - path.waypoint(next)).dot(&path.direction(next)) < 0.0 {
                break;
            }
            index = next;
            if next == path.last_index() {
                passed_last = true;
            }
        }

        self.index = index;
        self.passed_last[self.path] = passed_last;
    }

    fn check_switch(&mut self, own_id: &AgentId, position: &Vec3) -> Option<SwitchEvent> {
        let path = &self.corridor.paths()[self.path];
        let error = lateral_error(path, self.index, position);

        let target = self
            .adjacency
            .targets(self.path, self.index)
            .iter()
            .filter(|t| self.permissions.permits(self.path, t.next_path))
            .find(|t| switch_cosine(&t.pass_vector, &error) >= SWITCH_COSINE)?
            .clone();

        let event = SwitchEvent {
            from_path: self.path,
            from_index: self.index,
            to_path: target.next_path,
            to_index: target.next_index,
            position: [position.x, position.y, position.z],
        };
        self.permissions.revoke_departed(self.path);
        self.path = target.next_path;
        self.index = target.next_index;

        info!(
            agent_id = %own_id,
            from_path = event.from_path,
            from_index = event.from_index,
            to_path = event.to_path,
            to_index = event.to_index,
            "Lane switch committed"
        );
        metrics::counter!("helix_lane_switches_total").increment(1);
        self.switch_history.push(event.clone());
        Some(event)
    }

    fn path_terms(&self, position: &Vec3) -> ForceTerms {
        let path = self.current_path();
        let direction = path.direction(self.index);
        let radius = path.radius(self.index);
        let error = lateral_error(path, self.index, position);
        let error_norm = error.norm();

        let migration = geometry::limit_magnitude(direction, self.limits.migration);

        let lane_cohesion = match path.shape {
            ShapeKind::Ribbon => {
                let full = path.waypoint(self.index) - position;
                let normal = path.ribbon_normal(self.index);
                let normal_part = normal * full.dot(&normal);
                let width = geometry::reject(&error, &normal);
                let width_norm = width.norm();
                let width_part = if width_norm <= radius {
                    Vec3::zeros()
                } else {
                    width * ((width_norm - radius) / width_norm)
                };
                normal_part + width_part
            }
            ShapeKind::Cylinder if error_norm < radius => Vec3::zeros(),
            ShapeKind::Tube | ShapeKind::Cylinder => {
                if error_norm > EPSILON {
                    error * ((error_norm - radius) / error_norm)
                } else if radius <= 0.0 {
                    Vec3::zeros()
                } else {
                    Vec3::repeat(CENTRELINE_NUDGE)
                }
            }
        };
        let lane_cohesion = geometry::limit_magnitude(lane_cohesion, self.limits.lane_cohesion);

        let rotation = match path.shape {
            ShapeKind::Tube => {
                let cross = error.cross(&direction);
                match geometry::try_normalize(&cross) {
                    Some(axis) if error_norm > EPSILON && radius > 0.0 => {
                        let magnitude = error_norm.min(radius) / error_norm.max(radius);
                        axis * (path.rotation.sign() * magnitude)
                    }
                    _ => Vec3::zeros(),
                }
            }
            ShapeKind::Ribbon | ShapeKind::Cylinder => Vec3::zeros(),
        };
        let rotation = geometry::limit_magnitude(rotation, self.limits.rotation);

        ForceTerms {
            migration,
            lane_cohesion,
            rotation,
            separation: Vec3::zeros(),
            force_field: Vec3::zeros(),
        }
    }

    fn separation(&mut self, own_id: &AgentId, position: &Vec3, snapshot: &PoseSnapshot) -> Vec3 {
        let span = self.r_conflict - self.r_collision;
        let mut push = Vec3::zeros();

        for (peer_id, peer) in snapshot {
            if peer_id == own_id || !peer.has_fix() || !geometry::is_finite(&peer.position) {
                continue;
            }
            let offset = position - peer.position;
            let distance = offset.norm();

            if self.nearest.as_ref().is_none_or(|n| distance <= n.distance) {
                self.nearest = Some(NearestPeer {
                    peer: peer_id.clone(),
                    distance,
                    own_position: *position,
                    peer_position: peer.position,
                });
                metrics::gauge!("helix_nearest_peer_distance_m").set(distance);
            }

            if distance <= EPSILON {
                // Coincident peers split along north, lower id going north.
                let sign = if own_id < peer_id { 1.0 } else { -1.0 };
                push += Vec3::new(sign, 0.0, 0.0);
            } else if distance <= self.r_collision {
                push += offset / distance;
            } else if distance <= self.r_conflict {
                push += (offset / distance) * ((self.r_conflict - distance) / span);
            }
        }

        geometry::limit_magnitude(push, self.limits.separation)
    }
}

/// Component of (waypoint - position) orthogonal to the travel direction.
fn lateral_error(path: &Path, index: usize, position: &Vec3) -> Vec3 {
    geometry::reject(&(path.waypoint(index) - position), &path.direction(index))
}

fn switch_cosine(pass_vector: &Vec3, error: &Vec3) -> f64 {
    let a = pass_vector.norm();
    let b = error.norm();
    if a <= SWITCH_DIRECTION_TOLERANCE || b <= SWITCH_DIRECTION_TOLERANCE {
        1.0
    } else {
        pass_vector.dot(error) / (a * b)
    }
}

fn vortex_field(vortex: &Vortex, position: &Vec3) -> Vec3 {
    let relative = position - vortex.centre;
    let range = relative.norm();
    if range <= EPSILON {
        return Vec3::zeros();
    }

    let mut field = relative / (range * range);
    for axis in &vortex.axes {
        let swirl = axis.cross(&relative);
        let swirl_norm = swirl.norm();
        let axis_norm = axis.norm();
        if swirl_norm <= EPSILON || axis_norm <= EPSILON {
            continue;
        }
        let axis_distance = swirl_norm / axis_norm;
        field += swirl * (axis_norm / (range * axis_distance * swirl_norm));
    }
    field
}

/// Apply the speed bound, the acceleration bound relative to `current`, then
/// the speed bound again. Returns the command and whether it had to be zeroed.
pub fn shape_velocity(desired: Vec3, current: Vec3, limits: &ControlLimits) -> (Vec3, bool) {
    let mut velocity = geometry::limit_magnitude(desired, limits.max_speed);
    if geometry::is_finite(&current) {
        let max_delta = limits.max_accel * limits.period.as_secs_f64();
        velocity = current + geometry::limit_magnitude(velocity - current, max_delta);
        velocity = geometry::limit_magnitude(velocity, limits.max_speed);
    }
    if geometry::is_finite(&velocity) {
        (velocity, false)
    } else {
        (Vec3::zeros(), true)
    }
}
