// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Replicated Swarm State
//!
//! Every node keeps a [`SharedPoseTable`]: its own pose (written by the
//! telemetry ingestion tasks) plus the last pose received from each peer
//! (written by the message handler). The table is an explicitly injected
//! `Arc<RwLock<..>>`; readers take a [`PoseSnapshot`] and never hold the lock
//! across an await point.
//!
//! Writers only ever touch their own fields, so concurrent ingestion tasks
//! cannot clobber each other's data.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::domain::agent::{AgentId, FlightMode};
use crate::domain::geodesy::GeodeticPosition;
use crate::domain::geometry::Vec3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Lost { since: Instant },
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkState::Connected)
    }
}

/// Position/velocity/heading sample as carried on the `{id}/T` topic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryFrame {
    pub geodetic: GeodeticPosition,
    pub position: Vec3,
    pub velocity: Vec3,
    pub heading_deg: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplicatedPose {
    pub geodetic: GeodeticPosition,
    pub position: Vec3,
    pub velocity: Vec3,
    pub heading_deg: f64,
    pub armed: bool,
    pub flight_mode: FlightMode,
    pub battery_percent: Option<f64>,
    /// Vehicle GPS time in microseconds; 0 until the first fix.
    pub gps_time_us: u64,
    pub link: LinkState,
    pub updated_at: Instant,
    /// Set by the first position sample. Until then `position` and
    /// `geodetic` are placeholders and must not be used as a location.
    pub fixed_at: Option<Instant>,
}

impl ReplicatedPose {
    pub fn new(now: Instant) -> Self {
        Self {
            geodetic: GeodeticPosition::default(),
            position: Vec3::zeros(),
            velocity: Vec3::zeros(),
            heading_deg: 0.0,
            armed: false,
            flight_mode: FlightMode::Unknown,
            battery_percent: None,
            gps_time_us: 0,
            link: LinkState::Connected,
            updated_at: now,
            fixed_at: None,
        }
    }

    pub fn at_position(position: Vec3) -> Self {
        let now = Instant::now();
        Self {
            position,
            fixed_at: Some(now),
            ..Self::new(now)
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Whether a real position has been received for this agent.
    pub fn has_fix(&self) -> bool {
        self.fixed_at.is_some()
    }

    /// Connected and located: the only entries that count as a peer in space.
    pub fn is_located(&self) -> bool {
        self.is_connected() && self.has_fix()
    }
}

/// Point-in-time copy of the table, ordered by agent id.
pub type PoseSnapshot = BTreeMap<AgentId, ReplicatedPose>;

/// Drop entries that are lost or have never reported a position.
pub fn located(mut snapshot: PoseSnapshot) -> PoseSnapshot {
    snapshot.retain(|_, pose| pose.is_located());
    snapshot
}

#[derive(Debug, Clone, Default)]
pub struct SharedPoseTable {
    inner: Arc<RwLock<BTreeMap<AgentId, ReplicatedPose>>>,
}

impl SharedPoseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `id` with an empty pose. Returns `false` if it was already known.
    pub fn insert_if_absent(&self, id: &AgentId) -> bool {
        let mut table = self.inner.write();
        if table.contains_key(id) {
            return false;
        }
        table.insert(id.clone(), ReplicatedPose::new(Instant::now()));
        true
    }

    pub fn insert(&self, id: AgentId, pose: ReplicatedPose) {
        self.inner.write().insert(id, pose);
    }

    pub fn remove(&self, id: &AgentId) -> Option<ReplicatedPose> {
        self.inner.write().remove(id)
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.inner.read().contains_key(id)
    }

    pub fn get(&self, id: &AgentId) -> Option<ReplicatedPose> {
        self.inner.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn ids(&self) -> Vec<AgentId> {
        self.inner.read().keys().cloned().collect()
    }

    pub fn connected_ids(&self) -> Vec<AgentId> {
        self.inner
            .read()
            .iter()
            .filter(|(_, pose)| pose.is_connected())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn snapshot(&self) -> PoseSnapshot {
        self.inner.read().clone()
    }

    /// Connected entries with a position fix.
    pub fn located_snapshot(&self) -> PoseSnapshot {
        located(self.inner.read().clone())
    }

    fn update(&self, id: &AgentId, apply: impl FnOnce(&mut ReplicatedPose)) {
        let now = Instant::now();
        let mut table = self.inner.write();
        let pose = table
            .entry(id.clone())
            .or_insert_with(|| ReplicatedPose::new(now));
        apply(pose);
        pose.updated_at = now;
    }

    fn update_fixed(&self, id: &AgentId, apply: impl FnOnce(&mut ReplicatedPose)) {
        self.update(id, |pose| {
            apply(pose);
            pose.fixed_at.get_or_insert(pose.updated_at);
        });
    }

    pub fn update_position(&self, id: &AgentId, geodetic: GeodeticPosition, position: Vec3) {
        self.update_fixed(id, |pose| {
            pose.geodetic = geodetic;
            pose.position = position;
        });
    }

    pub fn update_velocity(&self, id: &AgentId, velocity: Vec3) {
        self.update(id, |pose| pose.velocity = velocity);
    }

    pub fn update_heading(&self, id: &AgentId, heading_deg: f64) {
        self.update(id, |pose| pose.heading_deg = heading_deg);
    }

    pub fn update_armed(&self, id: &AgentId, armed: bool) {
        self.update(id, |pose| pose.armed = armed);
    }

    pub fn update_flight_mode(&self, id: &AgentId, mode: FlightMode) {
        self.update(id, |pose| pose.flight_mode = mode);
    }

    pub fn update_battery(&self, id: &AgentId, percent: f64) {
        self.update(id, |pose| pose.battery_percent = Some(percent));
    }

    pub fn update_gps_time(&self, id: &AgentId, gps_time_us: u64) {
        self.update(id, |pose| pose.gps_time_us = gps_time_us);
    }

    /// Apply a peer telemetry frame. Fresh telemetry also proves the peer's
    /// link is up again.
    pub fn apply_telemetry(&self, id: &AgentId, frame: &TelemetryFrame) {
        self.update_fixed(id, |pose| {
            pose.geodetic = frame.geodetic;
            pose.position = frame.position;
            pose.velocity = frame.velocity;
            pose.heading_deg = frame.heading_deg;
            pose.link = LinkState::Connected;
        });
    }

    /// Mark `id` as lost. Returns `true` on a Connected -> Lost transition.
    pub fn mark_lost(&self, id: &AgentId, now: Instant) -> bool {
        let mut table = self.inner.write();
        match table.get_mut(id) {
            Some(pose) if pose.is_connected() => {
                pose.link = LinkState::Lost { since: now };
                true
            }
            _ => false,
        }
    }

    /// Mark `id` as connected. Returns `true` on a Lost -> Connected transition.
    pub fn mark_connected(&self, id: &AgentId) -> bool {
        let mut table = self.inner.write();
        match table.get_mut(id) {
            Some(pose) if !pose.is_connected() => {
                pose.link = LinkState::Connected;
                true
            }
            _ => false,
        }
    }

    /// Remove peers that have been lost for longer than `timeout`.
    pub fn evict_stale(&self, timeout: Duration, now: Instant) -> Vec<AgentId> {
        let mut table = self.inner.write();
        let stale: Vec<AgentId> = table
            .iter()
            .filter_map(|(id, pose)| match pose.link {
                LinkState::Lost { since } if now.saturating_duration_since(since) >= timeout => {
                    Some(id.clone())
                }
                _ => None,
            })
            .collect();
        for id in &stale {
            table.remove(id);
        }
        stale
    }
}
