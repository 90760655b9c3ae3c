// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Maneuvers
//!
//! Multi-leg position maneuvers flown through `goto_location`: the
//! deconflicted transit to a pre-start position and the return to home.
//! Each leg is commanded once and then polled against the own pose until it
//! is within tolerance. A maneuver is abandoned as soon as the mission state
//! leaves the state that owns it or its cancellation token fires.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use helix_core::domain::agent::AgentId;
use helix_core::domain::driver::{DriverError, VehicleDriver};
use helix_core::domain::geodesy::{GeodeticPosition, LocalFrame};
use helix_core::domain::geometry::Vec3;
use helix_core::domain::mission::MissionState;
use helix_core::domain::node_config::FlightSettings;
use helix_core::domain::pose::{ReplicatedPose, SharedPoseTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManeuverOutcome {
    Completed,
    Aborted,
}

impl ManeuverOutcome {
    pub fn is_aborted(self) -> bool {
        self == ManeuverOutcome::Aborted
    }
}

/// Poll cadence and tolerances for position legs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitSettings {
    pub position_tolerance: f64,
    pub altitude_tolerance: f64,
    pub poll: Duration,
    pub settle: Duration,
}

impl From<&FlightSettings> for TransitSettings {
    fn from(flight: &FlightSettings) -> Self {
        Self {
            position_tolerance: flight.position_tolerance,
            altitude_tolerance: flight.altitude_tolerance,
            poll: flight.maneuver_poll,
            settle: flight.transit_settle,
        }
    }
}

pub struct Maneuver {
    agent_id: AgentId,
    driver: Arc<dyn VehicleDriver>,
    table: SharedPoseTable,
    frame: LocalFrame,
    settings: TransitSettings,
    mission: watch::Receiver<MissionState>,
    owner: MissionState,
    cancel: CancellationToken,
}

impl Maneuver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_id: AgentId,
        driver: Arc<dyn VehicleDriver>,
        table: SharedPoseTable,
        frame: LocalFrame,
        settings: TransitSettings,
        mission: watch::Receiver<MissionState>,
        owner: MissionState,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            agent_id,
            driver,
            table,
            frame,
            settings,
            mission,
            owner,
            cancel,
        }
    }

    fn superseded(&self) -> bool {
        self.cancel.is_cancelled() || *self.mission.borrow() != self.owner
    }

    /// Sleep for `duration` unless superseded first.
    async fn pause(&mut self, duration: Duration) -> ManeuverOutcome {
        if self.superseded() {
            return ManeuverOutcome::Aborted;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => return ManeuverOutcome::Aborted,
            _ = tokio::time::sleep(duration) => {}
            changed = self.mission.changed() => {
                if changed.is_err() {
                    return ManeuverOutcome::Aborted;
                }
            }
        }
        if self.superseded() {
            ManeuverOutcome::Aborted
        } else {
            ManeuverOutcome::Completed
        }
    }

    /// Poll the own pose until `reached` holds.
    async fn wait_until(&mut self, reached: impl Fn(&ReplicatedPose) -> bool) -> ManeuverOutcome {
        loop {
            if self.superseded() {
                return ManeuverOutcome::Aborted;
            }
            if self.table.get(&self.agent_id).is_some_and(|pose| reached(&pose)) {
                return ManeuverOutcome::Completed;
            }
            let poll = self.settings.poll;
            if self.pause(poll).await.is_aborted() {
                return ManeuverOutcome::Aborted;
            }
        }
    }

    fn own_geodetic(&self) -> Result<GeodeticPosition, DriverError> {
        self.table
            .get(&self.agent_id)
            .map(|pose| pose.geodetic)
            .ok_or_else(|| DriverError::rejected("maneuver", "own position unknown"))
    }

    async fn climb_in_place(&mut self, altitude_amsl: f64) -> Result<ManeuverOutcome, DriverError> {
        let here = self.own_geodetic()?;
        self.driver
            .goto_location(here.latitude_deg, here.longitude_deg, altitude_amsl, 0.0)
            .await?;
        let tolerance = self.settings.altitude_tolerance;
        Ok(self
            .wait_until(move |pose| (pose.geodetic.altitude_m - altitude_amsl).abs() <= tolerance)
            .await)
    }

    /// Hold, climb to `travel_altitude` (AMSL), cross to above `target`
    /// (local NED), then descend onto it. Each level is held for the settle
    /// time so slower peers reach their rung before anyone moves on.
    pub async fn deconflicted_transit(
        &mut self,
        target: Vec3,
        travel_altitude: f64,
    ) -> Result<ManeuverOutcome, DriverError> {
        info!(agent_id = %self.agent_id, travel_altitude, "Starting deconflicted transit");
        self.driver.hold().await?;

        if self.climb_in_place(travel_altitude).await?.is_aborted() {
            return Ok(ManeuverOutcome::Aborted);
        }
        let settle = self.settings.settle;
        if self.pause(settle).await.is_aborted() {
            return Ok(ManeuverOutcome::Aborted);
        }

        let destination = self.frame.to_geodetic(&target);
        self.driver
            .goto_location(destination.latitude_deg, destination.longitude_deg, travel_altitude, 0.0)
            .await?;
        let tolerance = self.settings.position_tolerance;
        let horizontal = self
            .wait_until(move |pose| {
                (pose.position.x - target.x).abs() <= tolerance
                    && (pose.position.y - target.y).abs() <= tolerance
            })
            .await;
        if horizontal.is_aborted() || self.pause(settle).await.is_aborted() {
            return Ok(ManeuverOutcome::Aborted);
        }

        debug!(agent_id = %self.agent_id, "Descending onto pre-start position");
        self.driver
            .goto_location(
                destination.latitude_deg,
                destination.longitude_deg,
                destination.altitude_m,
                0.0,
            )
            .await?;
        let vertical = self.settings.altitude_tolerance;
        let arrived = self
            .wait_until(move |pose| {
                (pose.position.x - target.x).abs() <= tolerance
                    && (pose.position.y - target.y).abs() <= tolerance
                    && (pose.position.z - target.z).abs() <= vertical
            })
            .await;
        if arrived == ManeuverOutcome::Completed {
            info!(agent_id = %self.agent_id, "Reached pre-start position");
        }
        Ok(arrived)
    }

    /// Hold, climb or descend in place to `return_altitude` (AMSL), then fly
    /// to above `home` at that altitude.
    pub async fn return_home(
        &mut self,
        home: GeodeticPosition,
        return_altitude: f64,
    ) -> Result<ManeuverOutcome, DriverError> {
        info!(agent_id = %self.agent_id, return_altitude, "Returning home");
        self.driver.hold().await?;

        if self.climb_in_place(return_altitude).await?.is_aborted() {
            return Ok(ManeuverOutcome::Aborted);
        }

        self.driver
            .goto_location(home.latitude_deg, home.longitude_deg, return_altitude, 0.0)
            .await?;
        let home_ned = self.frame.to_ned(&home);
        let tolerance = self.settings.position_tolerance;
        let arrived = self
            .wait_until(move |pose| {
                (pose.position.x - home_ned.x).abs() <= tolerance
                    && (pose.position.y - home_ned.y).abs() <= tolerance
            })
            .await;
        if arrived == ManeuverOutcome::Completed {
            info!(agent_id = %self.agent_id, "Arrived above home");
        }
        Ok(arrived)
    }
}
