// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Vehicle driver boundary.
//!
//! The autopilot link (arming, takeoff, offboard velocity control and the
//! telemetry streams) lives behind [`VehicleDriver`]. The agent runtime never
//! talks to an autopilot directly; tests and the `simulate` command use
//! `infrastructure::sim_vehicle::SimulatedVehicle`.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::agent::FlightMode;
use crate::domain::geodesy::GeodeticPosition;
use crate::domain::geometry::Vec3;

/// Velocity setpoint in the local NED frame plus a yaw angle in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VelocityNedYaw {
    pub north_m_s: f64,
    pub east_m_s: f64,
    pub down_m_s: f64,
    pub yaw_deg: f64,
}

impl VelocityNedYaw {
    pub fn from_vector(v: &Vec3, yaw_deg: f64) -> Self {
        Self {
            north_m_s: v.x,
            east_m_s: v.y,
            down_m_s: v.z,
            yaw_deg,
        }
    }

    pub fn to_vector(&self) -> Vec3 {
        Vec3::new(self.north_m_s, self.east_m_s, self.down_m_s)
    }

    pub fn is_finite(&self) -> bool {
        self.north_m_s.is_finite()
            && self.east_m_s.is_finite()
            && self.down_m_s.is_finite()
            && self.yaw_deg.is_finite()
    }
}

/// Position sample: geodetic fix and the matching local NED position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSample {
    pub geodetic: GeodeticPosition,
    pub ned: Vec3,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("vehicle rejected {action}: {reason}")]
    Rejected { action: String, reason: String },

    #[error("vehicle is not armed")]
    NotArmed,

    #[error("offboard mode is not active")]
    NotOffboard,

    #[error("vehicle link is down")]
    Disconnected,
}

impl DriverError {
    pub fn rejected(action: impl Into<String>, reason: impl Into<String>) -> Self {
        DriverError::Rejected {
            action: action.into(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
pub trait VehicleDriver: Send + Sync {
    async fn arm(&self) -> Result<(), DriverError>;

    /// Climb to `altitude_m` above the takeoff point.
    async fn takeoff(&self, altitude_m: f64) -> Result<(), DriverError>;

    async fn hold(&self) -> Result<(), DriverError>;

    async fn land(&self) -> Result<(), DriverError>;

    /// Fly to a geodetic target. `altitude_amsl_m` is above mean sea level.
    async fn goto_location(
        &self,
        latitude_deg: f64,
        longitude_deg: f64,
        altitude_amsl_m: f64,
        yaw_deg: f64,
    ) -> Result<(), DriverError>;

    async fn start_offboard(&self) -> Result<(), DriverError>;

    async fn set_velocity_ned(&self, velocity: VelocityNedYaw) -> Result<(), DriverError>;

    fn position(&self) -> BoxStream<'static, PositionSample>;

    fn velocity(&self) -> BoxStream<'static, Vec3>;

    fn heading(&self) -> BoxStream<'static, f64>;

    fn armed(&self) -> BoxStream<'static, bool>;

    /// Remaining battery in percent (0-100).
    fn battery(&self) -> BoxStream<'static, f64>;

    fn flight_mode(&self) -> BoxStream<'static, FlightMode>;

    /// GPS time in microseconds.
    fn gps_time(&self) -> BoxStream<'static, u64>;
}
