// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0

// Simulated Vehicle - Kinematic VehicleDriver
//
// A point-mass multirotor stand-in for the autopilot link. It integrates
// commanded velocities on a fixed step, flies takeoff/goto legs at a cruise
// speed and publishes every telemetry stream from one watch channel.
// Used by the `simulate` command and by the swarm integration tests.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::time::Duration;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::agent::FlightMode;
use crate::domain::driver::{DriverError, PositionSample, VehicleDriver, VelocityNedYaw};
use crate::domain::geodesy::{GeodeticPosition, LocalFrame};
use crate::domain::geometry::{limit_magnitude, Vec3};

pub const SIM_STEP: Duration = Duration::from_millis(20);
pub const CRUISE_SPEED: f64 = 5.0;
pub const DESCENT_SPEED: f64 = 1.5;
const BATTERY_DRAIN_PER_S: f64 = 0.02;
/// GPS epoch offset so simulated timestamps are never zero.
const GPS_EPOCH_US: u64 = 1_700_000_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Guidance {
    Idle,
    Velocity(Vec3),
    /// Fly to the target at cruise speed, then hold there.
    Goto(Vec3),
    Descend,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VehicleState {
    pub ned: Vec3,
    pub velocity: Vec3,
    pub heading_deg: f64,
    pub armed: bool,
    pub mode: FlightMode,
    pub battery_percent: f64,
    pub gps_time_us: u64,
    guidance: Guidance,
}

impl VehicleState {
    fn new(ned: Vec3) -> Self {
        Self {
            ned,
            velocity: Vec3::zeros(),
            heading_deg: 0.0,
            armed: false,
            mode: FlightMode::Ready,
            battery_percent: 100.0,
            gps_time_us: GPS_EPOCH_US,
            guidance: Guidance::Idle,
        }
    }

    /// Advance the point mass by `dt` seconds. `ground_down` is the NED
    /// down coordinate of the launch surface.
    fn step(&mut self, dt: f64, ground_down: f64) {
        self.gps_time_us += (dt * 1e6) as u64;
        if self.armed {
            self.battery_percent = (self.battery_percent - BATTERY_DRAIN_PER_S * dt).max(0.0);
        }

        match self.guidance {
            Guidance::Idle => self.velocity = Vec3::zeros(),
            Guidance::Velocity(v) => self.velocity = v,
            Guidance::Goto(target) => {
                let to_go = target - self.ned;
                if to_go.norm() <= CRUISE_SPEED * dt {
                    self.ned = target;
                    self.velocity = Vec3::zeros();
                    self.guidance = Guidance::Idle;
                    self.mode = FlightMode::Hold;
                    return;
                }
                self.velocity = limit_magnitude(to_go / dt, CRUISE_SPEED);
            }
            Guidance::Descend => self.velocity = Vec3::new(0.0, 0.0, DESCENT_SPEED),
        }

        self.ned += self.velocity * dt;

        // The ground stops everything below the launch surface.
        if self.ned.z >= ground_down {
            self.ned.z = ground_down;
            if self.velocity.z > 0.0 {
                self.velocity.z = 0.0;
            }
            if self.guidance == Guidance::Descend {
                self.guidance = Guidance::Idle;
                self.armed = false;
                self.velocity = Vec3::zeros();
                debug!("Simulated vehicle touched down and disarmed");
            }
        }
    }
}

/// Kinematic vehicle driven by a background integration task.
///
/// The task stops when `cancel` fires or the vehicle is dropped.
pub struct SimulatedVehicle {
    frame: LocalFrame,
    ground_down: f64,
    state: watch::Sender<VehicleState>,
    cancel: CancellationToken,
}

impl SimulatedVehicle {
    /// Spawn a vehicle resting at `start` (local NED). Requires a tokio runtime.
    pub fn spawn(frame: LocalFrame, start: Vec3, cancel: CancellationToken) -> Self {
        let (state, _) = watch::channel(VehicleState::new(start));
        let vehicle = Self {
            frame,
            ground_down: start.z,
            state,
            cancel: cancel.child_token(),
        };

        let sender = vehicle.state.clone();
        let ground_down = vehicle.ground_down;
        let token = vehicle.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SIM_STEP);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let dt = SIM_STEP.as_secs_f64();
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        sender.send_modify(|s| s.step(dt, ground_down));
                    }
                }
            }
            debug!("Simulated vehicle integrator stopped");
        });

        vehicle
    }

    pub fn frame(&self) -> &LocalFrame {
        &self.frame
    }

    pub fn snapshot(&self) -> VehicleState {
        self.state.borrow().clone()
    }

    /// Override the remaining battery, e.g. to exercise low-battery paths.
    pub fn set_battery(&self, percent: f64) {
        self.state.send_modify(|s| s.battery_percent = percent.clamp(0.0, 100.0));
    }

    fn stream<T, F>(&self, project: F) -> BoxStream<'static, T>
    where
        T: Send + 'static,
        F: Fn(&VehicleState) -> T + Send + 'static,
    {
        WatchStream::new(self.state.subscribe())
            .map(move |s| project(&s))
            .boxed()
    }

    fn require_armed(&self) -> Result<(), DriverError> {
        if self.state.borrow().armed {
            Ok(())
        } else {
            Err(DriverError::NotArmed)
        }
    }
}

impl Drop for SimulatedVehicle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl VehicleDriver for SimulatedVehicle {
    async fn arm(&self) -> Result<(), DriverError> {
        self.state.send_modify(|s| {
            s.armed = true;
            if s.mode == FlightMode::Land {
                s.mode = FlightMode::Ready;
            }
        });
        info!("Simulated vehicle armed");
        Ok(())
    }

    async fn takeoff(&self, altitude_m: f64) -> Result<(), DriverError> {
        if !(altitude_m.is_finite() && altitude_m > 0.0) {
            return Err(DriverError::rejected("takeoff", format!("altitude {}", altitude_m)));
        }
        self.require_armed()?;
        let ground = self.ground_down;
        self.state.send_modify(|s| {
            let target = Vec3::new(s.ned.x, s.ned.y, ground - altitude_m);
            s.mode = FlightMode::Takeoff;
            s.guidance = Guidance::Goto(target);
        });
        Ok(())
    }

    async fn hold(&self) -> Result<(), DriverError> {
        self.state.send_modify(|s| {
            s.mode = FlightMode::Hold;
            s.guidance = Guidance::Idle;
        });
        Ok(())
    }

    async fn land(&self) -> Result<(), DriverError> {
        self.state.send_modify(|s| {
            s.mode = FlightMode::Land;
            s.guidance = Guidance::Descend;
        });
        Ok(())
    }

    async fn goto_location(
        &self,
        latitude_deg: f64,
        longitude_deg: f64,
        altitude_amsl_m: f64,
        yaw_deg: f64,
    ) -> Result<(), DriverError> {
        let target_geo = GeodeticPosition::new(latitude_deg, longitude_deg, altitude_amsl_m);
        if !target_geo.is_finite() || !yaw_deg.is_finite() {
            return Err(DriverError::rejected("goto", "non-finite target"));
        }
        self.require_armed()?;
        let target = self.frame.to_ned(&target_geo);
        self.state.send_modify(|s| {
            s.mode = FlightMode::Hold;
            s.heading_deg = yaw_deg;
            s.guidance = Guidance::Goto(target);
        });
        Ok(())
    }

    async fn start_offboard(&self) -> Result<(), DriverError> {
        self.require_armed()?;
        self.state.send_modify(|s| {
            s.mode = FlightMode::Offboard;
            s.guidance = Guidance::Velocity(Vec3::zeros());
        });
        Ok(())
    }

    async fn set_velocity_ned(&self, velocity: VelocityNedYaw) -> Result<(), DriverError> {
        if !velocity.is_finite() {
            return Err(DriverError::rejected("velocity setpoint", "non-finite"));
        }
        let mut accepted = false;
        self.state.send_if_modified(|s| {
            if s.mode != FlightMode::Offboard {
                return false;
            }
            accepted = true;
            s.guidance = Guidance::Velocity(velocity.to_vector());
            s.heading_deg = velocity.yaw_deg;
            true
        });
        if accepted {
            Ok(())
        } else {
            Err(DriverError::NotOffboard)
        }
    }

    fn position(&self) -> BoxStream<'static, PositionSample> {
        let frame = self.frame;
        self.stream(move |s| PositionSample {
            geodetic: frame.to_geodetic(&s.ned),
            ned: s.ned,
        })
    }

    fn velocity(&self) -> BoxStream<'static, Vec3> {
        self.stream(|s| s.velocity)
    }

    fn heading(&self) -> BoxStream<'static, f64> {
        self.stream(|s| s.heading_deg)
    }

    fn armed(&self) -> BoxStream<'static, bool> {
        self.stream(|s| s.armed)
    }

    fn battery(&self) -> BoxStream<'static, f64> {
        self.stream(|s| s.battery_percent)
    }

    fn flight_mode(&self) -> BoxStream<'static, FlightMode> {
        self.stream(|s| s.mode.clone())
    }

    fn gps_time(&self) -> BoxStream<'static, u64> {
        self.stream(|s| s.gps_time_us)
    }
}
