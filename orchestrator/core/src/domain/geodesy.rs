// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0
//! WGS-84 conversions between geodetic coordinates and a local NED frame
//! anchored at a reference point.

use serde::{Deserialize, Serialize};

use crate::domain::geometry::Vec3;

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const WGS84_E2: f64 = WGS84_F * (2.0 - WGS84_F);

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeodeticPosition {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    /// Altitude above mean sea level in metres.
    pub altitude_m: f64,
}

impl GeodeticPosition {
    pub fn new(latitude_deg: f64, longitude_deg: f64, altitude_m: f64) -> Self {
        Self {
            latitude_deg,
            longitude_deg,
            altitude_m,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.latitude_deg.is_finite() && self.longitude_deg.is_finite() && self.altitude_m.is_finite()
    }

    fn to_ecef(self) -> Vec3 {
        let lat = self.latitude_deg.to_radians();
        let lon = self.longitude_deg.to_radians();
        let (sin_lat, cos_lat) = lat.sin_cos();
        let (sin_lon, cos_lon) = lon.sin_cos();
        let n = WGS84_A / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();
        let h = self.altitude_m;
        Vec3::new(
            (n + h) * cos_lat * cos_lon,
            (n + h) * cos_lat * sin_lon,
            (n * (1.0 - WGS84_E2) + h) * sin_lat,
        )
    }

    fn from_ecef(p: &Vec3) -> Self {
        let lon = p.y.atan2(p.x);
        let rho = (p.x * p.x + p.y * p.y).sqrt();
        // Bowring-style fixed point iteration; converges in a handful of steps
        // for terrestrial altitudes.
        let mut lat = p.z.atan2(rho * (1.0 - WGS84_E2));
        let mut h = 0.0;
        for _ in 0..8 {
            let sin_lat = lat.sin();
            let n = WGS84_A / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();
            h = rho / lat.cos() - n;
            lat = p.z.atan2(rho * (1.0 - WGS84_E2 * n / (n + h)));
        }
        Self {
            latitude_deg: lat.to_degrees(),
            longitude_deg: lon.to_degrees(),
            altitude_m: h,
        }
    }
}

/// Local tangent plane anchored at `reference`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalFrame {
    reference: GeodeticPosition,
    origin: Vec3,
}

impl LocalFrame {
    pub fn new(reference: GeodeticPosition) -> Self {
        Self {
            reference,
            origin: reference.to_ecef(),
        }
    }

    pub fn reference(&self) -> GeodeticPosition {
        self.reference
    }

    fn basis(&self) -> (Vec3, Vec3, Vec3) {
        let lat = self.reference.latitude_deg.to_radians();
        let lon = self.reference.longitude_deg.to_radians();
        let (sin_lat, cos_lat) = lat.sin_cos();
        let (sin_lon, cos_lon) = lon.sin_cos();
        let north = Vec3::new(-sin_lat * cos_lon, -sin_lat * sin_lon, cos_lat);
        let east = Vec3::new(-sin_lon, cos_lon, 0.0);
        let down = Vec3::new(-cos_lat * cos_lon, -cos_lat * sin_lon, -sin_lat);
        (north, east, down)
    }

    pub fn to_ned(&self, position: &GeodeticPosition) -> Vec3 {
        let delta = position.to_ecef() - self.origin;
        let (n, e, d) = self.basis();
        Vec3::new(delta.dot(&n), delta.dot(&e), delta.dot(&d))
    }

    pub fn to_geodetic(&self, ned: &Vec3) -> GeodeticPosition {
        let (n, e, d) = self.basis();
        let ecef = self.origin + n * ned.x + e * ned.y + d * ned.z;
        GeodeticPosition::from_ecef(&ecef)
    }
}
