// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Vector Helpers
//!
//! All corridor and control math works on `nalgebra::Vector3<f64>` in the
//! local north/east/down frame. The helpers here centralise the two
//! operations every force term needs: magnitude limiting and normalisation
//! with a defined result for zero-length input.

use nalgebra::Vector3;

/// A vector in the local NED frame (metres or metres per second).
pub type Vec3 = Vector3<f64>;

/// Norm below which a vector is treated as zero-length.
pub const EPSILON: f64 = 1e-9;

/// Scale `v` down so that its norm does not exceed `limit`.
///
/// Vectors already within the limit are returned unchanged.
pub fn limit_magnitude(v: Vec3, limit: f64) -> Vec3 {
    let norm = v.norm();
    if norm > limit && norm > EPSILON {
        v * (limit / norm)
    } else {
        v
    }
}

/// Unit vector along `v`, or `None` when `v` has no usable direction.
pub fn try_normalize(v: &Vec3) -> Option<Vec3> {
    let norm = v.norm();
    if norm > EPSILON && norm.is_finite() {
        Some(v / norm)
    } else {
        None
    }
}

/// Unit vector along `v`, or the zero vector when `v` is degenerate.
pub fn normalize_or_zero(v: &Vec3) -> Vec3 {
    try_normalize(v).unwrap_or_else(Vec3::zeros)
}

/// Component of `v` orthogonal to the unit vector `axis`.
pub fn reject(v: &Vec3, axis: &Vec3) -> Vec3 {
    v - axis * v.dot(axis)
}

/// True when every component is finite.
pub fn is_finite(v: &Vec3) -> bool {
    v.iter().all(|c| c.is_finite())
}

/// Build a vector from a `[north, east, down]` triple.
pub fn from_array(a: [f64; 3]) -> Vec3 {
    Vec3::new(a[0], a[1], a[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_magnitude_scales_only_long_vectors() {
        let long = Vec3::new(3.0, 4.0, 0.0);
        let limited = limit_magnitude(long, 1.0);
        assert!((limited.norm() - 1.0).abs() < 1e-12);
        assert!((limited.x - 0.6).abs() < 1e-12);

        let short = Vec3::new(0.1, 0.0, 0.0);
        assert_eq!(limit_magnitude(short, 1.0), short);
    }

    #[test]
    fn test_normalize_zero_vector() {
        assert!(try_normalize(&Vec3::zeros()).is_none());
        assert_eq!(normalize_or_zero(&Vec3::zeros()), Vec3::zeros());
    }

    #[test]
    fn test_reject_removes_axis_component() {
        let v = Vec3::new(1.0, 2.0, 3.0);
        let axis = Vec3::new(1.0, 0.0, 0.0);
        assert_eq!(reject(&v, &axis), Vec3::new(0.0, 2.0, 3.0));
    }
}
