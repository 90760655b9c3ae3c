// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Corridor Model
//!
//! Static, shared description of the paths agents follow. A [`CorridorModel`]
//! is built once from an [`ExperimentConfig`] and is immutable afterwards;
//! every agent derives the same directions and the same [`LaneAdjacency`]
//! from the same configuration.
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`Path`] | waypoints, unit travel directions, lane radii, shape, repeat policy |
//! | [`SwitchPermissions`] | per-agent, shrinking set of allowed path transitions |
//! | [`LaneAdjacency`] | precomputed switch targets per (path, waypoint index) |
//!
//! Geometry problems (zero-length segments, empty corridors, mismatched
//! radius lists) are reported at load time as [`CorridorError`] so a mission
//! can never start on a malformed corridor.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::domain::experiment::{ExperimentConfig, PathSpec};
use crate::domain::geometry::{self, Vec3};

/// Index of a path inside the corridor.
pub type PathId = usize;

/// Separation tolerance applied when matching points on neighbouring paths.
pub const ADJACENCY_TOLERANCE: f64 = 1.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    #[default]
    Tube,
    Ribbon,
    Cylinder,
}

/// What happens after the last waypoint of a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RepeatPolicy {
    /// Wrap around to waypoint 0 and keep going.
    #[default]
    #[serde(alias = "repeat")]
    Repeat,
    /// Stop migrating but keep the lane-holding terms active.
    #[serde(alias = "stay")]
    Stay,
    /// Freeze all path terms; only separation remains.
    #[serde(alias = "stop")]
    Stop,
}

impl RepeatPolicy {
    pub fn wraps(self) -> bool {
        matches!(self, RepeatPolicy::Repeat)
    }
}

/// Sense of the rotation term around a path's centreline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum RotationSense {
    #[default]
    Positive,
    Negative,
}

impl RotationSense {
    pub fn sign(self) -> f64 {
        match self {
            RotationSense::Positive => 1.0,
            RotationSense::Negative => -1.0,
        }
    }
}

impl TryFrom<i8> for RotationSense {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(RotationSense::Positive),
            -1 => Ok(RotationSense::Negative),
            other => Err(format!("rotation sense must be 1 or -1, got {}", other)),
        }
    }
}

impl From<RotationSense> for i8 {
    fn from(value: RotationSense) -> Self {
        match value {
            RotationSense::Positive => 1,
            RotationSense::Negative => -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CorridorError {
    #[error("corridor has no paths")]
    EmptyCorridor,

    #[error("path {path} is malformed: {reason}")]
    MalformedPath { path: PathId, reason: String },

    #[error("path {path} lists switching point {index} but has only {len} waypoints")]
    InvalidSwitchPoint { path: PathId, index: usize, len: usize },

    #[error("unknown path {0}")]
    UnknownPath(PathId),
}

impl CorridorError {
    fn malformed(path: PathId, reason: impl Into<String>) -> Self {
        CorridorError::MalformedPath {
            path,
            reason: reason.into(),
        }
    }

    /// Attribute a malformed-path error to `path`.
    fn for_path(self, path: PathId) -> Self {
        match self {
            CorridorError::MalformedPath { reason, .. } => {
                CorridorError::MalformedPath { path, reason }
            }
            other => other,
        }
    }
}

/// Unit travel directions for `points`.
///
/// Direction `i` points from waypoint `i` to `i + 1`. The direction stored at
/// the last waypoint depends on `repeat`: wrapping paths point back to
/// waypoint 0, `Stay`/`Stop` paths continue along the final segment.
///
/// Fewer than two points or a zero-length segment is a
/// [`CorridorError::MalformedPath`] reported against path 0;
/// [`Path::from_spec`] attributes it to the real path.
pub fn derive_directions(
    points: &[Vec3],
    repeat: RepeatPolicy,
) -> Result<Vec<Vec3>, CorridorError> {
    if points.len() < 2 {
        return Err(CorridorError::malformed(
            0,
            format!("needs at least 2 waypoints, got {}", points.len()),
        ));
    }

    let last = points.len() - 1;
    let mut directions = Vec::with_capacity(points.len());
    for i in 0..points.len() {
        let (from, to) = if i < last {
            (i, i + 1)
        } else if repeat.wraps() {
            (last, 0)
        } else {
            (last - 1, last)
        };
        let segment = points[to] - points[from];
        let direction = geometry::try_normalize(&segment).ok_or_else(|| {
            CorridorError::malformed(
                0,
                format!("zero-length segment between waypoints {} and {}", from, to),
            )
        })?;
        directions.push(direction);
    }
    Ok(directions)
}

/// One corridor path with its derived geometry.
#[derive(Debug, Clone)]
pub struct Path {
    pub id: PathId,
    waypoints: Vec<Vec3>,
    directions: Vec<Vec3>,
    radii: Vec<f64>,
    pub shape: ShapeKind,
    pub rotation: RotationSense,
    pub repeat: RepeatPolicy,
    ribbon_normals: Vec<Vec3>,
    switching_points: Vec<usize>,
}

impl Path {
    pub fn from_spec(id: PathId, spec: &PathSpec) -> Result<Self, CorridorError> {
        let malformed = |reason: String| CorridorError::malformed(id, reason);

        let waypoints: Vec<Vec3> = spec.waypoints.iter().copied().map(geometry::from_array).collect();
        if waypoints.iter().any(|p| !geometry::is_finite(p)) {
            return Err(malformed("waypoint coordinates must be finite".into()));
        }
        let directions =
            derive_directions(&waypoints, spec.repeat).map_err(|e| e.for_path(id))?;

        let radii = spec.lane_radius.expand(waypoints.len());
        if radii.len() != waypoints.len() {
            return Err(malformed(format!(
                "{} lane radii for {} waypoints",
                radii.len(),
                waypoints.len()
            )));
        }
        if radii.iter().any(|r| !r.is_finite() || *r < 0.0) {
            return Err(malformed("lane radii must be finite and non-negative".into()));
        }

        let ribbon_normals = if spec.shape == ShapeKind::Ribbon {
            if spec.ribbon_normals.len() != waypoints.len() {
                return Err(malformed(format!(
                    "ribbon needs {} normals, got {}",
                    waypoints.len(),
                    spec.ribbon_normals.len()
                )));
            }
            spec.ribbon_normals
                .iter()
                .enumerate()
                .map(|(i, n)| {
                    geometry::try_normalize(&geometry::from_array(*n))
                        .ok_or_else(|| malformed(format!("ribbon normal {} has no direction", i)))
                })
                .collect::<Result<Vec<_>, _>>()?
        } else {
            Vec::new()
        };

        for &index in &spec.switching_points {
            if index >= waypoints.len() {
                return Err(CorridorError::InvalidSwitchPoint {
                    path: id,
                    index,
                    len: waypoints.len(),
                });
            }
        }

        Ok(Self {
            id,
            waypoints,
            directions,
            radii,
            shape: spec.shape,
            rotation: spec.rotation,
            repeat: spec.repeat,
            ribbon_normals,
            switching_points: spec.switching_points.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn last_index(&self) -> usize {
        self.waypoints.len() - 1
    }

    /// Index following `index`, wrapping to 0 at the end.
    pub fn next_index(&self, index: usize) -> usize {
        (index + 1) % self.waypoints.len()
    }

    pub fn waypoint(&self, index: usize) -> Vec3 {
        self.waypoints[index]
    }

    pub fn direction(&self, index: usize) -> Vec3 {
        self.directions[index]
    }

    pub fn radius(&self, index: usize) -> f64 {
        self.radii[index]
    }

    /// Unit ribbon normal at `index` (zero for non-ribbon paths).
    pub fn ribbon_normal(&self, index: usize) -> Vec3 {
        self.ribbon_normals.get(index).copied().unwrap_or_else(Vec3::zeros)
    }

    pub fn final_waypoint(&self) -> Vec3 {
        self.waypoints[self.last_index()]
    }

    pub fn switching_points(&self) -> &[usize] {
        &self.switching_points
    }

    pub fn waypoints(&self) -> &[Vec3] {
        &self.waypoints
    }

    /// Nearest waypoint to `position`; ties resolve to the later index.
    pub fn nearest_index(&self, position: &Vec3) -> usize {
        let mut best = 0;
        let mut best_distance = f64::INFINITY;
        for (i, p) in self.waypoints.iter().enumerate() {
            let d = (position - p).norm();
            if d <= best_distance {
                best_distance = d;
                best = i;
            }
        }
        best
    }
}

/// All paths of an experiment.
#[derive(Debug, Clone)]
pub struct CorridorModel {
    paths: Vec<Path>,
}

impl CorridorModel {
    pub fn from_experiment(config: &ExperimentConfig) -> Result<Self, CorridorError> {
        Self::from_specs(&config.paths)
    }

    pub fn from_specs(specs: &[PathSpec]) -> Result<Self, CorridorError> {
        if specs.is_empty() {
            return Err(CorridorError::EmptyCorridor);
        }
        let paths = specs
            .iter()
            .enumerate()
            .map(|(id, spec)| Path::from_spec(id, spec))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { paths })
    }

    pub fn path(&self, id: PathId) -> Result<&Path, CorridorError> {
        self.paths.get(id).ok_or(CorridorError::UnknownPath(id))
    }

    pub fn paths(&self) -> &[Path] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Transitions an agent may still perform, keyed by the path it leaves.
///
/// Permissions only ever shrink: once an agent departs a path, that path can
/// neither be left again nor entered again for the rest of the mission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchPermissions {
    allowed: BTreeMap<PathId, BTreeSet<PathId>>,
}

impl SwitchPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: &BTreeMap<PathId, Vec<PathId>>) -> Self {
        let allowed = map
            .iter()
            .map(|(from, to)| {
                let targets = to.iter().copied().filter(|t| t != from).collect();
                (*from, targets)
            })
            .collect();
        Self { allowed }
    }

    pub fn permits(&self, from: PathId, to: PathId) -> bool {
        self.allowed.get(&from).is_some_and(|targets| targets.contains(&to))
    }

    /// Remove `departed` as both a source and a destination.
    pub fn revoke_departed(&mut self, departed: PathId) {
        self.allowed.remove(&departed);
        for targets in self.allowed.values_mut() {
            targets.remove(&departed);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (PathId, &BTreeSet<PathId>)> {
        self.allowed.iter().map(|(from, to)| (*from, to))
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.values().all(|t| t.is_empty())
    }
}

/// A reachable point on another path.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchTarget {
    pub next_path: PathId,
    pub next_index: usize,
    /// Unit vector from the point on the next path to the switch point
    /// (zero when the two points coincide).
    pub pass_vector: Vec3,
    pub distance: f64,
}

/// Precomputed switch targets, immutable once built.
#[derive(Debug, Clone, Default)]
pub struct LaneAdjacency {
    entries: BTreeMap<(PathId, usize), Vec<SwitchTarget>>,
}

impl LaneAdjacency {
    /// Targets reachable from `(path, index)`, nearest first.
    pub fn targets(&self, path: PathId, index: usize) -> &[SwitchTarget] {
        self.entries
            .get(&(path, index))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Compute lane adjacency for the transitions in `permissions`.
///
/// For every switching point of every source path and every permitted next
/// path, the nearest point on the next path whose separation is within
/// `1.01 × (r_source + r_next)` becomes a [`SwitchTarget`].
pub fn build_adjacency(model: &CorridorModel, permissions: &SwitchPermissions) -> LaneAdjacency {
    let mut entries: BTreeMap<(PathId, usize), Vec<SwitchTarget>> = BTreeMap::new();

    for (from, targets) in permissions.iter() {
        let Ok(source) = model.path(from) else {
            continue;
        };
        for &switch_point in source.switching_points() {
            let p = source.waypoint(switch_point);
            let r_p = source.radius(switch_point);

            for &to in targets {
                let Ok(next) = model.path(to) else {
                    continue;
                };
                let mut best: Option<SwitchTarget> = None;
                for k in 0..next.len() {
                    let q = next.waypoint(k);
                    let distance = (p - q).norm();
                    let reach = ADJACENCY_TOLERANCE * (r_p + next.radius(k));
                    let closer = best.as_ref().is_none_or(|b| distance < b.distance);
                    if distance <= reach && closer {
                        best = Some(SwitchTarget {
                            next_path: to,
                            next_index: k,
                            pass_vector: geometry::normalize_or_zero(&(p - q)),
                            distance,
                        });
                    }
                }
                if let Some(target) = best {
                    entries.entry((from, switch_point)).or_default().push(target);
                }
            }
        }
    }

    for targets in entries.values_mut() {
        targets.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.next_path.cmp(&b.next_path))
        });
    }

    LaneAdjacency { entries }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::experiment::RadiusSpec;

    fn spec(points: Vec<[f64; 3]>, radius: f64, repeat: RepeatPolicy) -> PathSpec {
        PathSpec {
            waypoints: points,
            lane_radius: RadiusSpec::Uniform(radius),
            shape: ShapeKind::Tube,
            rotation: RotationSense::Positive,
            repeat,
            ribbon_normals: vec![],
            switching_points: vec![],
        }
    }

    #[test]
    fn test_directions_repeat_wraps_to_first_point() {
        let points = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(10.0, 0.0, 0.0),
            Vec3::new(10.0, 10.0, 0.0),
        ];
        let dirs = derive_directions(&points, RepeatPolicy::Repeat).unwrap();
        assert_eq!(dirs.len(), 3);
        assert_eq!(dirs[0], Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(dirs[1], Vec3::new(0.0, 1.0, 0.0));
        let expected = Vec3::new(-1.0, -1.0, 0.0).normalize();
        assert!((dirs[2] - expected).norm() < 1e-12);
    }

    #[test]
    fn test_directions_stay_reuses_last_segment() {
        let points = vec![Vec3::new(0.0, 0.0, 0.0), Vec3::new(0.0, 5.0, 0.0)];
        for policy in [RepeatPolicy::Stay, RepeatPolicy::Stop] {
            let dirs = derive_directions(&points, policy).unwrap();
            assert_eq!(dirs[1], Vec3::new(0.0, 1.0, 0.0));
        }
    }

    #[test]
    fn test_zero_length_segment_is_malformed() {
        let s = spec(vec![[0.0, 0.0, 0.0], [0.0, 0.0, 0.0], [1.0, 0.0, 0.0]], 1.0, RepeatPolicy::Stop);
        let err = CorridorModel::from_specs(&[s]).unwrap_err();
        assert!(matches!(err, CorridorError::MalformedPath { path: 0, .. }));
    }

    #[test]
    fn test_derive_directions_reports_malformed_path() {
        let single = derive_directions(&[Vec3::zeros()], RepeatPolicy::Stop).unwrap_err();
        assert!(matches!(single, CorridorError::MalformedPath { path: 0, .. }));

        let points = vec![Vec3::new(1.0, 1.0, 0.0), Vec3::new(1.0, 1.0, 0.0)];
        let zero = derive_directions(&points, RepeatPolicy::Stay).unwrap_err();
        match zero {
            CorridorError::MalformedPath { reason, .. } => assert!(reason.contains("zero-length")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_malformed_path_carries_its_id() {
        let good = spec(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]], 1.0, RepeatPolicy::Stop);
        let short = spec(vec![[0.0, 0.0, 0.0]], 1.0, RepeatPolicy::Stop);
        let err = CorridorModel::from_specs(&[good, short]).unwrap_err();
        assert!(matches!(err, CorridorError::MalformedPath { path: 1, .. }));
    }

    #[test]
    fn test_zero_ribbon_normal_is_malformed() {
        let mut s = spec(vec![[0.0, 0.0, 0.0], [5.0, 0.0, 0.0]], 1.0, RepeatPolicy::Stop);
        s.shape = ShapeKind::Ribbon;
        s.ribbon_normals = vec![[0.0, 0.0, 1.0], [0.0, 0.0, 0.0]];
        match CorridorModel::from_specs(&[s.clone()]).unwrap_err() {
            CorridorError::MalformedPath { path: 0, reason } => assert!(reason.contains("normal 1")),
            other => panic!("unexpected error {:?}", other),
        }

        s.ribbon_normals[1] = [0.0, 0.0, 2.0];
        let model = CorridorModel::from_specs(&[s]).unwrap();
        assert_eq!(model.paths()[0].ribbon_normal(1), Vec3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn test_repeat_wrap_segment_must_not_be_zero() {
        // Closed loop whose last point repeats the first.
        let s = spec(
            vec![[0.0, 0.0, 0.0], [5.0, 0.0, 0.0], [0.0, 0.0, 0.0]],
            1.0,
            RepeatPolicy::Repeat,
        );
        assert!(CorridorModel::from_specs(&[s]).is_err());
    }

    #[test]
    fn test_empty_corridor_fails() {
        assert_eq!(CorridorModel::from_specs(&[]).unwrap_err(), CorridorError::EmptyCorridor);
    }

    #[test]
    fn test_radius_mismatch_fails() {
        let mut s = spec(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]], 1.0, RepeatPolicy::Stop);
        s.lane_radius = RadiusSpec::PerWaypoint(vec![1.0, 1.0, 1.0]);
        assert!(CorridorModel::from_specs(&[s]).is_err());
    }

    #[test]
    fn test_switch_point_out_of_range() {
        let mut s = spec(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]], 1.0, RepeatPolicy::Stop);
        s.switching_points = vec![2];
        assert!(matches!(
            CorridorModel::from_specs(&[s]).unwrap_err(),
            CorridorError::InvalidSwitchPoint { index: 2, .. }
        ));
    }

    fn two_parallel_lanes() -> CorridorModel {
        let mut a = spec(
            vec![[0.0, 0.0, -10.0], [10.0, 0.0, -10.0], [20.0, 0.0, -10.0]],
            1.0,
            RepeatPolicy::Stop,
        );
        a.switching_points = vec![1];
        let b = spec(
            vec![[0.0, 2.0, -10.0], [10.0, 2.0, -10.0], [20.0, 2.0, -10.0]],
            1.0,
            RepeatPolicy::Stop,
        );
        let far = spec(
            vec![[0.0, 50.0, -10.0], [10.0, 50.0, -10.0]],
            1.0,
            RepeatPolicy::Stop,
        );
        CorridorModel::from_specs(&[a, b, far]).unwrap()
    }

    #[test]
    fn test_build_adjacency_picks_nearest_point() {
        let model = two_parallel_lanes();
        let permissions = SwitchPermissions::from_map(&BTreeMap::from([(0, vec![1, 2])]));
        let adjacency = build_adjacency(&model, &permissions);

        let targets = adjacency.targets(0, 1);
        assert_eq!(targets.len(), 1, "far lane must be out of reach");
        assert_eq!(targets[0].next_path, 1);
        assert_eq!(targets[0].next_index, 1);
        assert!((targets[0].distance - 2.0).abs() < 1e-12);
        assert!((targets[0].pass_vector - Vec3::new(0.0, -1.0, 0.0)).norm() < 1e-12);

        assert!(adjacency.targets(0, 0).is_empty());
        assert!(adjacency.targets(1, 1).is_empty());
    }

    #[test]
    fn test_adjacency_tolerance_allows_touching_lanes() {
        let model = two_parallel_lanes();
        // Lanes 2 m apart with radius 1 each touch exactly; tolerance keeps them adjacent.
        let permissions = SwitchPermissions::from_map(&BTreeMap::from([(0, vec![1])]));
        assert_eq!(build_adjacency(&model, &permissions).len(), 1);
    }

    #[test]
    fn test_permissions_revoke_departed() {
        let mut permissions =
            SwitchPermissions::from_map(&BTreeMap::from([(0, vec![1]), (1, vec![0, 2])]));
        assert!(permissions.permits(0, 1));
        assert!(permissions.permits(1, 0));

        permissions.revoke_departed(0);
        assert!(!permissions.permits(0, 1));
        assert!(!permissions.permits(1, 0));
        assert!(permissions.permits(1, 2));
    }

    #[test]
    fn test_nearest_index_prefers_later_on_tie() {
        let s = spec(vec![[0.0, 0.0, 0.0], [2.0, 0.0, 0.0]], 1.0, RepeatPolicy::Stop);
        let path = Path::from_spec(0, &s).unwrap();
        assert_eq!(path.nearest_index(&Vec3::new(1.0, 0.0, 0.0)), 1);
        assert_eq!(path.nearest_index(&Vec3::new(-5.0, 0.0, 0.0)), 0);
    }
}
