// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Altitude Deconfliction
//!
//! Maps each agent's current altitude onto a fixed-step ladder centred on the
//! swarm mean, so that agents transiting shared airspace never share a level.
//!
//! Every agent runs [`deconflict`] on its own replica of the pose table and
//! no consensus round confirms the result, so the function is pure and
//! bit-deterministic: the same input slice always yields the same output,
//! including the order of equal altitudes (input order is kept).

use helix_core::domain::agent::AgentId;
use helix_core::domain::node_config::DeconflictionSettings;
use std::collections::BTreeMap;

/// Ladder parameters. Bounds are heights above the site elevation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeconflictionParams {
    pub step: f64,
    pub bounds: (f64, f64),
}

impl Default for DeconflictionParams {
    fn default() -> Self {
        Self {
            step: 1.0,
            bounds: (10.0, 100.0),
        }
    }
}

impl From<DeconflictionSettings> for DeconflictionParams {
    fn from(settings: DeconflictionSettings) -> Self {
        Self {
            step: settings.step,
            bounds: (settings.min_height, settings.max_height),
        }
    }
}

/// Assign every agent a ladder altitude.
///
/// The output follows ascending input altitude; ties keep their input order.
/// The ladder is shifted up when its bottom rung would sit below
/// `bounds.0 + site_elevation`, then down when its top rung would exceed
/// `bounds.1 + site_elevation`.
pub fn deconflict(
    altitudes: &[(AgentId, f64)],
    site_elevation: f64,
    params: DeconflictionParams,
) -> Vec<(AgentId, f64)> {
    let n = altitudes.len();
    if n == 0 {
        return Vec::new();
    }

    let mut order: Vec<usize> = (0..n).collect();
    // sort_by is stable, so equal altitudes keep input order
    order.sort_by(|&a, &b| altitudes[a].1.total_cmp(&altitudes[b].1));

    let mean = altitudes.iter().map(|(_, alt)| alt).sum::<f64>() / n as f64;
    let centre = (n as f64 - 1.0) / 2.0;
    let mut ladder: Vec<f64> = (0..n)
        .map(|i| mean + (i as f64 - centre) * params.step)
        .collect();

    let floor = params.bounds.0 + site_elevation;
    let ceiling = params.bounds.1 + site_elevation;
    if ladder[0] < floor {
        let deficit = floor - ladder[0];
        ladder.iter_mut().for_each(|rung| *rung += deficit);
    }
    if ladder[n - 1] > ceiling {
        let excess = ladder[n - 1] - ceiling;
        ladder.iter_mut().for_each(|rung| *rung -= excess);
    }

    order
        .into_iter()
        .zip(ladder)
        .map(|(i, rung)| (altitudes[i].0.clone(), rung))
        .collect()
}

/// [`deconflict`] over a map. Ties are broken by agent id order.
pub fn deconflict_map(
    altitudes: &BTreeMap<AgentId, f64>,
    site_elevation: f64,
    params: DeconflictionParams,
) -> BTreeMap<AgentId, f64> {
    let input: Vec<(AgentId, f64)> = altitudes
        .iter()
        .map(|(id, alt)| (id.clone(), *alt))
        .collect();
    deconflict(&input, site_elevation, params).into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> AgentId {
        AgentId::new(s).unwrap()
    }

    fn six(values: [f64; 6]) -> Vec<(AgentId, f64)> {
        ["P101", "P102", "P103", "P104", "P105", "P106"]
            .iter()
            .zip(values)
            .map(|(name, alt)| (id(name), alt))
            .collect()
    }

    fn as_map(result: Vec<(AgentId, f64)>) -> BTreeMap<AgentId, f64> {
        result.into_iter().collect()
    }

    #[test]
    fn test_six_agent_ladder() {
        let result = as_map(deconflict(
            &six([12.0, 10.0, 16.0, 14.0, 20.0, 18.0]),
            0.0,
            DeconflictionParams::default(),
        ));
        assert_eq!(result[&id("P101")], 13.5);
        assert_eq!(result[&id("P102")], 12.5);
        assert_eq!(result[&id("P103")], 15.5);
        assert_eq!(result[&id("P104")], 14.5);
        assert_eq!(result[&id("P105")], 17.5);
        assert_eq!(result[&id("P106")], 16.5);
    }

    #[test]
    fn test_equal_altitudes_keep_input_order() {
        let result = deconflict(&six([20.0; 6]), 0.0, DeconflictionParams::default());
        let names: Vec<&str> = result.iter().map(|(a, _)| a.as_str()).collect();
        assert_eq!(names, ["P101", "P102", "P103", "P104", "P105", "P106"]);
        let rungs: Vec<f64> = result.iter().map(|(_, alt)| *alt).collect();
        assert_eq!(rungs, [17.5, 18.5, 19.5, 20.5, 21.5, 22.5]);
    }

    #[test]
    fn test_floor_shift_preserves_spacing() {
        let input = vec![(id("P101"), 2.0), (id("P102"), 4.0), (id("P103"), 3.0)];
        let result = deconflict(&input, 50.0, DeconflictionParams::default());
        let map = as_map(result);
        // Unclamped ladder 2,3,4 shifted up to start at 60.
        assert_eq!(map[&id("P101")], 60.0);
        assert_eq!(map[&id("P103")], 61.0);
        assert_eq!(map[&id("P102")], 62.0);
    }

    #[test]
    fn test_ceiling_shift() {
        let input = vec![(id("P101"), 200.0), (id("P102"), 200.0)];
        let params = DeconflictionParams {
            step: 2.0,
            bounds: (10.0, 100.0),
        };
        let map = as_map(deconflict(&input, 0.0, params));
        assert_eq!(map[&id("P101")], 98.0);
        assert_eq!(map[&id("P102")], 100.0);
    }

    #[test]
    fn test_empty_and_single() {
        assert!(deconflict(&[], 0.0, DeconflictionParams::default()).is_empty());
        let single = deconflict(&[(id("P101"), 42.0)], 0.0, DeconflictionParams::default());
        assert_eq!(single, vec![(id("P101"), 42.0)]);
    }

    #[test]
    fn test_independent_computations_agree() {
        let input = six([31.7, 29.2, 33.3, 29.2, 40.01, 35.5]);
        let a = deconflict(&input, 12.5, DeconflictionParams::default());
        let b = deconflict(&input.clone(), 12.5, DeconflictionParams::default());
        let bits = |r: &[(AgentId, f64)]| r.iter().map(|(i, v)| (i.clone(), v.to_bits())).collect::<Vec<_>>();
        assert_eq!(bits(&a), bits(&b));
    }

    #[test]
    fn test_map_wrapper_breaks_ties_by_id() {
        let mut input = BTreeMap::new();
        input.insert(id("P102"), 20.0);
        input.insert(id("P101"), 20.0);
        let result = deconflict_map(&input, 0.0, DeconflictionParams::default());
        assert_eq!(result[&id("P101")], 19.5);
        assert_eq!(result[&id("P102")], 20.5);
    }
}
