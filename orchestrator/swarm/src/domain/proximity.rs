// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Pairwise proximity scan over the replicated pose table.

use helix_core::domain::agent::AgentId;
use helix_core::domain::pose::PoseSnapshot;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProximityAlert {
    pub a: AgentId,
    pub b: AgentId,
    pub distance: f64,
}

/// Every unordered pair closer than `min_proximity`, `a < b` by id.
/// Agents that have not reported a position yet are not part of any pair.
///
/// Diagnostic only; nothing here feeds back into control.
pub fn proximity_check(table: &PoseSnapshot, min_proximity: f64) -> Vec<ProximityAlert> {
    let poses: Vec<_> = table.iter().filter(|(_, pose)| pose.has_fix()).collect();
    let mut alerts = Vec::new();
    for (i, (id_a, pose_a)) in poses.iter().enumerate() {
        for (id_b, pose_b) in &poses[i + 1..] {
            let distance = (pose_b.position - pose_a.position).norm();
            if distance < min_proximity {
                alerts.push(ProximityAlert {
                    a: (*id_a).clone(),
                    b: (*id_b).clone(),
                    distance,
                });
            }
        }
    }
    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use helix_core::domain::geometry::Vec3;
    use helix_core::domain::pose::ReplicatedPose;
    use std::collections::BTreeSet;

    fn table(entries: &[(&str, Vec3)]) -> PoseSnapshot {
        entries
            .iter()
            .map(|(name, p)| (AgentId::new(*name).unwrap(), ReplicatedPose::at_position(*p)))
            .collect()
    }

    #[test]
    fn test_four_coincident_agents() {
        let p = Vec3::new(5.0, 5.0, 5.0);
        let snapshot = table(&[("P101", p), ("P102", p), ("P103", p), ("P104", p)]);
        let alerts = proximity_check(&snapshot, 2.0);
        assert_eq!(alerts.len(), 6);
        assert!(alerts.iter().all(|a| a.distance == 0.0));
    }

    #[test]
    fn test_never_reports_both_orders() {
        let snapshot = table(&[
            ("P101", Vec3::new(0.0, 0.0, 0.0)),
            ("P102", Vec3::new(1.0, 0.0, 0.0)),
            ("P103", Vec3::new(0.5, 0.5, 0.0)),
        ]);
        let alerts = proximity_check(&snapshot, 5.0);
        let mut seen = BTreeSet::new();
        for alert in &alerts {
            assert!(alert.a < alert.b);
            assert!(seen.insert((alert.a.clone(), alert.b.clone())));
            assert!(!seen.contains(&(alert.b.clone(), alert.a.clone())));
        }
        assert_eq!(alerts.len(), 3);
    }

    #[test]
    fn test_threshold_is_strict() {
        let snapshot = table(&[
            ("P101", Vec3::new(0.0, 0.0, 0.0)),
            ("P102", Vec3::new(2.0, 0.0, 0.0)),
            ("P103", Vec3::new(0.0, 1.0, 0.0)),
        ]);
        let alerts = proximity_check(&snapshot, 2.0);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].a.as_str(), "P101");
        assert_eq!(alerts[0].b.as_str(), "P103");
        assert_eq!(alerts[0].distance, 1.0);
    }

    #[test]
    fn test_agents_without_fix_are_ignored() {
        let mut snapshot = table(&[("P101", Vec3::new(0.5, 0.0, 0.0))]);
        snapshot.insert(
            AgentId::new("P102").unwrap(),
            ReplicatedPose::new(tokio::time::Instant::now()),
        );
        assert!(proximity_check(&snapshot, 2.0).is_empty());
    }
}
