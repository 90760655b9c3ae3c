// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentId;
use crate::domain::corridor::PathId;
use crate::domain::mission::{Command, MissionState};

/// Observable swarm events, fanned out through the in-process event bus.
///
/// `agent_id` is always the node that observed the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SwarmEvent {
    AgentDiscovered {
        agent_id: AgentId,
        peer: AgentId,
        discovered_at: DateTime<Utc>,
    },
    PeerLinkLost {
        agent_id: AgentId,
        peer: AgentId,
        lost_at: DateTime<Utc>,
    },
    PeerLinkRestored {
        agent_id: AgentId,
        peer: AgentId,
        restored_at: DateTime<Utc>,
    },
    PeerEvicted {
        agent_id: AgentId,
        peer: AgentId,
        evicted_at: DateTime<Utc>,
    },
    OwnLinkLost {
        agent_id: AgentId,
        lost_at: DateTime<Utc>,
    },
    OwnLinkRestored {
        agent_id: AgentId,
        restored_at: DateTime<Utc>,
    },
    LaneSwitched {
        agent_id: AgentId,
        from_path: PathId,
        to_path: PathId,
        to_index: usize,
        switched_at: DateTime<Utc>,
    },
    MissionStateChanged {
        agent_id: AgentId,
        from: MissionState,
        to: MissionState,
        changed_at: DateTime<Utc>,
    },
    CommandRejected {
        agent_id: AgentId,
        command: Option<Command>,
        reason: String,
        rejected_at: DateTime<Utc>,
    },
    ProximityWarning {
        agent_id: AgentId,
        a: AgentId,
        b: AgentId,
        distance: f64,
        detected_at: DateTime<Utc>,
    },
    AltitudeFenceBreached {
        agent_id: AgentId,
        height_m: f64,
        breached_at: DateTime<Utc>,
    },
}

impl SwarmEvent {
    pub fn agent_id(&self) -> &AgentId {
        match self {
            SwarmEvent::AgentDiscovered { agent_id, .. }
            | SwarmEvent::PeerLinkLost { agent_id, .. }
            | SwarmEvent::PeerLinkRestored { agent_id, .. }
            | SwarmEvent::PeerEvicted { agent_id, .. }
            | SwarmEvent::OwnLinkLost { agent_id, .. }
            | SwarmEvent::OwnLinkRestored { agent_id, .. }
            | SwarmEvent::LaneSwitched { agent_id, .. }
            | SwarmEvent::MissionStateChanged { agent_id, .. }
            | SwarmEvent::CommandRejected { agent_id, .. }
            | SwarmEvent::ProximityWarning { agent_id, .. }
            | SwarmEvent::AltitudeFenceBreached { agent_id, .. } => agent_id,
        }
    }
}
