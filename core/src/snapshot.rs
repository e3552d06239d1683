//! Snapshot: an immutable, fully-owned copy of the grid at one tick.
//!
//! Snapshots are shared as `Arc<Snapshot>`. Nothing handed a snapshot
//! can reach back into the engine's live topology.

use crate::{
    phase::SystemState,
    topology::{Edge, Node, Topology},
    types::Tick,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub nodes:        Vec<Node>,
    pub edges:        Vec<Edge>,
    pub system_state: SystemState,
    pub tick:         Tick,
    /// Strictly increasing across every snapshot the engine publishes,
    /// including manual-trigger ones that share a tick number.
    pub sequence:     u64,
    pub timestamp:    DateTime<Utc>,
}

impl Snapshot {
    pub fn capture(topology: &Topology, system_state: SystemState, tick: Tick, sequence: u64) -> Self {
        Self {
            nodes: topology.nodes().to_vec(),
            edges: topology.edges().to_vec(),
            system_state,
            tick,
            sequence,
            timestamp: Utc::now(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn edge_between(&self, a: &str, b: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.connects(a, b))
    }
}
