//! Topology store: the fixed-shape pipe graph and its per-tick attributes.
//!
//! RULE: The shape (node set, edge set) never changes after generate().
//! Only attributes mutate, and only the engine mutates them.

use crate::{rng::StreamRng, types::NodeId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const NODE_COUNT: usize = 10;

/// Chords across the ring, as node indices.
const CROSS_LINKS: [(usize, usize); 5] = [(0, 5), (1, 6), (2, 5), (3, 8), (4, 9)];

/// Coordinates are spread over `[-HALF_EXTENT, HALF_EXTENT)` on each axis.
const HALF_EXTENT: f64 = 5.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Normal,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EdgeStatus {
    Normal,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id:       NodeId,
    pub x:        f64,
    pub y:        f64,
    pub z:        f64,
    pub status:   NodeStatus,
    pub pressure: f64,
    pub acoustic: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    pub status: EdgeStatus,
}

impl Edge {
    /// Unordered endpoint match.
    pub fn connects(&self, a: &str, b: &str) -> bool {
        (self.source == a && self.target == b) || (self.source == b && self.target == a)
    }
}

/// Resting sensor readings every node returns to on reset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    pub pressure: f64,
    pub acoustic: f64,
}

/// Partial attribute write; `None` leaves the field untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NodeUpdate {
    pub status:   Option<NodeStatus>,
    pub pressure: Option<f64>,
    pub acoustic: Option<f64>,
}

impl NodeUpdate {
    fn apply(&self, node: &mut Node) {
        if let Some(status) = self.status {
            node.status = status;
        }
        if let Some(pressure) = self.pressure {
            node.pressure = pressure;
        }
        if let Some(acoustic) = self.acoustic {
            node.acoustic = acoustic;
        }
    }
}

#[derive(Debug, Clone)]
pub struct Topology {
    nodes:    Vec<Node>,
    edges:    Vec<Edge>,
    index:    HashMap<NodeId, usize>,
    baseline: Baseline,
}

impl Topology {
    /// Build the 10-node ring with five cross-links. Coordinates are
    /// cosmetic and drawn from `rng`; attributes start at baseline.
    pub fn generate(rng: &mut StreamRng, baseline: Baseline) -> Self {
        let nodes: Vec<Node> = (0..NODE_COUNT)
            .map(|i| Node {
                id:       node_id(i),
                x:        rng.symmetric(HALF_EXTENT),
                y:        rng.symmetric(HALF_EXTENT),
                z:        rng.symmetric(HALF_EXTENT),
                status:   NodeStatus::Normal,
                pressure: baseline.pressure,
                acoustic: baseline.acoustic,
            })
            .collect();

        let ring = (0..NODE_COUNT).map(|i| (i, (i + 1) % NODE_COUNT));
        let edges = ring
            .chain(CROSS_LINKS.iter().copied())
            .map(|(a, b)| Edge {
                source: node_id(a),
                target: node_id(b),
                status: EdgeStatus::Normal,
            })
            .collect();

        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();

        Self { nodes, edges, index, baseline }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn baseline(&self) -> Baseline {
        self.baseline
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.node_index(id).map(|i| &self.nodes[i])
    }

    pub fn node_index(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn edge_index_between(&self, a: &str, b: &str) -> Option<usize> {
        self.edges.iter().position(|e| e.connects(a, b))
    }

    pub fn edge_between(&self, a: &str, b: &str) -> Option<&Edge> {
        self.edge_index_between(a, b).map(|i| &self.edges[i])
    }

    /// Mutable access by a previously validated index.
    pub fn node_mut(&mut self, idx: usize) -> &mut Node {
        &mut self.nodes[idx]
    }

    pub fn edge_mut(&mut self, idx: usize) -> &mut Edge {
        &mut self.edges[idx]
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> + '_ {
        self.nodes.iter_mut()
    }

    /// Returns false (and skips the write) for an unknown id.
    pub fn set_node_attributes(&mut self, id: &str, update: NodeUpdate) -> bool {
        match self.node_index(id) {
            Some(i) => {
                update.apply(&mut self.nodes[i]);
                true
            }
            None => {
                log::warn!("set_node_attributes: unknown node '{id}', update skipped");
                false
            }
        }
    }

    /// Returns false (and skips the write) if no edge joins `a` and `b`.
    pub fn set_edge_status(&mut self, a: &str, b: &str, status: EdgeStatus) -> bool {
        match self.edge_index_between(a, b) {
            Some(i) => {
                self.edges[i].status = status;
                true
            }
            None => {
                log::warn!("set_edge_status: no edge {a}-{b}, update skipped");
                false
            }
        }
    }

    /// Force every node and edge back to exact baseline.
    pub fn reset_to_baseline(&mut self) {
        let Baseline { pressure, acoustic } = self.baseline;
        for node in &mut self.nodes {
            node.status = NodeStatus::Normal;
            node.pressure = pressure;
            node.acoustic = acoustic;
        }
        for edge in &mut self.edges {
            edge.status = EdgeStatus::Normal;
        }
    }
}

fn node_id(i: usize) -> NodeId {
    format!("N{i}")
}
