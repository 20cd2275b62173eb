//! Connectivity view over the census.
//!
//! A [`Topology`] is a point-in-time graph of the census: one vertex per known
//! node, classified by health, and one undirected edge per pair of known nodes
//! that list each other (or one lists the other) as neighbours.

use crate::enumerator::Enumerator;
use crate::node::{Node, NodeSnapshot};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// How many polling intervals may pass before a node's data counts as outdated.
pub const STALE_INTERVALS: u32 = 3;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Online,
    Offline,
    /// No fresh data within [`STALE_INTERVALS`] polling intervals.
    Unknown,
}

#[derive(Clone, Debug, Serialize)]
pub struct Vertex {
    #[serde(flatten)]
    pub node: NodeSnapshot,
    pub health: Health,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Topology {
    /// Sorted by address.
    pub vertices: Vec<Vertex>,
    /// Address pairs, smaller address first, sorted.
    pub edges: Vec<(String, String)>,
}

impl Topology {
    /// Build a topology from the census's current contents.
    pub fn from_census(census: &Enumerator) -> Self {
        Self::from_nodes(&census.nodes(), census.interval())
    }

    pub fn from_nodes(nodes: &[Arc<Node>], interval: Duration) -> Self {
        let outdated = interval.saturating_mul(STALE_INTERVALS);
        let known: HashSet<&str> = nodes.iter().map(|n| n.address()).collect();

        let mut vertices: Vec<Vertex> = nodes
            .iter()
            .map(|n| {
                let health = if n.is_stale(outdated) {
                    Health::Unknown
                } else if n.is_online() {
                    Health::Online
                } else {
                    Health::Offline
                };
                Vertex {
                    node: n.snapshot(),
                    health,
                }
            })
            .collect();
        vertices.sort_by(|a, b| a.node.address.cmp(&b.node.address));

        let mut edges = BTreeSet::new();
        for vertex in &vertices {
            let from = vertex.node.address.as_str();
            for to in &vertex.node.connections {
                if to == from || !known.contains(to.as_str()) {
                    continue;
                }
                let edge = if from < to.as_str() {
                    (from.to_string(), to.clone())
                } else {
                    (to.clone(), from.to_string())
                };
                edges.insert(edge);
            }
        }

        Self {
            vertices,
            edges: edges.into_iter().collect(),
        }
    }

    pub fn count(&self, health: Health) -> usize {
        self.vertices.iter().filter(|v| v.health == health).count()
    }
}
