//! In-memory weighted graph.
//!
//! Nodes carry the bare numeric item id (`61` for `Q61`), edges carry the
//! numeric property id as weight (`17` for `P17`). Edges keep the direction
//! they were loaded with, but lookups go through a per-node incident list
//! so both endpoints see every edge.
//!
//! Non-positive weights are reserved for system edges (labels and the like)
//! and never surface as relations.
//!
//! The graph is built once and then only read, so it can be shared across
//! tasks behind an `Arc` with no locking.

pub mod edge_list;

use hashbrown::HashMap;

/// Dense node index inside a [`LocalGraph`].
pub type NodeIndex = usize;

/// A weighted edge between two node indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub source: NodeIndex,
    pub target: NodeIndex,
    pub weight: i64,
}

impl Edge {
    /// The endpoint opposite `from` (`from` itself for self-loops).
    pub fn other(&self, from: NodeIndex) -> NodeIndex {
        if self.source == from { self.target } else { self.source }
    }

    /// Relational edges have a positive weight.
    pub fn is_relational(&self) -> bool {
        self.weight > 0
    }
}

#[derive(Debug, Default, Clone)]
pub struct LocalGraph {
    names: Vec<u64>,
    by_name: HashMap<u64, NodeIndex>,
    edges: Vec<Edge>,
    /// node index → edge indices, in insertion order
    incident: Vec<Vec<usize>>,
}

impl LocalGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the node named `name`.
    pub fn add_node(&mut self, name: u64) -> NodeIndex {
        if let Some(&idx) = self.by_name.get(&name) {
            return idx;
        }
        let idx = self.names.len();
        self.names.push(name);
        self.by_name.insert(name, idx);
        self.incident.push(Vec::new());
        idx
    }

    /// Add a directed edge `source -weight-> target`, creating nodes as needed.
    pub fn add_edge(&mut self, source: u64, target: u64, weight: i64) {
        let source = self.add_node(source);
        let target = self.add_node(target);
        let edge_idx = self.edges.len();
        self.edges.push(Edge { source, target, weight });
        self.incident[source].push(edge_idx);
        if source != target {
            self.incident[target].push(edge_idx);
        }
    }

    pub fn node(&self, name: u64) -> Option<NodeIndex> {
        self.by_name.get(&name).copied()
    }

    pub fn name(&self, idx: NodeIndex) -> u64 {
        self.names[idx]
    }

    /// Edges touching `idx`, in insertion order.
    pub fn incident(&self, idx: NodeIndex) -> impl Iterator<Item = &Edge> + '_ {
        self.incident[idx].iter().map(move |&e| &self.edges[e])
    }

    pub fn node_count(&self) -> usize {
        self.names.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// All edges grouped by source node, in node insertion order.
    pub fn outgoing_by_node(&self) -> impl Iterator<Item = (u64, Vec<&Edge>)> + '_ {
        (0..self.names.len()).map(move |idx| {
            let out = self.incident(idx).filter(|e| e.source == idx).collect();
            (self.names[idx], out)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_edge_creates_nodes() {
        let mut g = LocalGraph::new();
        g.add_edge(61, 30, 17);
        g.add_edge(60, 30, 17);

        assert_eq!(g.node_count(), 3);
        assert_eq!(g.edge_count(), 2);

        let usa = g.node(30).unwrap();
        assert_eq!(g.incident(usa).count(), 2);
        let dc = g.node(61).unwrap();
        let edge = g.incident(dc).next().unwrap();
        assert_eq!(g.name(edge.other(dc)), 30);
    }

    #[test]
    fn test_self_loop_listed_once() {
        let mut g = LocalGraph::new();
        g.add_edge(5, 5, 1);
        let n = g.node(5).unwrap();
        assert_eq!(g.incident(n).count(), 1);
        assert_eq!(g.incident(n).next().unwrap().other(n), n);
    }

    #[test]
    fn test_unknown_node() {
        let g = LocalGraph::new();
        assert!(g.node(42).is_none());
    }
}
