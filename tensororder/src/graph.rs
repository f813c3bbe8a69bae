//! Simple undirected graphs handed to decomposition solvers.

use std::io::{self, Write};

use petgraph::algo::{connected_components, is_cyclic_undirected};
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;

/// An undirected simple graph on nodes `0..num_nodes`, backed by a petgraph
/// [`UnGraph`] whose node indices are the graph's vertex numbers.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    inner: UnGraph<(), ()>,
}

impl Graph {
    pub fn new(num_nodes: usize) -> Self {
        let mut inner = UnGraph::with_capacity(num_nodes, num_nodes);
        for _ in 0..num_nodes {
            inner.add_node(());
        }
        Self { inner }
    }

    /// Add an undirected edge. Self loops and repeated edges are ignored.
    pub fn add_edge(&mut self, u: usize, v: usize) {
        assert!(u < self.num_nodes() && v < self.num_nodes(), "node out of range");
        if u != v {
            self.inner.update_edge(NodeIndex::new(u), NodeIndex::new(v), ());
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.inner.node_count()
    }

    pub fn num_edges(&self) -> usize {
        self.inner.edge_count()
    }

    /// Edges in insertion order, smallest endpoint first.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.inner.edge_references().map(|e| {
            let (a, b) = (e.source().index(), e.target().index());
            (a.min(b), a.max(b))
        })
    }

    pub fn has_edge(&self, u: usize, v: usize) -> bool {
        u < self.num_nodes()
            && v < self.num_nodes()
            && self
                .inner
                .find_edge(NodeIndex::new(u), NodeIndex::new(v))
                .is_some()
    }

    /// Number of connected components; isolated nodes count as one each.
    pub fn num_components(&self) -> usize {
        connected_components(&self.inner)
    }

    pub fn has_cycle(&self) -> bool {
        is_cyclic_undirected(&self.inner)
    }

    /// The underlying petgraph graph.
    pub fn as_petgraph(&self) -> &UnGraph<(), ()> {
        &self.inner
    }

    /// Write in the `p tw <nodes> <edges>` format with 1-indexed nodes.
    pub fn write_dimacs<W: Write>(&self, mut out: W) -> io::Result<()> {
        writeln!(out, "p tw {} {}", self.num_nodes(), self.num_edges())?;
        for (u, v) in self.edges() {
            writeln!(out, "{} {}", u + 1, v + 1)?;
        }
        out.flush()
    }
}
