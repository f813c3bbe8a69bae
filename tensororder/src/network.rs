//! Tensor networks: tensors joined along shared binary dimensions.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use ndarray::ArrayD;
use petgraph::unionfind::UnionFind;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{NdarrayBackend, TensorBackend};
use crate::contraction_tree::ContractionTree;
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::tensor::Tensor;

/// Identifier of a network edge.
pub type EdgeId = usize;

/// An edge between two distinct tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    /// Endpoint tensor indices, smallest first.
    pub tensors: [usize; 2],
}

impl Edge {
    fn new(id: EdgeId, a: usize, b: usize) -> Self {
        Self {
            id,
            tensors: [a.min(b), a.max(b)],
        }
    }

    pub fn touches(&self, tensor: usize) -> bool {
        self.tensors.contains(&tensor)
    }

    fn replace(&mut self, from: usize, to: usize) {
        let [a, b] = self.tensors;
        let (a, b) = if a == from { (to, b) } else { (a, to) };
        *self = Edge::new(self.id, a, b);
    }
}

/// Handle to one dimension of one tensor, returned by [`TensorNetwork::add_node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Connection {
    pub tensor: usize,
    pub dim: usize,
}

/// A set of tensors indexed `0..n` and the edges joining their dimensions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TensorNetwork {
    tensors: Vec<Tensor>,
    index_lists: Vec<Vec<Option<EdgeId>>>,
    edges: BTreeMap<EdgeId, Edge>,
    next_edge: EdgeId,
}

impl TensorNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tensors.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn tensors(&self) -> impl Iterator<Item = &Tensor> {
        self.tensors.iter()
    }

    pub fn tensor(&self, index: usize) -> Result<&Tensor> {
        self.tensors.get(index).ok_or(Error::UnknownTensor(index))
    }

    /// Edge of each dimension of `tensor`, `None` for dangling dimensions.
    pub fn index_list(&self, tensor: usize) -> &[Option<EdgeId>] {
        &self.index_lists[tensor]
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(&id)
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// One past the largest edge id ever allocated.
    pub fn edge_bound(&self) -> EdgeId {
        self.next_edge
    }

    /// Add a tensor and return a handle for each of its dimensions.
    pub fn add_node(&mut self, tensor: Tensor) -> Vec<Connection> {
        let index = self.tensors.len();
        let rank = tensor.rank();
        self.tensors.push(tensor);
        self.index_lists.push(vec![None; rank]);
        (0..rank)
            .map(|dim| Connection { tensor: index, dim })
            .collect()
    }

    /// Join two free dimensions with a new edge.
    pub fn connect(&mut self, a: Connection, b: Connection) -> Result<EdgeId> {
        if a.tensor == b.tensor {
            return Err(Error::InvalidConnection(format!(
                "self loops are not allowed (tensor {})",
                a.tensor
            )));
        }
        for c in [a, b] {
            match self.index_lists.get(c.tensor).map(|l| l.get(c.dim)) {
                None | Some(None) => {
                    return Err(Error::InvalidConnection(format!(
                        "dimension {} of tensor {} does not exist",
                        c.dim, c.tensor
                    )))
                }
                Some(Some(Some(edge))) => {
                    return Err(Error::InvalidConnection(format!(
                        "dimension {} of tensor {} already holds edge {edge}",
                        c.dim, c.tensor
                    )))
                }
                Some(Some(None)) => {}
            }
        }
        let id = self.next_edge;
        self.next_edge += 1;
        self.index_lists[a.tensor][a.dim] = Some(id);
        self.index_lists[b.tensor][b.dim] = Some(id);
        self.edges.insert(id, Edge::new(id, a.tensor, b.tensor));
        Ok(id)
    }

    /// Split `dims` of `tensor` off into a new tensor joined to the rest by
    /// a new edge. Returns the new tensor index and the joining edge.
    ///
    /// A rank-3 tensor asked to split off two dimensions is left unchanged;
    /// the edge of its third dimension is returned as the pivot instead.
    ///
    /// # Panics
    /// If the tensor has rank below 3, or `dims` is empty, not a proper
    /// subset of the dimensions, or repeats a dimension.
    pub fn factor_out(&mut self, tensor: usize, dims: &[usize]) -> Result<(usize, EdgeId)> {
        let rank = self.tensor(tensor)?.rank();
        assert!(rank >= 3, "unable to factor a tensor of rank {rank}");
        assert!(!dims.is_empty(), "not enough indices to factor");
        assert!(dims.len() < rank, "too many indices to factor");
        assert!(
            dims.iter().all(|&d| d < rank)
                && dims.iter().collect::<BTreeSet<_>>().len() == dims.len(),
            "factor indices must be distinct dimensions"
        );

        if rank == 3 && dims.len() == 2 {
            let pivot = (0..3).find(|d| !dims.contains(d)).unwrap_or(0);
            return self.index_lists[tensor][pivot]
                .map(|edge| (tensor, edge))
                .ok_or_else(|| {
                    Error::InvalidConnection(format!(
                        "pivot dimension {pivot} of tensor {tensor} is not connected"
                    ))
                });
        }

        let rest: Vec<usize> = (0..rank).filter(|d| !dims.contains(d)).collect();
        let (split, kept) = self.tensors[tensor].factor_components(dims, &rest)?;

        let new_index = self.tensors.len();
        let old = std::mem::take(&mut self.index_lists[tensor]);
        let mut split_list: Vec<Option<EdgeId>> = dims.iter().map(|&d| old[d]).collect();
        let mut kept_list: Vec<Option<EdgeId>> = rest.iter().map(|&d| old[d]).collect();
        for edge in split_list.iter().flatten() {
            if let Some(e) = self.edges.get_mut(edge) {
                e.replace(tensor, new_index);
            }
        }

        let joining = self.next_edge;
        self.next_edge += 1;
        split_list.push(Some(joining));
        kept_list.push(Some(joining));
        self.edges.insert(joining, Edge::new(joining, tensor, new_index));

        self.tensors[tensor] = kept;
        self.index_lists[tensor] = kept_list;
        self.tensors.push(split);
        self.index_lists.push(split_list);
        debug!(tensor, new_tensor = new_index, edge = joining, "factored tensor");
        Ok((new_index, joining))
    }

    /// Representative of the equivalence class of every edge.
    ///
    /// Edges meeting at a diagonal (copy) tensor carry the same logical
    /// variable and fall in one class; the representative is the smallest id.
    pub fn equivalent_edge_classes(&self) -> BTreeMap<EdgeId, EdgeId> {
        let mut classes: UnionFind<EdgeId> = UnionFind::new(self.next_edge);
        for (tensor, edges) in self.tensors.iter().zip(&self.index_lists) {
            if !tensor.is_diagonal() {
                continue;
            }
            let mut connected = edges.iter().flatten();
            if let Some(&first) = connected.next() {
                for &other in connected {
                    classes.union(first, other);
                }
            }
        }

        let mut representative: BTreeMap<EdgeId, EdgeId> = BTreeMap::new();
        let mut smallest: HashMap<EdgeId, EdgeId> = HashMap::new();
        for &e in self.edges.keys() {
            let min = *smallest.entry(classes.find(e)).or_insert(e);
            representative.insert(e, min);
        }
        representative
    }

    /// All edges that must be sliced together with `edge`.
    pub fn find_equivalent_edges(&self, edge: EdgeId) -> Result<BTreeSet<EdgeId>> {
        if !self.edges.contains_key(&edge) {
            return Err(Error::UnknownEdge(edge));
        }
        let classes = self.equivalent_edge_classes();
        let rep = classes[&edge];
        Ok(classes
            .into_iter()
            .filter(|&(_, r)| r == rep)
            .map(|(e, _)| e)
            .collect())
    }

    /// Lazily enumerate the networks obtained by pinning every group of
    /// edges to each combination of binary values.
    ///
    /// At most 63 groups are accepted, since slices are numbered by a `u64`.
    pub fn slice_groups(&self, groups: &[BTreeSet<EdgeId>]) -> Result<SliceGroups<'_>> {
        let total = u32::try_from(groups.len())
            .ok()
            .and_then(|bits| 1u64.checked_shl(bits))
            .ok_or(Error::TooManySlices {
                groups: groups.len(),
            })?;
        Ok(SliceGroups {
            network: self,
            groups: groups.to_vec(),
            next: 0,
            total,
        })
    }

    /// Copy of the network with the edges in `values` pinned.
    pub fn pin_edges(&self, values: &HashMap<EdgeId, usize>) -> TensorNetwork {
        let mut tensors = Vec::with_capacity(self.tensors.len());
        let mut index_lists = Vec::with_capacity(self.tensors.len());
        for (tensor, edges) in self.tensors.iter().zip(&self.index_lists) {
            let pins: Vec<(usize, usize)> = edges
                .iter()
                .enumerate()
                .filter_map(|(d, e)| e.and_then(|e| values.get(&e)).map(|&v| (d, v)))
                .collect();
            tensors.push(tensor.slice(&pins));
            index_lists.push(
                edges
                    .iter()
                    .filter(|e| e.map_or(true, |e| !values.contains_key(&e)))
                    .copied()
                    .collect(),
            );
        }
        TensorNetwork {
            tensors,
            index_lists,
            edges: self
                .edges
                .iter()
                .filter(|(id, _)| !values.contains_key(*id))
                .map(|(&id, &edge)| (id, edge))
                .collect(),
            next_edge: self.next_edge,
        }
    }

    /// Graph with one node per tensor and an edge per connected pair.
    pub fn structure_graph(&self) -> Graph {
        let mut graph = Graph::new(self.tensors.len());
        for edge in self.edges.values() {
            graph.add_edge(edge.tensors[0], edge.tensors[1]);
        }
        graph
    }

    /// Graph with one node per edge id, two nodes adjacent when their edges
    /// meet at a tensor.
    pub fn line_graph(&self) -> Graph {
        let mut graph = Graph::new(self.next_edge);
        for edges in &self.index_lists {
            let connected: Vec<EdgeId> = edges.iter().flatten().copied().collect();
            for (i, &a) in connected.iter().enumerate() {
                for &b in &connected[i + 1..] {
                    graph.add_edge(a, b);
                }
            }
        }
        graph
    }

    /// Contract every tensor in index order with the dense backend.
    pub fn contract_dense(&self) -> Result<ArrayD<f64>> {
        let tree = ContractionTree::sequential(self);
        NdarrayBackend::default().contract(self, &tree)
    }

    /// Replace the tensors and index lists wholesale; edges are rebuilt from
    /// the index lists.
    pub(crate) fn from_parts(
        tensors: Vec<Tensor>,
        index_lists: Vec<Vec<Option<EdgeId>>>,
        next_edge: EdgeId,
    ) -> Result<Self> {
        let mut endpoints: BTreeMap<EdgeId, Vec<usize>> = BTreeMap::new();
        for (t, edges) in index_lists.iter().enumerate() {
            for &e in edges.iter().flatten() {
                endpoints.entry(e).or_default().push(t);
            }
        }
        let mut edges = BTreeMap::new();
        for (id, ends) in endpoints {
            match ends[..] {
                [a, b] if a != b => {
                    edges.insert(id, Edge::new(id, a, b));
                }
                _ => {
                    return Err(Error::InvalidConnection(format!(
                        "edge {id} must join exactly two distinct tensors"
                    )))
                }
            }
        }
        Ok(Self {
            tensors,
            index_lists,
            edges,
            next_edge,
        })
    }
}

/// Lazy sequence of sliced networks, see [`TensorNetwork::slice_groups`].
#[derive(Debug)]
pub struct SliceGroups<'a> {
    network: &'a TensorNetwork,
    groups: Vec<BTreeSet<EdgeId>>,
    next: u64,
    total: u64,
}

impl Iterator for SliceGroups<'_> {
    type Item = TensorNetwork;

    fn next(&mut self) -> Option<TensorNetwork> {
        if self.next >= self.total {
            return None;
        }
        let assignment = self.next;
        self.next += 1;
        let mut values = HashMap::new();
        for (bit, group) in self.groups.iter().enumerate() {
            let value = ((assignment >> bit) & 1) as usize;
            for &e in group {
                values.insert(e, value);
            }
        }
        Some(self.network.pin_edges(&values))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = usize::try_from(self.total - self.next).unwrap_or(usize::MAX);
        (left, Some(left))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// x0 -- clause -- x1 with the clause (x0 or x1).
    fn small_network() -> (TensorNetwork, Vec<EdgeId>) {
        let mut network = TensorNetwork::new();
        let x0 = network.add_node(Tensor::variable(1, 1.0, 1.0));
        let x1 = network.add_node(Tensor::variable(1, 1.0, 1.0));
        let clause = network.add_node(Tensor::or(vec![true, true]));
        let e0 = network.connect(x0[0], clause[0]).unwrap();
        let e1 = network.connect(x1[0], clause[1]).unwrap();
        (network, vec![e0, e1])
    }

    #[test]
    fn test_add_and_connect() {
        let (network, edges) = small_network();
        assert_eq!(network.len(), 3);
        assert_eq!(network.num_edges(), 2);
        assert_eq!(network.index_list(2), &[Some(edges[0]), Some(edges[1])]);
        assert_eq!(network.edge(edges[1]).unwrap().tensors, [1, 2]);
    }

    #[test]
    fn test_connect_rejects_reuse_and_self_loops() {
        let mut network = TensorNetwork::new();
        let a = network.add_node(Tensor::variable(2, 1.0, 1.0));
        let b = network.add_node(Tensor::variable(1, 1.0, 1.0));
        assert!(matches!(
            network.connect(a[0], a[1]),
            Err(Error::InvalidConnection(_))
        ));
        network.connect(a[0], b[0]).unwrap();
        assert!(network.connect(a[1], b[0]).is_err());
        assert!(network
            .connect(a[1], Connection { tensor: 7, dim: 0 })
            .is_err());
    }

    #[test]
    fn test_factor_out_rewires_edges() {
        let mut network = TensorNetwork::new();
        let clause = network.add_node(Tensor::or(vec![true, false, true, true]));
        let mut edges = Vec::new();
        for (i, handle) in clause.iter().enumerate() {
            let var = network.add_node(Tensor::variable(1, 1.0, 1.0));
            edges.push(network.connect(*handle, var[0]).unwrap());
            assert_eq!(network.edge(edges[i]).unwrap().tensors, [0, i + 1]);
        }
        let before = network.contract_dense().unwrap();

        let (new_tensor, joining) = network.factor_out(0, &[1, 3]).unwrap();
        assert_eq!(new_tensor, 5);
        assert_eq!(
            network.index_list(new_tensor),
            &[Some(edges[1]), Some(edges[3]), Some(joining)]
        );
        assert_eq!(
            network.index_list(0),
            &[Some(edges[0]), Some(edges[2]), Some(joining)]
        );
        assert!(network.edge(edges[1]).unwrap().touches(new_tensor));
        assert!(!network.edge(edges[1]).unwrap().touches(0));
        assert_eq!(network.edge(joining).unwrap().tensors, [0, 5]);

        let after = network.contract_dense().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_factor_rank_three_returns_pivot() {
        let mut network = TensorNetwork::new();
        let clause = network.add_node(Tensor::or(vec![true, true, true]));
        let mut edges = Vec::new();
        for handle in &clause {
            let var = network.add_node(Tensor::variable(1, 1.0, 1.0));
            edges.push(network.connect(*handle, var[0]).unwrap());
        }
        let (tensor, pivot) = network.factor_out(0, &[0, 2]).unwrap();
        assert_eq!(tensor, 0);
        assert_eq!(pivot, edges[1]);
        assert_eq!(network.len(), 4);
    }

    #[test]
    #[should_panic(expected = "unable to factor")]
    fn test_factor_rank_two_panics() {
        let (mut network, _) = small_network();
        let _ = network.factor_out(2, &[0]);
    }

    #[test]
    fn test_equivalent_edges_follow_copy_tensors() {
        let mut network = TensorNetwork::new();
        let var = network.add_node(Tensor::variable(4, 1.0, 1.0));
        let mut edges = Vec::new();
        for handle in &var {
            let clause = network.add_node(Tensor::or(vec![true, true]));
            edges.push(network.connect(*handle, clause[0]).unwrap());
        }
        let other = network.add_node(Tensor::variable(1, 1.0, 1.0));
        let lone = network
            .connect(Connection { tensor: 1, dim: 1 }, other[0])
            .unwrap();

        let class = network.find_equivalent_edges(edges[1]).unwrap();
        assert_eq!(class, edges.iter().copied().collect());

        // Factoring the copy tensor keeps every piece in one class.
        let (_, joining) = network.factor_out(0, &[0, 1]).unwrap();
        let class = network.find_equivalent_edges(edges[3]).unwrap();
        assert!(class.contains(&joining));
        assert_eq!(class.len(), 5);
        assert_eq!(
            network.find_equivalent_edges(lone).unwrap(),
            BTreeSet::from([lone])
        );
        assert!(matches!(
            network.find_equivalent_edges(99),
            Err(Error::UnknownEdge(99))
        ));
    }

    #[test]
    fn test_slice_groups_is_lazy_and_complete() {
        let (network, edges) = small_network();
        let groups = vec![BTreeSet::from([edges[0]]), BTreeSet::from([edges[1]])];
        let mut slices = network.slice_groups(&groups).unwrap();
        assert_eq!(slices.size_hint(), (4, Some(4)));
        let first = slices.next().unwrap();
        assert_eq!(first.num_edges(), 0);
        assert!(first.tensors().all(|t| t.rank() == 0));
        assert_eq!(slices.size_hint(), (3, Some(3)));

        let total: f64 = network
            .slice_groups(&groups)
            .unwrap()
            .map(|slice| slice.contract_dense().unwrap().sum())
            .sum();
        assert_eq!(total, network.contract_dense().unwrap().sum());
        assert_eq!(total, 3.0);
    }

    #[test]
    fn test_slice_groups_rejects_unnumberable_slices() {
        let mut network = TensorNetwork::new();
        let mut groups = Vec::new();
        for _ in 0..64 {
            let a = network.add_node(Tensor::variable(1, 1.0, 1.0));
            let b = network.add_node(Tensor::variable(1, 1.0, 1.0));
            groups.push(BTreeSet::from([network.connect(a[0], b[0]).unwrap()]));
        }
        assert!(matches!(
            network.slice_groups(&groups),
            Err(Error::TooManySlices { groups: 64 })
        ));
        assert!(network.slice_groups(&groups[..63]).is_ok());
    }

    #[test]
    fn test_structure_and_line_graphs() {
        let (network, _) = small_network();
        let structure = network.structure_graph();
        assert_eq!(structure.num_nodes(), 3);
        assert!(structure.has_edge(0, 2));
        assert!(structure.has_edge(1, 2));
        assert!(!structure.has_edge(0, 1));

        assert_eq!(structure.num_components(), 1);

        let line = network.line_graph();
        assert_eq!(line.num_nodes(), 2);
        assert_eq!(line.edges().collect::<Vec<_>>(), vec![(0, 1)]);
    }
}
