//! Binary contraction trees over the tensors of a network.
//!
//! A tree is an arena of nodes. Each node caches its free edges, rank and
//! subtree max rank when it is created, so the derived values of a subtree
//! never change once it exists. Joining two trees moves the smaller arena
//! into the larger one.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::network::{EdgeId, TensorNetwork};

/// Index of a node inside a [`ContractionTree`] arena.
pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    Leaf { tensor: usize },
    Join { left: NodeId, right: NodeId },
}

/// One node of a contraction tree with its cached derived values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TreeNode {
    kind: NodeKind,
    free_edges: Vec<EdgeId>,
    open_dims: usize,
    maxrank: usize,
    num_leaves: usize,
}

impl TreeNode {
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }

    pub fn tensor_index(&self) -> Option<usize> {
        match self.kind {
            NodeKind::Leaf { tensor } => Some(tensor),
            NodeKind::Join { .. } => None,
        }
    }

    pub fn children(&self) -> Option<(NodeId, NodeId)> {
        match self.kind {
            NodeKind::Leaf { .. } => None,
            NodeKind::Join { left, right } => Some((left, right)),
        }
    }

    /// Connected edges incident to exactly one side of this node.
    pub fn free_edges(&self) -> &[EdgeId] {
        &self.free_edges
    }

    /// Dangling dimensions of the tensors below this node.
    pub fn open_dims(&self) -> usize {
        self.open_dims
    }

    /// Rank of the tensor this node produces.
    pub fn rank(&self) -> usize {
        self.free_edges.len() + self.open_dims
    }

    /// Largest rank of any node in this subtree.
    pub fn maxrank(&self) -> usize {
        self.maxrank
    }

    pub fn num_leaves(&self) -> usize {
        self.num_leaves
    }
}

/// Estimated cost of contracting a tree under a slicing set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CostEstimate {
    /// Multiplications plus additions over all joins of one slice.
    pub flops: f64,
    /// Entries of the largest intermediate tensor.
    pub memory: f64,
    /// Unsliced edge occurring most often in the largest tensors.
    pub next_edge_to_slice: Option<EdgeId>,
    /// Largest rank after removing sliced edges.
    pub maxrank: usize,
}

/// A full binary tree whose leaves are tensor indices, or the empty tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ContractionTree {
    nodes: Vec<TreeNode>,
    root: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    width: Option<usize>,
}

impl ContractionTree {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Single-leaf tree for tensor `tensor` of `network`.
    pub fn leaf(network: &TensorNetwork, tensor: usize) -> Self {
        let dims = network.index_list(tensor);
        let free_edges: Vec<EdgeId> = dims.iter().flatten().copied().collect();
        let open_dims = dims.len() - free_edges.len();
        Self {
            nodes: vec![TreeNode {
                kind: NodeKind::Leaf { tensor },
                maxrank: dims.len(),
                free_edges,
                open_dims,
                num_leaves: 1,
            }],
            root: Some(0),
            width: None,
        }
    }

    /// Left-deep tree over every tensor in index order.
    pub fn sequential(network: &TensorNetwork) -> Self {
        (0..network.len()).fold(Self::empty(), |tree, t| {
            tree.combine(Self::leaf(network, t))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id]
    }

    /// Number of nodes, leaves included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_leaves(&self) -> usize {
        self.root.map_or(0, |r| self.nodes[r].num_leaves)
    }

    pub fn maxrank(&self) -> usize {
        self.root.map_or(0, |r| self.nodes[r].maxrank)
    }

    /// Free edges of the root.
    pub fn free_edges(&self) -> &[EdgeId] {
        self.root.map_or(&[], |r| &self.nodes[r].free_edges)
    }

    /// Width of the decomposition this tree was extracted from.
    pub fn width(&self) -> Option<usize> {
        self.width
    }

    pub fn with_width(mut self, width: usize) -> Self {
        self.width = Some(width);
        self
    }

    /// Join two trees. The empty tree is an identity on either side.
    pub fn combine(self, other: ContractionTree) -> ContractionTree {
        let (left_root, right_root) = match (self.root, other.root) {
            (None, _) => return other.inherit_width(self.width),
            (_, None) => return self.inherit_width(other.width),
            (Some(l), Some(r)) => (l, r),
        };
        let width = self.width.or(other.width);
        let self_is_larger = self.nodes.len() >= other.nodes.len();
        let (mut big, small) = if self_is_larger {
            (self, other)
        } else {
            (other, self)
        };

        let offset = big.nodes.len();
        big.nodes.extend(small.nodes.into_iter().map(|mut node| {
            if let NodeKind::Join { left, right } = node.kind {
                node.kind = NodeKind::Join {
                    left: left + offset,
                    right: right + offset,
                };
            }
            node
        }));
        let (left, right) = if self_is_larger {
            (left_root, right_root + offset)
        } else {
            (left_root + offset, right_root)
        };

        let joined = join_nodes(&big.nodes[left], &big.nodes[right], left, right);
        big.nodes.push(joined);
        big.root = Some(big.nodes.len() - 1);
        big.width = width;
        big
    }

    fn inherit_width(mut self, width: Option<usize>) -> Self {
        self.width = self.width.or(width);
        self
    }

    /// Node ids in postorder. Each call starts a fresh traversal.
    pub fn iterate_postorder(&self) -> Postorder<'_> {
        Postorder {
            tree: self,
            stack: self.root.map(|r| (r, false)).into_iter().collect(),
        }
    }

    /// Postorder over the subtree rooted at `node`.
    pub fn postorder_from(&self, node: NodeId) -> Postorder<'_> {
        Postorder {
            tree: self,
            stack: vec![(node, false)],
        }
    }

    /// Leaf tensor indices, left to right.
    pub fn leaves(&self) -> Vec<usize> {
        self.iterate_postorder()
            .filter_map(|id| self.nodes[id].tensor_index())
            .collect()
    }

    /// True iff every tensor of `network` is a leaf exactly once.
    pub fn is_complete(&self, network: &TensorNetwork) -> bool {
        let mut seen = vec![false; network.len()];
        for tensor in self.leaves() {
            match seen.get_mut(tensor) {
                Some(slot) if !*slot => *slot = true,
                _ => return false,
            }
        }
        seen.into_iter().all(|s| s)
    }

    /// Join the tensors missing from this tree that have no connected edge
    /// (rank-0 tensors in a closed network) in front of it.
    pub fn include_rank_zero_tensors(self, network: &TensorNetwork) -> ContractionTree {
        let present: HashSet<usize> = self.leaves().into_iter().collect();
        let mut zero = ContractionTree::empty();
        for t in 0..network.len() {
            let isolated = network.index_list(t).iter().all(Option::is_none);
            if isolated && !present.contains(&t) {
                zero = zero.combine(ContractionTree::leaf(network, t));
            }
        }
        zero.combine(self)
    }

    /// Cost of contracting one slice when the edges in `sliced` are pinned.
    /// Every dimension is binary.
    pub fn estimate_cost(&self, sliced: &BTreeSet<EdgeId>) -> CostEstimate {
        self.estimate_cost_sized(sliced, |_| 2)
    }

    /// As [`estimate_cost`](Self::estimate_cost) with per-edge dimension
    /// sizes. Dangling dimensions count as size 2.
    pub fn estimate_cost_sized<S>(&self, sliced: &BTreeSet<EdgeId>, edge_size: S) -> CostEstimate
    where
        S: Fn(EdgeId) -> usize,
    {
        let log_size = |e: EdgeId| (edge_size(e).max(1) as f64).log2();
        let mut log_entries: Vec<f64> = vec![0.0; self.nodes.len()];
        let mut flops = 0.0;
        let mut max_log = f64::NEG_INFINITY;
        let mut maxrank = 0;

        for id in self.iterate_postorder() {
            let node = &self.nodes[id];
            let unsliced = node.free_edges.iter().filter(|e| !sliced.contains(*e));
            let rank = unsliced.clone().count() + node.open_dims;
            let log = unsliced.map(|&e| log_size(e)).sum::<f64>() + node.open_dims as f64;
            log_entries[id] = log;

            if let NodeKind::Join { left, right } = node.kind {
                let log_shared = (log_entries[left] + log_entries[right] - log) / 2.0;
                flops += 2.0 * (log_shared + log).exp2();
            }
            maxrank = maxrank.max(rank);
            max_log = max_log.max(log);
        }

        let mut occurrences: BTreeMap<EdgeId, usize> = BTreeMap::new();
        for id in self.iterate_postorder() {
            if log_entries[id] == max_log {
                for &e in self.nodes[id].free_edges.iter().filter(|e| !sliced.contains(*e)) {
                    *occurrences.entry(e).or_default() += 1;
                }
            }
        }
        let next_edge_to_slice = occurrences
            .iter()
            .max_by(|(ea, ca), (eb, cb)| ca.cmp(cb).then(eb.cmp(ea)))
            .map(|(&e, _)| e);

        CostEstimate {
            flops,
            memory: if self.is_empty() { 1.0 } else { max_log.exp2() },
            next_edge_to_slice,
            maxrank,
        }
    }
}

fn join_nodes(left: &TreeNode, right: &TreeNode, left_id: NodeId, right_id: NodeId) -> TreeNode {
    let left_set: HashSet<EdgeId> = left.free_edges.iter().copied().collect();
    let right_set: HashSet<EdgeId> = right.free_edges.iter().copied().collect();
    let free_edges: Vec<EdgeId> = left
        .free_edges
        .iter()
        .filter(|e| !right_set.contains(*e))
        .chain(right.free_edges.iter().filter(|e| !left_set.contains(*e)))
        .copied()
        .collect();
    let open_dims = left.open_dims + right.open_dims;
    TreeNode {
        kind: NodeKind::Join {
            left: left_id,
            right: right_id,
        },
        maxrank: left
            .maxrank
            .max(right.maxrank)
            .max(free_edges.len() + open_dims),
        free_edges,
        open_dims,
        num_leaves: left.num_leaves + right.num_leaves,
    }
}

/// Postorder traversal over node ids, see [`ContractionTree::iterate_postorder`].
#[derive(Debug, Clone)]
pub struct Postorder<'a> {
    tree: &'a ContractionTree,
    stack: Vec<(NodeId, bool)>,
}

impl Iterator for Postorder<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        while let Some((id, expanded)) = self.stack.pop() {
            match self.tree.nodes[id].kind {
                NodeKind::Leaf { .. } => return Some(id),
                NodeKind::Join { .. } if expanded => return Some(id),
                NodeKind::Join { left, right } => {
                    self.stack.push((id, true));
                    self.stack.push((right, false));
                    self.stack.push((left, false));
                }
            }
        }
        None
    }
}

impl fmt::Display for ContractionTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        for id in self.iterate_postorder() {
            match self.nodes[id].kind {
                NodeKind::Leaf { tensor } => parts.push(tensor.to_string()),
                NodeKind::Join { .. } => {
                    let right = parts.pop().unwrap_or_default();
                    let left = parts.pop().unwrap_or_default();
                    parts.push(format!("({left}, {right})"));
                }
            }
        }
        f.write_str(parts.pop().as_deref().unwrap_or("()"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;

    /// A chain t0 - t1 - t2 - t3 of copy tensors joined by edges 0, 1, 2.
    fn chain(len: usize) -> TensorNetwork {
        let mut network = TensorNetwork::new();
        let mut previous = None;
        for i in 0..len {
            let rank = if i == 0 || i + 1 == len { 1 } else { 2 };
            let handles = network.add_node(Tensor::variable(rank, 1.0, 1.0));
            if let Some(prev) = previous {
                network.connect(prev, handles[0]).unwrap();
            }
            previous = handles.last().copied();
        }
        network
    }

    #[test]
    fn test_leaf_and_empty() {
        let network = chain(3);
        let leaf = ContractionTree::leaf(&network, 1);
        assert_eq!(leaf.free_edges(), &[0, 1]);
        assert_eq!(leaf.maxrank(), 2);
        assert_eq!(leaf.num_leaves(), 1);

        let empty = ContractionTree::empty();
        assert!(empty.is_empty());
        assert_eq!(empty.clone().combine(leaf.clone()), leaf);
        assert_eq!(leaf.clone().combine(empty), leaf);
    }

    #[test]
    fn test_combine_symmetric_difference() {
        let network = chain(4);
        let left = ContractionTree::leaf(&network, 0).combine(ContractionTree::leaf(&network, 1));
        assert_eq!(left.free_edges(), &[1]);
        let right = ContractionTree::leaf(&network, 2).combine(ContractionTree::leaf(&network, 3));
        assert_eq!(right.free_edges(), &[1]);
        let tree = left.combine(right);
        assert!(tree.free_edges().is_empty());
        assert_eq!(tree.maxrank(), 2);
        assert_eq!(tree.leaves(), vec![0, 1, 2, 3]);
        assert!(tree.is_complete(&network));
        assert_eq!(tree.to_string(), "((0, 1), (2, 3))");
    }

    #[test]
    fn test_combine_keeps_order_when_right_is_larger() {
        let network = chain(4);
        let right = ContractionTree::leaf(&network, 1)
            .combine(ContractionTree::leaf(&network, 2))
            .combine(ContractionTree::leaf(&network, 3));
        let tree = ContractionTree::leaf(&network, 0).combine(right);
        assert_eq!(tree.to_string(), "(0, ((1, 2), 3))");
    }

    #[test]
    fn test_is_complete_rejects_missing_and_repeated() {
        let network = chain(3);
        let partial = ContractionTree::leaf(&network, 0).combine(ContractionTree::leaf(&network, 1));
        assert!(!partial.is_complete(&network));
        let repeated = partial.combine(ContractionTree::leaf(&network, 1));
        assert!(!repeated.is_complete(&network));
        assert!(ContractionTree::empty().is_complete(&TensorNetwork::new()));
    }

    #[test]
    fn test_postorder_restartable() {
        let tree = ContractionTree::sequential(&chain(5));
        let first: Vec<NodeId> = tree.iterate_postorder().collect();
        let second: Vec<NodeId> = tree.iterate_postorder().collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 9);
        assert_eq!(*first.last().unwrap(), tree.root().unwrap());
    }

    #[test]
    fn test_deep_tree_does_not_overflow() {
        let network = chain(50_000);
        let tree = ContractionTree::sequential(&network);
        assert_eq!(tree.num_leaves(), 50_000);
        assert_eq!(tree.maxrank(), 2);
        assert_eq!(tree.iterate_postorder().count(), 99_999);
        assert!(tree.is_complete(&network));
    }

    #[test]
    fn test_estimate_cost() {
        let network = chain(3);
        let tree = ContractionTree::sequential(&network);
        let cost = tree.estimate_cost(&BTreeSet::new());
        // (0,1): shared 1, result 1 -> 2 * 2^2; ((0,1),2): shared 1, result 0 -> 2 * 2^1
        assert_eq!(cost.flops, 12.0);
        assert_eq!(cost.memory, 4.0);
        assert_eq!(cost.maxrank, 2);
        assert_eq!(cost.next_edge_to_slice, Some(0));

        let sliced = tree.estimate_cost(&BTreeSet::from([0]));
        assert_eq!(sliced.memory, 2.0);
        assert_eq!(sliced.maxrank, 1);
        assert_eq!(sliced.next_edge_to_slice, Some(1));
    }

    #[test]
    fn test_include_rank_zero_tensors() {
        let mut network = chain(2);
        network.add_node(Tensor::variable(0, 1.0, 2.0));
        let tree = ContractionTree::leaf(&network, 0).combine(ContractionTree::leaf(&network, 1));
        assert!(!tree.is_complete(&network));
        let tree = tree.include_rank_zero_tensors(&network);
        assert!(tree.is_complete(&network));
        assert_eq!(tree.leaves(), vec![2, 0, 1]);
    }

    #[test]
    fn test_width_survives_combine() {
        let network = chain(2);
        let tree = ContractionTree::leaf(&network, 0).with_width(3);
        let tree = ContractionTree::empty().combine(tree);
        assert_eq!(tree.width(), Some(3));
        let tree = tree.combine(ContractionTree::leaf(&network, 1));
        assert_eq!(tree.width(), Some(3));
    }
}
