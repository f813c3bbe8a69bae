//! Execution plans: a contraction tree plus the edge groups to slice.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::backend::{NdarrayBackend, TensorBackend};
use crate::contraction_tree::{ContractionTree, CostEstimate, NodeId, NodeKind};
use crate::error::{Error, Result};
use crate::network::{EdgeId, TensorNetwork};
use crate::tensor::Tensor;

/// A contraction tree, the network it contracts and the slice groups chosen
/// so far, with the cost estimate kept current.
#[derive(Debug, Clone)]
pub struct SlicedExecutionPlan {
    tree: ContractionTree,
    network: TensorNetwork,
    edges_to_slice: BTreeSet<EdgeId>,
    groups_to_slice: Vec<BTreeSet<EdgeId>>,
    cost: CostEstimate,
    finalized: bool,
}

impl SlicedExecutionPlan {
    /// Start a plan with nothing sliced.
    pub fn new(tree: ContractionTree, network: TensorNetwork) -> Self {
        let edges_to_slice = BTreeSet::new();
        let cost = tree.estimate_cost(&edges_to_slice);
        Self {
            tree,
            network,
            edges_to_slice,
            groups_to_slice: Vec::new(),
            cost,
            finalized: false,
        }
    }

    pub fn tree(&self) -> &ContractionTree {
        &self.tree
    }

    pub fn network(&self) -> &TensorNetwork {
        &self.network
    }

    /// Every pinned edge.
    pub fn edges_to_slice(&self) -> &BTreeSet<EdgeId> {
        &self.edges_to_slice
    }

    /// Pinned edges grouped by equivalence class, in slicing order.
    pub fn groups_to_slice(&self) -> &[BTreeSet<EdgeId>] {
        &self.groups_to_slice
    }

    pub fn num_slice_groups(&self) -> usize {
        self.groups_to_slice.len()
    }

    pub fn cost(&self) -> &CostEstimate {
        &self.cost
    }

    /// Flops of one slice.
    pub fn flops(&self) -> f64 {
        self.cost.flops
    }

    /// Entries of the largest intermediate tensor of one slice.
    pub fn memory(&self) -> f64 {
        self.cost.memory
    }

    /// Largest rank of an intermediate tensor once sliced edges are pinned.
    pub fn maxrank(&self) -> usize {
        self.cost.maxrank
    }

    pub fn next_edge_to_slice(&self) -> Option<EdgeId> {
        self.cost.next_edge_to_slice
    }

    /// Flops summed over every slice.
    pub fn total_flops(&self) -> f64 {
        self.cost.flops * (self.groups_to_slice.len() as f64).exp2()
    }

    /// True once [`contract_small`](Self::contract_small) has run.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Pin the equivalence class of `edge` as a new slice group. A class
    /// that is already pinned is left alone.
    pub fn slice_at(&mut self, edge: EdgeId) -> Result<()> {
        if self.finalized {
            return Err(Error::SlicingFinalized);
        }
        let group = self.network.find_equivalent_edges(edge)?;
        if group.is_subset(&self.edges_to_slice) {
            debug!(edge, "edge already sliced");
            return Ok(());
        }
        debug!(
            memory = self.cost.memory,
            edges = group.len(),
            "slicing equivalence class of edge {edge}"
        );
        self.edges_to_slice.extend(group.iter().copied());
        self.groups_to_slice.push(group);
        self.cost = self.tree.estimate_cost(&self.edges_to_slice);
        Ok(())
    }

    /// Named widths of the plan: the max rank and, for trees built from a
    /// decomposition, its width.
    pub fn widths(&self) -> Vec<(&'static str, usize)> {
        let mut widths = vec![("Max Rank", self.cost.maxrank)];
        if let Some(width) = self.tree.width() {
            widths.push(("Treewidth", width));
        }
        widths
    }

    /// Summary lines describing the slicing and estimated cost.
    pub fn report_statistics(&self) -> Vec<(&'static str, String)> {
        let groups = self.groups_to_slice.len();
        let stats = vec![
            ("# Sliced", groups.to_string()),
            ("# Network Slices", (groups as f64).exp2().to_string()),
            ("Estimated Memory", self.cost.memory.to_string()),
            ("Estimated FLOPs", self.total_flops().to_string()),
        ];
        for (key, value) in &stats {
            info!("{key}: {value}");
        }
        stats
    }

    /// Pre-contract every maximal subtree whose ranks all stay below
    /// `threshold` into a single dense tensor. Subtrees that contract a
    /// pinned edge are left intact. No further slicing is possible after.
    pub fn contract_small(&mut self, threshold: usize) -> Result<()> {
        let Some(root) = self.tree.root() else {
            self.finalized = true;
            return Ok(());
        };

        let mut eligible = vec![false; self.tree.len()];
        let mut parent: Vec<Option<NodeId>> = vec![None; self.tree.len()];
        for id in self.tree.iterate_postorder() {
            let node = self.tree.node(id);
            if let NodeKind::Join { left, right } = node.kind() {
                parent[left] = Some(id);
                parent[right] = Some(id);
                let right_free = self.tree.node(right).free_edges();
                let contracts_pinned = self
                    .tree
                    .node(left)
                    .free_edges()
                    .iter()
                    .any(|e| right_free.contains(e) && self.edges_to_slice.contains(e));
                eligible[id] = node.maxrank() < threshold
                    && !contracts_pinned
                    && (self.tree.node(left).is_leaf() || eligible[left])
                    && (self.tree.node(right).is_leaf() || eligible[right]);
            }
        }

        enum Step {
            Leaf(usize),
            Join,
        }
        let mut backend = NdarrayBackend::new();
        let mut tensors = Vec::new();
        let mut index_lists = Vec::new();
        let mut steps = Vec::new();
        let mut collapsed = 0;
        for id in self.tree.postorder_from(root) {
            if parent[id].is_some_and(|p| eligible[p]) {
                continue;
            }
            match self.tree.node(id).kind() {
                NodeKind::Leaf { tensor } => {
                    tensors.push(self.network.tensor(tensor)?.clone());
                    index_lists.push(self.network.index_list(tensor).to_vec());
                    steps.push(Step::Leaf(tensors.len() - 1));
                }
                NodeKind::Join { .. } if eligible[id] => {
                    let (values, edges) = backend.contract_subtree(&self.network, &self.tree, id)?;
                    tensors.push(Tensor::dense(values));
                    index_lists.push(edges);
                    steps.push(Step::Leaf(tensors.len() - 1));
                    collapsed += 1;
                }
                NodeKind::Join { .. } => steps.push(Step::Join),
            }
        }

        let network = TensorNetwork::from_parts(tensors, index_lists, self.network.edge_bound())?;
        let mut stack: Vec<ContractionTree> = Vec::new();
        for step in steps {
            match step {
                Step::Leaf(t) => stack.push(ContractionTree::leaf(&network, t)),
                Step::Join => {
                    let (Some(right), Some(left)) = (stack.pop(), stack.pop()) else {
                        return Err(Error::IncompleteTree);
                    };
                    stack.push(left.combine(right));
                }
            }
        }
        let mut tree = stack.pop().ok_or(Error::IncompleteTree)?;
        if let Some(width) = self.tree.width() {
            tree = tree.with_width(width);
        }
        debug!(
            collapsed,
            tensors = network.len(),
            "pre-contracted subtrees below rank {threshold}"
        );

        self.cost = tree.estimate_cost(&self.edges_to_slice);
        self.tree = tree;
        self.network = network;
        self.finalized = true;
        Ok(())
    }
}
