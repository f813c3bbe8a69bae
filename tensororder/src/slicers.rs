//! Slicing policies.
//!
//! A slicer repeatedly pins one more equivalence class of edges in a
//! [`SlicedExecutionPlan`] until the plan fits its resource bounds.

use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::SmallRng;
use rand::seq::IndexedRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::network::EdgeId;
use crate::plan::SlicedExecutionPlan;

/// Resource bounds a sliced plan must meet. Every bound that is set must
/// hold at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SliceBounds {
    /// Largest intermediate tensor, in entries.
    pub memory: Option<f64>,
    /// Largest intermediate rank.
    pub rank: Option<usize>,
    /// Minimum number of slice groups.
    pub slices: Option<usize>,
}

impl SliceBounds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_memory(mut self, entries: f64) -> Self {
        self.memory = Some(entries);
        self
    }

    pub fn with_rank(mut self, rank: usize) -> Self {
        self.rank = Some(rank);
        self
    }

    pub fn with_slices(mut self, slices: usize) -> Self {
        self.slices = Some(slices);
        self
    }

    fn memory_exceeded(&self, plan: &SlicedExecutionPlan) -> bool {
        self.memory.is_some_and(|m| m < plan.memory())
    }

    fn rank_exceeded(&self, plan: &SlicedExecutionPlan) -> bool {
        self.rank.is_some_and(|r| r < plan.maxrank())
    }

    fn too_few_slices(&self, plan: &SlicedExecutionPlan) -> bool {
        self.slices.is_some_and(|s| plan.num_slice_groups() < s)
    }

    pub fn is_satisfied(&self, plan: &SlicedExecutionPlan) -> bool {
        !self.memory_exceeded(plan) && !self.rank_exceeded(plan) && !self.too_few_slices(plan)
    }

    /// Largest rank allowed by the memory and rank bounds together.
    fn allowable_rank(&self) -> Option<usize> {
        let from_memory = self.memory.map(|m| m.max(1.0).log2().floor() as usize);
        match (self.rank, from_memory) {
            (Some(r), Some(m)) => Some(r.min(m)),
            (r, m) => r.or(m),
        }
    }
}

/// A policy choosing which edge to slice next.
pub trait Slicer {
    /// Pin one more equivalence class.
    fn slice_once(&mut self, plan: &mut SlicedExecutionPlan) -> Result<()>;

    /// Slice until every bound in `bounds` holds. Never slices a plan that
    /// already meets its bounds.
    fn slice_until(&mut self, plan: &mut SlicedExecutionPlan, bounds: &SliceBounds) -> Result<()> {
        while bounds.memory_exceeded(plan) {
            self.slice_once(plan)?;
        }
        while bounds.rank_exceeded(plan) {
            self.slice_once(plan)?;
        }
        while bounds.too_few_slices(plan) {
            self.slice_once(plan)?;
        }
        Ok(())
    }
}

impl<S: Slicer + ?Sized> Slicer for Box<S> {
    fn slice_once(&mut self, plan: &mut SlicedExecutionPlan) -> Result<()> {
        (**self).slice_once(plan)
    }

    fn slice_until(&mut self, plan: &mut SlicedExecutionPlan, bounds: &SliceBounds) -> Result<()> {
        (**self).slice_until(plan, bounds)
    }
}

/// Always slices the plan's own suggestion: an edge of the largest
/// intermediate tensor.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedyMemSlicer;

impl Slicer for GreedyMemSlicer {
    fn slice_once(&mut self, plan: &mut SlicedExecutionPlan) -> Result<()> {
        let edge = plan.next_edge_to_slice().ok_or(Error::NothingToSlice)?;
        plan.slice_at(edge)
    }
}

/// Slices a random unpinned edge of the node with the most unpinned free
/// edges.
#[derive(Debug, Clone)]
pub struct GreedyLargestSlicer {
    rng: SmallRng,
}

impl GreedyLargestSlicer {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl Slicer for GreedyLargestSlicer {
    fn slice_once(&mut self, plan: &mut SlicedExecutionPlan) -> Result<()> {
        let tree = plan.tree();
        let pinned = plan.edges_to_slice();
        let mut largest: Vec<EdgeId> = Vec::new();
        for id in tree.iterate_postorder() {
            let unpinned: Vec<EdgeId> = tree
                .node(id)
                .free_edges()
                .iter()
                .copied()
                .filter(|e| !pinned.contains(e))
                .collect();
            if unpinned.len() > largest.len() {
                largest = unpinned;
            }
        }
        let edge = *largest.choose(&mut self.rng).ok_or(Error::NothingToSlice)?;
        plan.slice_at(edge)
    }
}

/// Slices the equivalence class touching the most over-bound intermediate
/// tensors, then finishes greedily by memory.
#[derive(Debug, Clone)]
pub struct GreedyMostSlicer {
    rng: SmallRng,
}

impl GreedyMostSlicer {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    fn slice_most_shared(&mut self, plan: &mut SlicedExecutionPlan, allowable: usize) -> Result<()> {
        let classes = plan.network().equivalent_edge_classes();
        let tree = plan.tree();
        let pinned = plan.edges_to_slice();
        let nodes: Vec<_> = tree.iterate_postorder().collect();

        // Unpinned class representatives of each node above the bound.
        let mut large_node_edges: Vec<BTreeSet<EdgeId>> = vec![BTreeSet::new(); nodes.len()];
        let mut large_nodes_by_class: BTreeMap<EdgeId, BTreeSet<usize>> = BTreeMap::new();
        for (i, &id) in nodes.iter().enumerate() {
            let node = tree.node(id);
            let unpinned: BTreeSet<EdgeId> = node
                .free_edges()
                .iter()
                .filter(|e| !pinned.contains(*e))
                .map(|e| classes[e])
                .collect();
            let size = node
                .free_edges()
                .iter()
                .filter(|e| !pinned.contains(*e))
                .count()
                + node.open_dims();
            if size > allowable {
                for &class in &unpinned {
                    large_nodes_by_class.entry(class).or_default().insert(i);
                }
                large_node_edges[i] = unpinned;
            }
        }

        let mut chosen_classes = Vec::new();
        loop {
            let max_count = large_nodes_by_class.values().map(BTreeSet::len).max().unwrap_or(0);
            if max_count == 0 {
                break;
            }
            let candidates: Vec<EdgeId> = large_nodes_by_class
                .iter()
                .filter(|(_, nodes)| nodes.len() == max_count)
                .map(|(&class, _)| class)
                .collect();
            let Some(&chosen) = candidates.choose(&mut self.rng) else {
                break;
            };
            let covered = large_nodes_by_class.remove(&chosen).unwrap_or_default();
            for i in covered {
                for class in &large_node_edges[i] {
                    if let Some(nodes) = large_nodes_by_class.get_mut(class) {
                        nodes.remove(&i);
                    }
                }
            }
            chosen_classes.push(chosen);
        }

        for class in chosen_classes {
            plan.slice_at(class)?;
        }
        Ok(())
    }
}

impl Slicer for GreedyMostSlicer {
    fn slice_once(&mut self, plan: &mut SlicedExecutionPlan) -> Result<()> {
        GreedyMemSlicer.slice_once(plan)
    }

    fn slice_until(&mut self, plan: &mut SlicedExecutionPlan, bounds: &SliceBounds) -> Result<()> {
        if let Some(allowable) = bounds.allowable_rank() {
            if !bounds.is_satisfied(plan) {
                self.slice_most_shared(plan, allowable)?;
            }
        }
        GreedyMemSlicer.slice_until(plan, bounds)
    }
}

/// Refuses to slice.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSlicer;

impl Slicer for DisabledSlicer {
    fn slice_once(&mut self, _plan: &mut SlicedExecutionPlan) -> Result<()> {
        Err(Error::SlicingDisabled("slicing is disabled".to_string()))
    }

    fn slice_until(&mut self, plan: &mut SlicedExecutionPlan, bounds: &SliceBounds) -> Result<()> {
        if bounds.memory_exceeded(plan) {
            return Err(Error::SlicingDisabled(format!(
                "plan memory {} exceeds the limit",
                plan.memory()
            )));
        }
        if bounds.rank_exceeded(plan) {
            return Err(Error::SlicingDisabled(format!(
                "plan max rank {} exceeds the limit",
                plan.maxrank()
            )));
        }
        if bounds.too_few_slices(plan) {
            return Err(Error::SlicingDisabled(
                "a minimum number of slices was requested".to_string(),
            ));
        }
        Ok(())
    }
}

/// Slicer selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SlicerKind {
    #[default]
    GreedyMem,
    GreedyLargest,
    GreedyMost,
    Disabled,
}

impl SlicerKind {
    pub fn build(self, seed: u64) -> Box<dyn Slicer> {
        match self {
            SlicerKind::GreedyMem => Box::new(GreedyMemSlicer),
            SlicerKind::GreedyLargest => Box::new(GreedyLargestSlicer::new(seed)),
            SlicerKind::GreedyMost => Box::new(GreedyMostSlicer::new(seed)),
            SlicerKind::Disabled => Box::new(DisabledSlicer),
        }
    }
}
