//! Contraction trees from decompositions of the line graph.
//!
//! Line graph nodes are edge ids, so every tensor's connected edges form a
//! clique and some bag covers them all. Each tensor is contracted at the
//! first bag in postorder that covers its edges.

use std::collections::BTreeSet;

use tracing::debug;

use super::{validate, Candidates, ContractionMethod};
use crate::contraction_tree::ContractionTree;
use crate::decomposition::Decomposition;
use crate::error::{Error, Result};
use crate::network::{EdgeId, TensorNetwork};
use crate::solver::{DecompositionSolver, SolverParams};
use crate::timer::Timer;

/// Builds trees from decompositions of the network's line graph.
#[derive(Debug, Clone)]
pub struct LineGraphMethod<S> {
    solver: S,
}

impl<S: DecompositionSolver> LineGraphMethod<S> {
    pub fn new(solver: S) -> Self {
        Self { solver }
    }
}

impl<S: DecompositionSolver> ContractionMethod for LineGraphMethod<S> {
    fn contraction_trees<'a>(
        &'a self,
        network: &'a TensorNetwork,
        params: &SolverParams,
        timer: &'a Timer,
    ) -> Result<Candidates<'a>> {
        let graph = network.line_graph();
        let decompositions = self.solver.decompositions(&graph, params, timer)?;
        Ok(Box::new(decompositions.map(move |decomposition| {
            let decomposition = decomposition?;
            let tree = line_graph_tree(network, &decomposition, timer)?;
            debug!(
                maxrank = tree.maxrank(),
                width = decomposition.width(),
                "line graph tree"
            );
            Ok((tree.with_width(decomposition.width()), network.clone()))
        })))
    }
}

/// Convert a decomposition of `network.line_graph()` into a contraction tree.
pub fn line_graph_tree(
    network: &TensorNetwork,
    decomposition: &Decomposition,
    timer: &Timer,
) -> Result<ContractionTree> {
    validate(decomposition)?;
    let edge_sets: Vec<BTreeSet<EdgeId>> = (0..network.len())
        .map(|t| network.index_list(t).iter().flatten().copied().collect())
        .collect();
    let mut placed = vec![false; network.len()];

    let tree = if decomposition.num_nodes() == 0 {
        ContractionTree::empty()
    } else {
        decomposition.traverse_postorder(0, |node, children: Vec<Result<ContractionTree>>| {
            timer.check()?;
            let bag = decomposition.bag(node);
            let mut candidates: BTreeSet<usize> = BTreeSet::new();
            for &e in bag {
                if let Some(edge) = network.edge(e) {
                    candidates.extend(edge.tensors);
                }
            }

            let mut tree = ContractionTree::empty();
            for child in children {
                tree = tree.combine(child?);
            }
            for t in candidates {
                if !placed[t] && edge_sets[t].is_subset(bag) {
                    placed[t] = true;
                    tree = tree.combine(ContractionTree::leaf(network, t));
                }
            }
            Ok(tree)
        })?
    };

    let tree = tree.include_rank_zero_tensors(network);
    if !tree.is_complete(network) {
        return Err(Error::IncompleteTree);
    }
    Ok(tree)
}
