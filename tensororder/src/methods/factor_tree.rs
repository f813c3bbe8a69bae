//! Contraction trees from decompositions of the structure graph.
//!
//! Every network edge is hosted by a fresh leaf next to a bag covering both
//! of its tensors. After bounding the tree to degree 3, a postorder pass
//! walks the edges upward and factors each tensor whose edges arrive from
//! both sides of a join, so every join merges exactly two subtrees.

use std::collections::{BTreeMap, HashMap, HashSet};

use rand::rngs::SmallRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::{validate, Candidates, ContractionMethod};
use crate::contraction_tree::ContractionTree;
use crate::decomposition::Decomposition;
use crate::error::{Error, Result};
use crate::network::{EdgeId, TensorNetwork};
use crate::solver::{DecompositionSolver, SolverParams};
use crate::timer::Timer;

/// Builds trees from decompositions of the structure graph, factoring
/// high-rank tensors along the way.
#[derive(Debug, Clone)]
pub struct FactorTreeMethod<S> {
    solver: S,
}

impl<S: DecompositionSolver> FactorTreeMethod<S> {
    pub fn new(solver: S) -> Self {
        Self { solver }
    }
}

impl<S: DecompositionSolver> ContractionMethod for FactorTreeMethod<S> {
    fn contraction_trees<'a>(
        &'a self,
        network: &'a TensorNetwork,
        params: &SolverParams,
        timer: &'a Timer,
    ) -> Result<Candidates<'a>> {
        let graph = network.structure_graph();
        let decompositions = self.solver.decompositions(&graph, params, timer)?;
        let mut rng = SmallRng::seed_from_u64(params.seed);
        Ok(Box::new(decompositions.map(move |decomposition| {
            let decomposition = decomposition?;
            let width = decomposition.width();
            let mut factored = network.clone();
            let tree = factor_tree(&mut factored, decomposition, &mut rng, timer)?;
            debug!(
                maxrank = tree.maxrank(),
                width,
                tensors = factored.len(),
                "factor tree"
            );
            Ok((tree.with_width(width), factored))
        })))
    }
}

/// Subtree result: the contraction so far, and for each tensor not yet
/// fully contracted, the edge through which it reaches this subtree.
#[derive(Debug, Default)]
struct Exposed {
    tree: ContractionTree,
    edges: BTreeMap<usize, EdgeId>,
}

/// Convert a decomposition of `network.structure_graph()` into a
/// contraction tree, factoring tensors of `network` in place.
pub fn factor_tree<R: Rng + ?Sized>(
    network: &mut TensorNetwork,
    mut decomposition: Decomposition,
    rng: &mut R,
    timer: &Timer,
) -> Result<ContractionTree> {
    validate(&decomposition)?;

    let tree = if decomposition.num_nodes() == 0 {
        ContractionTree::empty()
    } else {
        let edge_at_leaf = host_edges(network, &mut decomposition, rng)?;
        decomposition.split_high_degree_nodes(rng);
        let root = decomposition.extend_leaf(0, None);

        let exposed = decomposition.traverse_postorder(root, |node, children: Vec<Result<Exposed>>| {
            timer.check()?;
            let mut children = children.into_iter().collect::<Result<Vec<_>>>()?;
            match children.len() {
                0 => Ok(expose_leaf(network, edge_at_leaf.get(&node).copied())),
                1 => Ok(children.remove(0)),
                2 => {
                    let right = children.remove(1);
                    let left = children.remove(0);
                    merge(network, left, right)
                }
                n => Err(Error::malformed(
                    0,
                    format!("decomposition node {node} has {n} children after splitting"),
                )),
            }
        })?;

        let mut tree = exposed.tree;
        let present: HashSet<usize> = tree.leaves().into_iter().collect();
        for t in exposed.edges.into_keys().filter(|t| !present.contains(t)) {
            tree = tree.combine(ContractionTree::leaf(network, t));
        }
        tree
    };

    let tree = tree.include_rank_zero_tensors(network);
    if !tree.is_complete(network) {
        return Err(Error::IncompleteTree);
    }
    Ok(tree)
}

/// Give every network edge its own decomposition leaf, next to a random bag
/// covering both endpoints. Parallel edges share the first choice.
fn host_edges<R: Rng + ?Sized>(
    network: &TensorNetwork,
    decomposition: &mut Decomposition,
    rng: &mut R,
) -> Result<HashMap<usize, EdgeId>> {
    let mut nodes_with: Vec<Vec<usize>> = vec![Vec::new(); network.len()];
    for node in 0..decomposition.num_nodes() {
        for &t in decomposition.bag(node) {
            if let Some(nodes) = nodes_with.get_mut(t) {
                nodes.push(node);
            }
        }
    }

    let mut leaf_for_pair: HashMap<[usize; 2], usize> = HashMap::new();
    let mut edges_at: BTreeMap<usize, Vec<EdgeId>> = BTreeMap::new();
    let edges: Vec<_> = network.edges().copied().collect();
    for edge in edges {
        let leaf = match leaf_for_pair.get(&edge.tensors) {
            Some(&leaf) => leaf,
            None => {
                let [a, b] = edge.tensors;
                let covering: Vec<usize> = nodes_with[a]
                    .iter()
                    .copied()
                    .filter(|&n| decomposition.bag(n).contains(&b))
                    .collect();
                let &chosen = covering.choose(rng).ok_or_else(|| {
                    Error::malformed(0, format!("no bag covers tensors {a} and {b}"))
                })?;
                let leaf = decomposition.extend_leaf(chosen, None);
                leaf_for_pair.insert(edge.tensors, leaf);
                leaf
            }
        };
        edges_at.entry(leaf).or_default().push(edge.id);
    }

    let mut edge_at_leaf = HashMap::new();
    for (leaf, edges) in edges_at {
        if let [only] = edges[..] {
            edge_at_leaf.insert(leaf, only);
            continue;
        }
        let mut current = leaf;
        for e in edges {
            current = decomposition.extend_leaf(current, None);
            edge_at_leaf.insert(current, e);
        }
    }
    Ok(edge_at_leaf)
}

fn expose_leaf(network: &TensorNetwork, edge: Option<EdgeId>) -> Exposed {
    let mut exposed = Exposed::default();
    let Some(endpoints) = edge.and_then(|e| network.edge(e)).map(|e| e.tensors) else {
        return exposed;
    };
    for t in endpoints {
        if network.index_list(t).len() <= 1 {
            exposed.tree = std::mem::take(&mut exposed.tree).combine(ContractionTree::leaf(network, t));
        } else if let Some(e) = edge {
            exposed.edges.insert(t, e);
        }
    }
    exposed
}

fn merge(network: &mut TensorNetwork, left: Exposed, right: Exposed) -> Result<Exposed> {
    let mut left_tree = left.tree;
    let mut right_tree = right.tree;
    let mut edges = BTreeMap::new();
    let mut new_leaves = Vec::new();

    for (&t, &left_edge) in &left.edges {
        match right.edges.get(&t) {
            None => {
                edges.insert(t, left_edge);
            }
            Some(&right_edge) if right_edge == left_edge => {}
            Some(_) if network.index_list(t).len() == 2 => {
                left_tree = left_tree.combine(ContractionTree::leaf(network, t));
            }
            Some(&right_edge) => {
                let dims = network.index_list(t);
                let dim_of = |e: EdgeId| {
                    dims.iter()
                        .position(|&d| d == Some(e))
                        .ok_or(Error::UnknownEdge(e))
                };
                let split = [dim_of(left_edge)?, dim_of(right_edge)?];
                let (factor, joining) = network.factor_out(t, &split)?;
                edges.insert(t, joining);
                new_leaves.push(factor);
            }
        }
    }
    for (&t, &right_edge) in &right.edges {
        if !left.edges.contains_key(&t) {
            edges.insert(t, right_edge);
        }
    }

    // Place each new rank-3 tensor where the current rank is smallest: on
    // the left subtree, the right subtree, or after the join.
    let mut ranks = [left.edges.len(), right.edges.len(), edges.len()];
    let mut after_join = Vec::new();
    for t in new_leaves {
        let position = (0..3).min_by_key(|&i| ranks[i]).unwrap_or(2);
        ranks[position] += 1;
        let leaf = ContractionTree::leaf(network, t);
        match position {
            0 => left_tree = left_tree.combine(leaf),
            1 => right_tree = right_tree.combine(leaf),
            _ => after_join.push(leaf),
        }
    }
    let tree = after_join
        .into_iter()
        .fold(left_tree.combine(right_tree), ContractionTree::combine);
    Ok(Exposed { tree, edges })
}
