//! Contraction trees by greedy pairwise merging on the structure graph.
//!
//! The network is viewed as a multigraph with one node per connected tensor
//! and one edge per network edge. Merging two adjacent nodes contracts their
//! shared edges; the pair chosen next is always one whose merged node keeps
//! the fewest edges. No decomposition solver is involved.

use petgraph::stable_graph::{NodeIndex, StableUnGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use rand::rngs::SmallRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::{Candidates, ContractionMethod};
use crate::contraction_tree::ContractionTree;
use crate::error::Result;
use crate::network::{EdgeId, TensorNetwork};
use crate::solver::SolverParams;
use crate::timer::Timer;

/// Builds trees by greedy contraction of the structure multigraph.
///
/// The first candidate breaks ties by edge order; every further trial
/// breaks them at random, seeded from the solver parameters.
#[derive(Debug, Clone)]
pub struct GreedyMethod {
    trials: usize,
}

impl Default for GreedyMethod {
    fn default() -> Self {
        Self { trials: 8 }
    }
}

impl GreedyMethod {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of candidate trees to produce, at least one.
    pub fn with_trials(mut self, trials: usize) -> Self {
        self.trials = trials.max(1);
        self
    }
}

impl ContractionMethod for GreedyMethod {
    fn contraction_trees<'a>(
        &'a self,
        network: &'a TensorNetwork,
        params: &SolverParams,
        timer: &'a Timer,
    ) -> Result<Candidates<'a>> {
        let mut rng = SmallRng::seed_from_u64(params.seed);
        Ok(Box::new((0..self.trials).map(move |trial| {
            let tree = if trial == 0 {
                greedy_tree(network, None::<&mut SmallRng>, timer)?
            } else {
                greedy_tree(network, Some(&mut rng), timer)?
            };
            debug!(trial, maxrank = tree.maxrank(), "greedy tree");
            Ok((tree, network.clone()))
        })))
    }
}

type Multigraph = StableUnGraph<ContractionTree, EdgeId>;

/// Contract `network` greedily. With an `rng`, ties between equally cheap
/// pairs are broken at random.
pub fn greedy_tree<R: Rng + ?Sized>(
    network: &TensorNetwork,
    mut rng: Option<&mut R>,
    timer: &Timer,
) -> Result<ContractionTree> {
    let mut graph = Multigraph::default();
    let nodes: Vec<Option<NodeIndex>> = (0..network.len())
        .map(|t| {
            let connected = network.index_list(t).iter().any(Option::is_some);
            connected.then(|| graph.add_node(ContractionTree::leaf(network, t)))
        })
        .collect();
    for edge in network.edges() {
        if let (Some(a), Some(b)) = (nodes[edge.tensors[0]], nodes[edge.tensors[1]]) {
            graph.add_edge(a, b, edge.id);
        }
    }

    while let Some((a, b)) = cheapest_pair(&graph, rng.as_deref_mut()) {
        timer.check()?;
        merge(&mut graph, a, b);
    }

    // One node is left per connected component.
    let mut tree = ContractionTree::empty();
    let remaining: Vec<NodeIndex> = graph.node_indices().collect();
    for node in remaining {
        if let Some(component) = graph.remove_node(node) {
            tree = tree.combine(component);
        }
    }
    Ok(tree.include_rank_zero_tensors(network))
}

/// Adjacent pair whose merged node has the fewest incident edges.
fn cheapest_pair<R: Rng + ?Sized>(
    graph: &Multigraph,
    rng: Option<&mut R>,
) -> Option<(NodeIndex, NodeIndex)> {
    let mut best: Vec<(NodeIndex, NodeIndex)> = Vec::new();
    let mut best_cost = usize::MAX;
    for edge in graph.edge_references() {
        let (a, b) = (edge.source().min(edge.target()), edge.source().max(edge.target()));
        if best.contains(&(a, b)) {
            continue;
        }
        let shared = graph.edges(a).filter(|e| other_end(e, a) == b).count();
        let cost = graph.edges(a).count() + graph.edges(b).count() - 2 * shared;
        if cost < best_cost {
            best_cost = cost;
            best.clear();
        }
        if cost == best_cost {
            best.push((a, b));
        }
    }
    match rng {
        Some(rng) => best.choose(rng).copied(),
        None => best.first().copied(),
    }
}

fn other_end<E: EdgeRef<NodeId = NodeIndex>>(edge: &E, node: NodeIndex) -> NodeIndex {
    if edge.source() == node {
        edge.target()
    } else {
        edge.source()
    }
}

/// Fold `b` into `a`: edges between them are contracted, the rest of
/// `b`'s edges move to `a`.
fn merge(graph: &mut Multigraph, a: NodeIndex, b: NodeIndex) {
    let moved: Vec<(NodeIndex, EdgeId)> = graph
        .edges(b)
        .map(|e| (other_end(&e, b), *e.weight()))
        .filter(|&(other, _)| other != a)
        .collect();
    let Some(absorbed) = graph.remove_node(b) else {
        return;
    };
    for (other, id) in moved {
        graph.add_edge(a, other, id);
    }
    if let Some(tree) = graph.node_weight_mut(a) {
        *tree = std::mem::take(tree).combine(absorbed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{NdarrayBackend, TensorBackend};
    use crate::constructions::cnf_count;
    use crate::formula::Formula;
    use crate::tensor::Tensor;
    use crate::test_utils::{brute_force_count, random_cnf};
    use std::time::Duration;

    /// A ring of `n` variable tensors, each joined to its two neighbours.
    fn ring(n: usize) -> TensorNetwork {
        let mut network = TensorNetwork::new();
        let dims: Vec<_> = (0..n)
            .map(|_| network.add_node(Tensor::variable(2, 1.0, 1.0)))
            .collect();
        for i in 0..n {
            network.connect(dims[i][1], dims[(i + 1) % n][0]).unwrap();
        }
        network
    }

    #[test]
    fn test_greedy_keeps_ring_rank_low() {
        let network = ring(8);
        let timer = Timer::unbounded("planning");
        let tree = greedy_tree(&network, None::<&mut SmallRng>, &timer).unwrap();
        assert!(tree.is_complete(&network));
        assert_eq!(tree.maxrank(), 2);
        assert!(tree.free_edges().is_empty());
        assert!(tree.width().is_none());
    }

    #[test]
    fn test_disconnected_and_rank_zero_tensors_are_included() {
        let mut network = ring(3);
        let a = network.add_node(Tensor::variable(1, 2.0, 3.0));
        let b = network.add_node(Tensor::variable(1, 5.0, 7.0));
        network.connect(a[0], b[0]).unwrap();
        network.add_node(Tensor::variable(0, 0.5, 0.5));

        let timer = Timer::unbounded("planning");
        let mut rng = SmallRng::seed_from_u64(3);
        let tree = greedy_tree(&network, Some(&mut rng), &timer).unwrap();
        assert!(tree.is_complete(&network));

        let value = NdarrayBackend::new().contract(&network, &tree).unwrap();
        let expected = network.contract_dense().unwrap();
        assert_eq!(value, expected);
    }

    #[test]
    fn test_method_yields_every_trial() {
        let formula = Formula::from_clauses(3, vec![vec![1, 2], vec![-1, 3], vec![-2, -3]]).unwrap();
        let network = cnf_count(&formula).unwrap();
        let timer = Timer::unbounded("planning");
        let method = GreedyMethod::new().with_trials(3);
        let candidates: Vec<_> = method
            .contraction_trees(&network, &SolverParams::default().with_seed(5), &timer)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(candidates.len(), 3);
        for (tree, contracted) in &candidates {
            assert!(tree.is_complete(contracted));
            let value = NdarrayBackend::new().contract(contracted, tree).unwrap();
            assert_eq!(NdarrayBackend::new().scalar(&value).unwrap(), 2.0);
        }
    }

    #[test]
    fn test_random_formulas_match_brute_force() {
        let mut rng = SmallRng::seed_from_u64(17);
        let timer = Timer::unbounded("planning");
        for _ in 0..20 {
            let formula = random_cnf(&mut rng, 6, 8, 3);
            let network = cnf_count(&formula).unwrap();
            let tree = greedy_tree(&network, Some(&mut rng), &timer).unwrap();
            let mut backend = NdarrayBackend::new();
            let value = backend.contract(&network, &tree).unwrap();
            let count = backend.scalar(&value).unwrap();
            assert!((count - brute_force_count(&formula)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_expired_timer_stops_merging() {
        let timer = Timer::new("planning", Some(Duration::from_nanos(1)));
        std::thread::sleep(Duration::from_millis(2));
        let err = greedy_tree(&ring(4), None::<&mut SmallRng>, &timer).unwrap_err();
        assert!(err.is_timeout());
    }
}
