//! Property-based tests for contraction trees, factoring and slicing.

mod common;

use std::collections::BTreeSet;

use ndarray::{indices, Dimension, IxDyn};
use proptest::prelude::*;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use tensororder::methods::ContractionMethod;
use tensororder::{
    cnf_count, ContractionTree, Decomposition, FactorTreeMethod, LineGraphMethod, NodeKind,
    SingleBagSolver, SolverParams, Tensor, Timer,
};

use common::{approx_eq, brute_force_count, formula};

fn candidates(
    method: &dyn ContractionMethod,
    network: &tensororder::TensorNetwork,
    seed: u64,
) -> Vec<(ContractionTree, tensororder::TensorNetwork)> {
    let timer = Timer::unbounded("planning");
    let params = SolverParams::default().with_seed(seed);
    method
        .contraction_trees(network, &params, &timer)
        .unwrap()
        .collect::<tensororder::Result<Vec<_>>>()
        .unwrap()
}

fn tensor_of_kind(kind: u8, rank: usize, polarity: &[bool]) -> Tensor {
    let literals: Vec<bool> = polarity.iter().copied().cycle().take(rank).collect();
    match kind % 3 {
        0 => Tensor::or(literals),
        1 => Tensor::or_with_output(literals, rank - 1),
        _ => Tensor::variable(rank, 0.75, 0.25),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Leaves of every candidate tree partition the tensors of its network
    #[test]
    fn test_partition_invariant(formula in formula(), seed in 0u64..1000) {
        let network = cnf_count(&formula).unwrap();
        let line = LineGraphMethod::new(SingleBagSolver);
        let factor = FactorTreeMethod::new(SingleBagSolver);
        for method in [&line as &dyn ContractionMethod, &factor] {
            for (tree, factored) in candidates(method, &network, seed) {
                prop_assert!(tree.is_complete(&factored));
                let mut leaves = tree.leaves();
                leaves.sort_unstable();
                prop_assert_eq!(leaves, (0..factored.len()).collect::<Vec<_>>());
            }
        }
    }

    /// Free edges of a join are the symmetric difference of its children's
    #[test]
    fn test_free_edge_law(formula in formula(), seed in 0u64..1000) {
        let network = cnf_count(&formula).unwrap();
        let factor = FactorTreeMethod::new(SingleBagSolver);
        for (tree, _) in candidates(&factor, &network, seed) {
            for id in tree.iterate_postorder() {
                let node = tree.node(id);
                if let NodeKind::Join { left, right } = node.kind() {
                    let l: BTreeSet<_> = tree.node(left).free_edges().iter().copied().collect();
                    let r: BTreeSet<_> = tree.node(right).free_edges().iter().copied().collect();
                    let free: BTreeSet<_> = node.free_edges().iter().copied().collect();
                    prop_assert_eq!(&free, &l.symmetric_difference(&r).copied().collect());
                    prop_assert!(free.len() <= l.len() + r.len());
                }
            }
        }
    }

    /// Contracting the two factors over their shared dimension gives back
    /// the original tensor
    #[test]
    fn test_factoring_round_trip(
        kind in 0u8..3,
        rank in 3usize..=5,
        polarity in prop::collection::vec(any::<bool>(), 1..=5),
        split in prop::collection::vec(any::<bool>(), 5),
    ) {
        let tensor = tensor_of_kind(kind, rank, &polarity);
        let left: Vec<usize> = (0..rank).filter(|&d| split[d]).collect();
        let right: Vec<usize> = (0..rank).filter(|&d| !split[d]).collect();
        prop_assume!(!left.is_empty() && !right.is_empty());

        let (a, b) = tensor.factor_components(&left, &right).unwrap();
        let shared = *a.shape().last().unwrap();
        prop_assert_eq!(shared, *b.shape().last().unwrap());

        for index in indices(IxDyn(&tensor.shape())) {
            let index = index.slice().to_vec();
            let expected = tensor.entry(&index);
            let actual: f64 = (0..shared)
                .map(|k| {
                    let mut ia: Vec<usize> = left.iter().map(|&d| index[d]).collect();
                    let mut ib: Vec<usize> = right.iter().map(|&d| index[d]).collect();
                    ia.push(k);
                    ib.push(k);
                    a.entry(&ia) * b.entry(&ib)
                })
                .sum();
            prop_assert!(approx_eq(expected, actual), "{:?}: {} != {}", index, expected, actual);
        }
    }

    /// Pinning more edges never raises the memory estimate
    #[test]
    fn test_cost_monotonicity(
        formula in formula(),
        pick in prop::collection::vec(any::<bool>(), 18),
        extra in prop::collection::vec(any::<bool>(), 18),
    ) {
        let network = cnf_count(&formula).unwrap();
        let tree = ContractionTree::sequential(&network);
        let edges: Vec<_> = network.edges().map(|e| e.id).collect();
        let small: BTreeSet<_> = edges.iter().zip(&pick).filter(|(_, &p)| p).map(|(&e, _)| e).collect();
        let large: BTreeSet<_> = edges
            .iter()
            .zip(pick.iter().zip(&extra))
            .filter(|(_, (&p, &x))| p || x)
            .map(|(&e, _)| e)
            .collect();
        prop_assert!(small.is_subset(&large));

        let before = tree.estimate_cost(&small);
        let after = tree.estimate_cost(&large);
        prop_assert!(after.memory <= before.memory);
        prop_assert!(after.maxrank <= before.maxrank);
    }

    /// Splitting high-degree nodes bounds every degree by 3 and keeps a tree
    #[test]
    fn test_degree_bound(parents in prop::collection::vec(0usize..1000, 1..40), seed in any::<u64>()) {
        let mut decomposition = Decomposition::new();
        decomposition.add_node(BTreeSet::from([0]));
        for (i, &p) in parents.iter().enumerate() {
            let node = decomposition.add_node(BTreeSet::from([i + 1]));
            // Small parent indices favor stars.
            decomposition.add_edge(node, (p % (i + 1)) % 3);
        }
        let mut rng = SmallRng::seed_from_u64(seed);
        decomposition.split_high_degree_nodes(&mut rng);
        prop_assert!(decomposition.max_degree() <= 3);
        prop_assert!(decomposition.is_tree());
    }

    /// Summing the contractions of every slice of one edge class gives the
    /// unsliced count
    #[test]
    fn test_slicing_correctness(formula in formula(), which in any::<prop::sample::Index>()) {
        let network = cnf_count(&formula).unwrap();
        let edges: Vec<_> = network.edges().map(|e| e.id).collect();
        prop_assume!(!edges.is_empty());
        let class = network.find_equivalent_edges(*which.get(&edges)).unwrap();

        let whole = network.contract_dense().unwrap()[IxDyn(&[])];
        let sliced: f64 = network
            .slice_groups(&[class])
            .unwrap()
            .map(|slice| slice.contract_dense().unwrap()[IxDyn(&[])])
            .sum();
        prop_assert!(approx_eq(whole, sliced));
        prop_assert!(approx_eq(whole, brute_force_count(&formula)));
    }
}
