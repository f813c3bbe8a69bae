//! End-to-end tests: parse a formula, plan, slice and count.

mod common;

use tensororder::planning::{execute, plan, PlannerConfig};
use tensororder::slicers::{GreedyMemSlicer, SliceBounds, Slicer};
use tensororder::snapshot::{readjson, writejson, PlanSnapshot};
use tensororder::{
    cnf_count, ContractionMethod, FactorTreeMethod, Formula, LineGraphMethod, MethodKind,
    NdarrayBackend, SingleBagSolver, SlicerKind, TensorBackend, Timer, WeightFormat,
};

use common::{approx_eq, brute_force_count};

const THREE_CLAUSES: &str = "c (x1 | x2) & (!x1 | x3) & (!x2 | !x3)
p cnf 4 3
1 2 0
-1 3 0
-2 -3 0
";

fn count_with(method: &dyn ContractionMethod, formula: &Formula, config: &PlannerConfig) -> f64 {
    let network = cnf_count(formula).unwrap();
    let timer = Timer::unbounded("planning");
    let outcome = plan(method, &network, &timer, config).unwrap();
    NdarrayBackend::new()
        .contract_sliced(&outcome.best, None)
        .unwrap()
}

#[test]
fn test_model_count_with_free_variable() {
    let formula = Formula::parse_dimacs_str(THREE_CLAUSES, WeightFormat::Unweighted).unwrap();
    for kind in [MethodKind::Line, MethodKind::Factor, MethodKind::Greedy] {
        let method = kind.build(SingleBagSolver);
        let count = count_with(method.as_ref(), &formula, &PlannerConfig::default());
        // Two models over x1..x3, doubled by the unconstrained x4.
        assert_eq!(count, 4.0, "{kind:?}");
    }
}

#[test]
fn test_weighted_count_matches_enumeration() {
    let text = "p cnf 3 3
w 1 0.3
w 2 0.6
1 2 0
-1 3 0
-2 -3 0
";
    let formula = Formula::parse_dimacs_str(text, WeightFormat::Cachet).unwrap();
    let expected = brute_force_count(&formula);
    let config = PlannerConfig::default().with_seed(3);
    let line = count_with(&LineGraphMethod::new(SingleBagSolver), &formula, &config);
    let factor = count_with(&FactorTreeMethod::new(SingleBagSolver), &formula, &config);
    assert!(approx_eq(line, expected), "{line} != {expected}");
    assert!(approx_eq(factor, expected), "{factor} != {expected}");
}

#[test]
fn test_slicing_keeps_count() {
    let text = "p cnf 5 6
1 2 3 0
-1 -2 4 0
2 -4 5 0
-3 4 -5 0
1 -5 0
-2 3 0
";
    let formula = Formula::parse_dimacs_str(text, WeightFormat::Unweighted).unwrap();
    let expected = brute_force_count(&formula);
    let network = cnf_count(&formula).unwrap();
    let timer = Timer::unbounded("planning");
    let config = PlannerConfig::default()
        .with_slicer(SlicerKind::GreedyMost)
        .with_rank_limit(2);
    let outcome = plan(&FactorTreeMethod::new(SingleBagSolver), &network, &timer, &config).unwrap();

    assert!(outcome.best.maxrank() <= 2);
    assert!(outcome.best.num_slice_groups() > 0);
    let count = NdarrayBackend::new()
        .contract_sliced(&outcome.best, None)
        .unwrap();
    assert!(approx_eq(count, expected), "{count} != {expected}");
}

#[test]
fn test_snapshot_then_execute() {
    let formula = Formula::parse_dimacs_str(THREE_CLAUSES, WeightFormat::Unweighted).unwrap();
    let network = cnf_count(&formula).unwrap();
    let timer = Timer::unbounded("planning");
    let outcome = plan(
        &FactorTreeMethod::new(SingleBagSolver),
        &network,
        &timer,
        &PlannerConfig::default(),
    )
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plan.json");
    writejson(&path, &PlanSnapshot::from_plan(&outcome.best, 0.5)).unwrap();
    let restored = readjson(&path).unwrap();
    assert_eq!(restored.elapsed, 0.5);
    assert_eq!(restored.tree.maxrank(), outcome.best.tree().maxrank());
    assert_eq!(restored.network.len(), outcome.best.network().len());

    let mut plan = restored.into_plan();
    GreedyMemSlicer
        .slice_until(&mut plan, &SliceBounds::new().with_slices(1))
        .unwrap();
    let timer = Timer::unbounded("execution");
    let mut backend = NdarrayBackend::new().with_max_entries(8);
    let count = execute(&mut plan, &mut backend, &mut GreedyMemSlicer, None, &timer).unwrap();
    assert_eq!(count, 4.0);
}

#[test]
fn test_slice_cutoff_limits_work() {
    let formula = Formula::parse_dimacs_str(THREE_CLAUSES, WeightFormat::Unweighted).unwrap();
    let network = cnf_count(&formula).unwrap();
    let timer = Timer::unbounded("planning");
    let mut best = plan(
        &LineGraphMethod::new(SingleBagSolver),
        &network,
        &timer,
        &PlannerConfig::default(),
    )
    .unwrap()
    .best;
    GreedyMemSlicer
        .slice_until(&mut best, &SliceBounds::new().with_slices(2))
        .unwrap();

    let full = NdarrayBackend::new().contract_sliced(&best, None).unwrap();
    let partial = NdarrayBackend::new().contract_sliced(&best, Some(1)).unwrap();
    assert_eq!(full, 4.0);
    assert!(partial <= full);
}
