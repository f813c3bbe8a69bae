//! # tensororder - Contraction Planning for Weighted Model Counting
//!
//! Weighted model counting reduces to contracting a tensor network: every
//! variable becomes a copy tensor, every clause an OR tensor, and the scalar
//! left after contracting every shared index is the weighted count.
//!
//! The cost of a contraction is dominated by the largest intermediate
//! tensor, so the order of the pairwise contractions matters. This crate
//! builds that order from tree decompositions of graphs derived from the
//! network and makes the result fit in memory by slicing.
//!
//! ## Planning
//!
//! A [`ContractionMethod`] turns decompositions from a
//! [`DecompositionSolver`] into [`ContractionTree`]s:
//!
//! | Method | Decomposes | Notes |
//! |--------|------------|-------|
//! | [`LineGraphMethod`] | the line graph | contracts each tensor at the first bag covering its edges |
//! | [`FactorTreeMethod`] | the structure graph | factors tensors so each merge exposes only the edges it needs |
//! | [`GreedyMethod`] | nothing | merges the adjacent pair keeping the fewest edges, no solver needed |
//!
//! [`plan`](planning::plan) consumes candidates until the method is
//! exhausted or the [`Timer`] expires, keeping the plan with the smallest
//! max rank.
//!
//! ```rust
//! use tensororder::planning::{plan, PlannerConfig};
//! use tensororder::{cnf_count, Formula, LineGraphMethod, SingleBagSolver, Timer};
//! use tensororder::{NdarrayBackend, TensorBackend};
//!
//! // (x1 | x2) & (!x1 | x3) & (!x2 | !x3)
//! let formula = Formula::from_clauses(3, vec![vec![1, 2], vec![-1, 3], vec![-2, -3]])?;
//! let network = cnf_count(&formula)?;
//!
//! let timer = Timer::unbounded("planning");
//! let method = LineGraphMethod::new(SingleBagSolver);
//! let outcome = plan(&method, &network, &timer, &PlannerConfig::default())?;
//!
//! let count = NdarrayBackend::new().contract_sliced(&outcome.best, None)?;
//! assert_eq!(count, 2.0);
//! # Ok::<(), tensororder::Error>(())
//! ```
//!
//! ## Slicing
//!
//! Slicing pins a class of equivalent edges to each of its values and sums
//! the independent contractions, trading FLOPs for memory. A
//! [`SlicedExecutionPlan`] tracks the pinned classes and the estimated cost;
//! a [`Slicer`] picks what to pin next.
//!
//! ```rust
//! use tensororder::slicers::{GreedyMemSlicer, SliceBounds, Slicer};
//! use tensororder::{cnf_count, ContractionTree, Formula, SlicedExecutionPlan};
//!
//! let formula = Formula::from_clauses(3, vec![vec![1, 2, 3], vec![-1, -2, -3]])?;
//! let network = cnf_count(&formula)?;
//! let tree = ContractionTree::sequential(&network);
//! let mut plan = SlicedExecutionPlan::new(tree, network);
//!
//! GreedyMemSlicer.slice_until(&mut plan, &SliceBounds::new().with_rank(1))?;
//! assert!(plan.maxrank() <= 1);
//! # Ok::<(), tensororder::Error>(())
//! ```
//!
//! ## Execution
//!
//! [`execute`](planning::execute) contracts a plan with a
//! [`TensorBackend`] and slices further whenever the backend reports
//! [`Error::OutOfMemory`].

pub mod backend;
pub mod constructions;
pub mod contraction_tree;
pub mod decomposition;
pub mod error;
pub mod formula;
pub mod graph;
pub mod methods;
pub mod network;
pub mod plan;
pub mod planning;
pub mod slicers;
pub mod snapshot;
pub mod solver;
pub mod tensor;
pub mod timer;

#[cfg(test)]
pub mod test_utils;

// Re-export main types
pub use backend::{NdarrayBackend, TensorBackend};
pub use constructions::cnf_count;
pub use contraction_tree::{ContractionTree, CostEstimate, NodeId, NodeKind};
pub use decomposition::Decomposition;
pub use error::{Error, Result};
pub use formula::{Formula, WeightFormat};
pub use graph::Graph;
pub use methods::{ContractionMethod, FactorTreeMethod, GreedyMethod, LineGraphMethod, MethodKind};
pub use network::{Connection, Edge, EdgeId, TensorNetwork};
pub use plan::SlicedExecutionPlan;
pub use planning::{execute, plan, PlannerConfig, PlanningOutcome};
pub use slicers::{SliceBounds, Slicer, SlicerKind};
pub use snapshot::PlanSnapshot;
pub use solver::{
    DecompositionSolver, ExternalSolver, FixedDecompositions, SingleBagSolver, SolverKind, SolverParams,
};
pub use tensor::{Tensor, TensorKind};
pub use timer::{Stopwatch, Timer};
