//! Contraction methods: turn decompositions into contraction trees.
//!
//! A method asks a [`DecompositionSolver`] for decompositions of a graph
//! derived from the network and converts each into a [`ContractionTree`].
//! [`GreedyMethod`] needs no solver and merges tensors pairwise instead.
//! Candidates are produced lazily; dropping the iterator stops the solver.

mod factor_tree;
mod greedy;
mod line_graph;

pub use factor_tree::{factor_tree, FactorTreeMethod};
pub use greedy::{greedy_tree, GreedyMethod};
pub use line_graph::{line_graph_tree, LineGraphMethod};

use serde::{Deserialize, Serialize};

use crate::contraction_tree::ContractionTree;
use crate::decomposition::Decomposition;
use crate::error::{Error, Result};
use crate::network::TensorNetwork;
use crate::solver::{DecompositionSolver, SolverParams};
use crate::timer::Timer;

/// A candidate tree with the network it contracts. Methods that factor
/// tensors return a modified copy of the input network.
pub type Candidate = (ContractionTree, TensorNetwork);

/// Boxed stream of candidates.
pub type Candidates<'a> = Box<dyn Iterator<Item = Result<Candidate>> + 'a>;

/// Strategy producing contraction trees for a network.
pub trait ContractionMethod {
    /// Stream candidate trees for `network`, each tagged with the width of
    /// the decomposition it came from.
    fn contraction_trees<'a>(
        &'a self,
        network: &'a TensorNetwork,
        params: &SolverParams,
        timer: &'a Timer,
    ) -> Result<Candidates<'a>>;
}

impl<M: ContractionMethod + ?Sized> ContractionMethod for Box<M> {
    fn contraction_trees<'a>(
        &'a self,
        network: &'a TensorNetwork,
        params: &SolverParams,
        timer: &'a Timer,
    ) -> Result<Candidates<'a>> {
        (**self).contraction_trees(network, params, timer)
    }
}

/// Contraction method selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    /// Decompose the line graph.
    #[default]
    Line,
    /// Decompose the structure graph and factor tensors along the tree.
    Factor,
    /// Merge adjacent tensors greedily; the solver is not used.
    Greedy,
}

impl MethodKind {
    pub fn build<'s, S>(self, solver: S) -> Box<dyn ContractionMethod + 's>
    where
        S: DecompositionSolver + 's,
    {
        match self {
            MethodKind::Line => Box::new(LineGraphMethod::new(solver)),
            MethodKind::Factor => Box::new(FactorTreeMethod::new(solver)),
            MethodKind::Greedy => Box::new(GreedyMethod::new()),
        }
    }
}

/// Structural checks every decomposition passes before conversion.
fn validate(decomposition: &Decomposition) -> Result<()> {
    if !decomposition.is_tree() {
        return Err(Error::NotATree);
    }
    Ok(())
}
