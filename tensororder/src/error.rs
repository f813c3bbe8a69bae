//! Error type shared by planning, slicing and execution.

use crate::network::EdgeId;

/// Errors raised while building, planning or executing a tensor network.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The wall-clock budget of a phase ran out.
    #[error("timeout during {phase}")]
    Timeout {
        /// Phase that was running when the budget expired.
        phase: String,
    },

    /// A numeric backend refused an allocation over its entry budget.
    #[error("out of memory: a tensor of {requested} entries exceeds the limit of {limit}")]
    OutOfMemory {
        /// Entries in the tensor that could not be allocated.
        requested: usize,
        /// Entry budget of the backend.
        limit: usize,
    },

    /// A decomposition read from a solver violated its own framing.
    #[error("malformed decomposition (line {line}): {reason}")]
    MalformedDecomposition {
        /// 1-based line number in the solver stream, 0 when unknown.
        line: usize,
        /// What was wrong.
        reason: String,
    },

    /// The decomposition edges do not form a tree.
    #[error("decomposition is not a tree")]
    NotATree,

    /// The leaves of a contraction tree do not partition the network.
    #[error("contraction tree does not partition the tensor network")]
    IncompleteTree,

    /// A connection between tensor dimensions was rejected.
    #[error("invalid connection: {0}")]
    InvalidConnection(String),

    /// A tensor index outside the network.
    #[error("unknown tensor {0}")]
    UnknownTensor(usize),

    /// An edge id that is not (or no longer) part of the network.
    #[error("unknown edge {0}")]
    UnknownEdge(EdgeId),

    /// The tensor kind has no factoring rule.
    #[error("{kind} tensors cannot be factored")]
    UnsupportedFactoring {
        /// Kind of the tensor that was asked to factor.
        kind: &'static str,
    },

    /// Slicing was requested from a disabled slicer.
    #[error("slicing is disabled: {0}")]
    SlicingDisabled(String),

    /// Every edge that could shrink the plan is already sliced.
    #[error("no edge is left to slice")]
    NothingToSlice,

    /// More slice groups than slices can be numbered.
    #[error("{groups} slice groups cannot be enumerated")]
    TooManySlices {
        /// Number of groups requested.
        groups: usize,
    },

    /// The plan was pre-contracted and can no longer be sliced.
    #[error("plan has been pre-contracted; slicing must happen first")]
    SlicingFinalized,

    /// A contraction produced a tensor where a scalar was expected.
    #[error("contraction left a tensor of rank {rank} instead of a scalar")]
    NonScalarResult {
        /// Rank of the leftover tensor.
        rank: usize,
    },

    /// A weighted CNF could not be parsed.
    #[error("formula parse error (line {line}): {reason}")]
    Formula {
        /// 1-based line number, 0 for clauses not read from a file.
        line: usize,
        /// What was wrong.
        reason: String,
    },

    /// A decomposition solver could not be launched or driven.
    #[error("decomposition solver failed: {0}")]
    Solver(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Array shape mismatch inside a numeric backend.
    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn timeout(phase: impl Into<String>) -> Self {
        Error::Timeout {
            phase: phase.into(),
        }
    }

    pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Error::MalformedDecomposition {
            line,
            reason: reason.into(),
        }
    }

    /// True for a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// True for an out-of-memory condition raised by a backend.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Error::OutOfMemory { .. })
    }

    /// The `Error: <reason>` value reported for a failure in `phase`.
    ///
    /// Batch tooling keys on these strings to tell timeouts, memouts and
    /// crashes apart.
    pub fn key(&self, phase: &str) -> String {
        match self {
            Error::Timeout { .. } => format!("Timeout during {phase}"),
            Error::OutOfMemory { .. } => format!("Out of Memory during {phase}"),
            _ => format!("Exception during {phase}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_keys() {
        assert_eq!(
            Error::timeout("planning").key("planning"),
            "Timeout during planning"
        );
        let oom = Error::OutOfMemory {
            requested: 64,
            limit: 8,
        };
        assert!(oom.is_out_of_memory());
        assert_eq!(oom.key("execution"), "Out of Memory during execution");
        assert_eq!(Error::NotATree.key("planning"), "Exception during planning");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_timeout());
    }
}
