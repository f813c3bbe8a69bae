//! Tensor values of a Boolean-encoded network.
//!
//! Clause and variable tensors are described by a rule instead of stored
//! entries; their dense values are materialized on first use and cached.

use std::cell::OnceCell;

use ndarray::{ArrayD, Dimension, IxDyn};
use serde::{Deserialize, Serialize};

use crate::backend::TensorBackend;
use crate::error::{Error, Result};

/// The closed set of tensor variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TensorKind {
    /// Clause indicator over literals. Each dimension has size 2 and a
    /// literal is satisfied when its index equals its polarity.
    ///
    /// Without `output` the entry is 1 iff some literal is satisfied.
    /// With `output` the entry is 1 iff that literal equals the disjunction
    /// of the remaining literals.
    Or {
        literals: Vec<bool>,
        output: Option<usize>,
    },
    /// Copy tensor: `negative` on the all-zero index, `positive` on the
    /// all-one index, 0 elsewhere. Rank 0 holds `negative + positive`.
    Variable {
        rank: usize,
        positive: f64,
        negative: f64,
    },
    /// View of `parent` with some dimensions pinned to a constant.
    /// `pins[d]` is `Some(value)` when dimension `d` of the parent is pinned.
    Sliced {
        parent: Box<TensorKind>,
        pins: Vec<Option<usize>>,
    },
    /// Explicit entries, produced by pre-contraction.
    Dense(ArrayD<f64>),
}

impl TensorKind {
    fn name(&self) -> &'static str {
        match self {
            TensorKind::Or { .. } => "or",
            TensorKind::Variable { .. } => "variable",
            TensorKind::Sliced { .. } => "sliced",
            TensorKind::Dense(_) => "dense",
        }
    }

    fn shape(&self) -> Vec<usize> {
        match self {
            TensorKind::Or { literals, .. } => vec![2; literals.len()],
            TensorKind::Variable { rank, .. } => vec![2; *rank],
            TensorKind::Sliced { parent, pins } => parent
                .shape()
                .into_iter()
                .zip(pins)
                .filter(|(_, pin)| pin.is_none())
                .map(|(size, _)| size)
                .collect(),
            TensorKind::Dense(data) => data.shape().to_vec(),
        }
    }

    fn entry(&self, index: &[usize]) -> f64 {
        match self {
            TensorKind::Or { literals, output } => {
                let satisfied = |d: usize| (index[d] == 1) == literals[d];
                match *output {
                    None => indicator((0..literals.len()).any(satisfied)),
                    Some(o) => {
                        let rest = (0..literals.len()).filter(|&d| d != o).any(satisfied);
                        indicator(satisfied(o) == rest)
                    }
                }
            }
            TensorKind::Variable {
                rank,
                positive,
                negative,
            } => {
                if *rank == 0 {
                    negative + positive
                } else if index.iter().all(|&i| i == 0) {
                    *negative
                } else if index.iter().all(|&i| i == 1) {
                    *positive
                } else {
                    0.0
                }
            }
            TensorKind::Sliced { parent, pins } => {
                let mut kept = index.iter();
                let full: Vec<usize> = pins
                    .iter()
                    .map(|pin| match pin {
                        Some(value) => *value,
                        None => kept.next().copied().unwrap_or(0),
                    })
                    .collect();
                parent.entry(&full)
            }
            TensorKind::Dense(data) => data[IxDyn(index)],
        }
    }

    fn is_diagonal(&self) -> bool {
        match self {
            TensorKind::Variable { .. } => true,
            TensorKind::Sliced { parent, .. } => parent.is_diagonal(),
            _ => false,
        }
    }
}

fn indicator(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// An immutable tensor node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tensor {
    kind: TensorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(skip)]
    cache: OnceCell<ArrayD<f64>>,
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.label == other.label
    }
}

impl From<TensorKind> for Tensor {
    fn from(kind: TensorKind) -> Self {
        Self {
            kind,
            label: None,
            cache: OnceCell::new(),
        }
    }
}

impl Tensor {
    /// Clause tensor with no output dimension.
    pub fn or(literals: Vec<bool>) -> Self {
        TensorKind::Or {
            literals,
            output: None,
        }
        .into()
    }

    /// Clause tensor whose `output` literal carries the disjunction of the rest.
    pub fn or_with_output(literals: Vec<bool>, output: usize) -> Self {
        assert!(output < literals.len(), "output index out of range");
        TensorKind::Or {
            literals,
            output: Some(output),
        }
        .into()
    }

    /// Weighted copy tensor of a variable.
    pub fn variable(rank: usize, positive: f64, negative: f64) -> Self {
        TensorKind::Variable {
            rank,
            positive,
            negative,
        }
        .into()
    }

    pub fn dense(data: ArrayD<f64>) -> Self {
        TensorKind::Dense(data).into()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn kind(&self) -> &TensorKind {
        &self.kind
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.kind.shape()
    }

    pub fn rank(&self) -> usize {
        match &self.kind {
            TensorKind::Or { literals, .. } => literals.len(),
            TensorKind::Variable { rank, .. } => *rank,
            TensorKind::Sliced { pins, .. } => pins.iter().filter(|p| p.is_none()).count(),
            TensorKind::Dense(data) => data.ndim(),
        }
    }

    /// Whether every edge through this tensor carries the same logical value.
    pub fn is_diagonal(&self) -> bool {
        self.kind.is_diagonal()
    }

    /// A single entry, evaluated from the construction rule.
    pub fn entry(&self, index: &[usize]) -> f64 {
        debug_assert_eq!(index.len(), self.rank());
        self.kind.entry(index)
    }

    /// Dense values, materialized once and cached.
    pub fn values(&self) -> &ArrayD<f64> {
        if let TensorKind::Dense(data) = &self.kind {
            return data;
        }
        self.cache.get_or_init(|| {
            ArrayD::from_shape_fn(IxDyn(&self.shape()), |ix| self.kind.entry(ix.slice()))
        })
    }

    /// Materialize this tensor inside a numeric backend.
    pub fn build<B: TensorBackend + ?Sized>(&self, backend: &mut B) -> Result<B::Tensor> {
        let values = self.values();
        let mut result = backend.create_tensor(values.shape(), 0.0)?;
        for (index, &value) in values.indexed_iter() {
            if value != 0.0 {
                backend.set_entry(&mut result, index.slice(), value);
            }
        }
        Ok(result)
    }

    /// Pin dimensions of this tensor. `pins` pairs a dimension of this
    /// tensor with the value it is fixed to; pinned dimensions disappear.
    pub fn slice(&self, pins: &[(usize, usize)]) -> Tensor {
        if pins.is_empty() {
            return self.clone();
        }
        let (parent, mut full) = match &self.kind {
            TensorKind::Sliced { parent, pins } => (parent.clone(), pins.clone()),
            other => (Box::new(other.clone()), vec![None; self.rank()]),
        };
        let free_positions: Vec<usize> = full
            .iter()
            .enumerate()
            .filter(|(_, pin)| pin.is_none())
            .map(|(d, _)| d)
            .collect();
        for &(dim, value) in pins {
            full[free_positions[dim]] = Some(value);
        }
        Tensor {
            kind: TensorKind::Sliced { parent, pins: full },
            label: self.label.clone(),
            cache: OnceCell::new(),
        }
    }

    /// Split into two tensors joined by one new trailing dimension.
    ///
    /// The first result takes dimensions `left` (in order) followed by the new
    /// one, the second takes `right` followed by the new one. Contracting the
    /// two over the new dimension reproduces this tensor. An OR tensor whose
    /// output dimension is on neither side cannot be factored.
    ///
    /// # Panics
    /// If `left` and `right` together do not name as many dimensions as the
    /// tensor has.
    pub fn factor_components(&self, left: &[usize], right: &[usize]) -> Result<(Tensor, Tensor)> {
        assert_eq!(
            left.len() + right.len(),
            self.rank(),
            "factor indices must partition the tensor dimensions"
        );
        match &self.kind {
            TensorKind::Or { literals, output } => {
                let mut left_literals: Vec<bool> = left.iter().map(|&d| literals[d]).collect();
                let mut right_literals: Vec<bool> = right.iter().map(|&d| literals[d]).collect();
                left_literals.push(true);
                right_literals.push(true);
                let left_last = left_literals.len() - 1;
                let right_last = right_literals.len() - 1;

                let pair = match *output {
                    None => (
                        Tensor::or_with_output(left_literals, left_last),
                        Tensor::or(right_literals),
                    ),
                    Some(o) => {
                        if let Some(pos) = left.iter().position(|&d| d == o) {
                            (
                                Tensor::or_with_output(left_literals, pos),
                                Tensor::or_with_output(right_literals, right_last),
                            )
                        } else {
                            let pos = right.iter().position(|&d| d == o).ok_or(
                                Error::UnsupportedFactoring {
                                    kind: self.kind.name(),
                                },
                            )?;
                            (
                                Tensor::or_with_output(left_literals, left_last),
                                Tensor::or_with_output(right_literals, pos),
                            )
                        }
                    }
                };
                Ok(pair)
            }
            TensorKind::Variable {
                positive, negative, ..
            } => Ok((
                Tensor::variable(left.len() + 1, *positive, *negative),
                Tensor::variable(right.len() + 1, 1.0, 1.0),
            )),
            other => Err(Error::UnsupportedFactoring { kind: other.name() }),
        }
    }
}
