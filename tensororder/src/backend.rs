//! Numeric backends that execute a contraction plan.
//!
//! Planning never touches tensor values; a backend only has to provide
//! allocation, entry assignment and pairwise `tensordot`. Contraction along a
//! tree and summation over slices are provided on top of those.

use ndarray::{Array2, ArrayD, IxDyn};
use tracing::debug;

use crate::contraction_tree::{ContractionTree, NodeId, NodeKind};
use crate::error::{Error, Result};
use crate::network::{EdgeId, TensorNetwork};
use crate::plan::SlicedExecutionPlan;
use crate::timer::Timer;

/// A tensor library able to execute contractions.
///
/// Allocations over the backend's budget must fail with
/// [`Error::OutOfMemory`] so callers can slice further and retry.
pub trait TensorBackend {
    type Tensor;

    /// Allocate a tensor filled with `fill`.
    fn create_tensor(&mut self, shape: &[usize], fill: f64) -> Result<Self::Tensor>;

    fn set_entry(&mut self, tensor: &mut Self::Tensor, index: &[usize], value: f64);

    /// Contract `a` and `b` over the paired axes. The result keeps the
    /// remaining axes of `a` followed by the remaining axes of `b`.
    fn tensordot(
        &mut self,
        a: &Self::Tensor,
        b: &Self::Tensor,
        axes: (&[usize], &[usize]),
    ) -> Result<Self::Tensor>;

    /// Value of a rank-0 tensor.
    fn scalar(&self, tensor: &Self::Tensor) -> Result<f64>;

    /// Bytes per tensor entry.
    fn entry_size(&self) -> usize;

    /// Contract the subtree rooted at `node`, returning the result and the
    /// edge carried by each of its dimensions.
    fn contract_subtree(
        &mut self,
        network: &TensorNetwork,
        tree: &ContractionTree,
        node: NodeId,
    ) -> Result<(Self::Tensor, Vec<Option<EdgeId>>)> {
        let mut stack: Vec<(Self::Tensor, Vec<Option<EdgeId>>)> = Vec::new();
        for id in tree.postorder_from(node) {
            match tree.node(id).kind() {
                NodeKind::Leaf { tensor } => {
                    let built = network.tensor(tensor)?.build(self)?;
                    stack.push((built, network.index_list(tensor).to_vec()));
                }
                NodeKind::Join { .. } => {
                    let (Some((right, right_edges)), Some((left, left_edges))) =
                        (stack.pop(), stack.pop())
                    else {
                        return Err(Error::IncompleteTree);
                    };
                    let mut left_axes = Vec::new();
                    let mut right_axes = Vec::new();
                    for (i, edge) in left_edges.iter().enumerate() {
                        if edge.is_none() {
                            continue;
                        }
                        if let Some(j) = right_edges.iter().position(|r| r == edge) {
                            left_axes.push(i);
                            right_axes.push(j);
                        }
                    }
                    let result = self.tensordot(&left, &right, (&left_axes, &right_axes))?;
                    let edges = left_edges
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| !left_axes.contains(i))
                        .chain(
                            right_edges
                                .iter()
                                .enumerate()
                                .filter(|(j, _)| !right_axes.contains(j)),
                        )
                        .map(|(_, e)| *e)
                        .collect();
                    stack.push((result, edges));
                }
            }
        }
        stack.pop().ok_or(Error::IncompleteTree)
    }

    /// Contract a whole network along `tree`.
    fn contract(&mut self, network: &TensorNetwork, tree: &ContractionTree) -> Result<Self::Tensor> {
        if !tree.is_complete(network) {
            return Err(Error::IncompleteTree);
        }
        match tree.root() {
            None => self.create_tensor(&[], 1.0),
            Some(root) => Ok(self.contract_subtree(network, tree, root)?.0),
        }
    }

    /// Contract every slice of `plan` and sum the scalar results. At most
    /// `slice_limit` slices are contracted when a limit is given.
    fn contract_sliced(&mut self, plan: &SlicedExecutionPlan, slice_limit: Option<usize>) -> Result<f64> {
        self.contract_sliced_within(plan, slice_limit, &Timer::unbounded("execution"))
    }

    /// As [`contract_sliced`](Self::contract_sliced), checking `timer`
    /// before each slice.
    fn contract_sliced_within(
        &mut self,
        plan: &SlicedExecutionPlan,
        slice_limit: Option<usize>,
        timer: &Timer,
    ) -> Result<f64> {
        let slices = plan
            .network()
            .slice_groups(plan.groups_to_slice())?
            .take(slice_limit.unwrap_or(usize::MAX));
        let mut total = 0.0;
        for (i, slice) in slices.enumerate() {
            timer.check()?;
            let result = self.contract(&slice, plan.tree())?;
            total += self.scalar(&result)?;
            debug!(slice = i, partial = total, "contracted slice");
        }
        Ok(total)
    }
}

/// Dense `f64` backend on `ndarray`.
#[derive(Debug, Clone, Default)]
pub struct NdarrayBackend {
    max_entries: Option<usize>,
}

impl NdarrayBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse tensors with more than `max_entries` entries.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    /// Budget from a byte limit.
    pub fn with_memory_limit(self, bytes: usize) -> Self {
        let entries = bytes / std::mem::size_of::<f64>();
        self.with_max_entries(entries)
    }

    fn reserve(&self, entries: usize) -> Result<()> {
        match self.max_entries {
            Some(limit) if entries > limit => Err(Error::OutOfMemory {
                requested: entries,
                limit,
            }),
            _ => Ok(()),
        }
    }
}

impl TensorBackend for NdarrayBackend {
    type Tensor = ArrayD<f64>;

    fn create_tensor(&mut self, shape: &[usize], fill: f64) -> Result<ArrayD<f64>> {
        self.reserve(shape.iter().product())?;
        Ok(ArrayD::from_elem(IxDyn(shape), fill))
    }

    fn set_entry(&mut self, tensor: &mut ArrayD<f64>, index: &[usize], value: f64) {
        tensor[IxDyn(index)] = value;
    }

    fn tensordot(
        &mut self,
        a: &ArrayD<f64>,
        b: &ArrayD<f64>,
        (a_axes, b_axes): (&[usize], &[usize]),
    ) -> Result<ArrayD<f64>> {
        if a_axes.len() != b_axes.len()
            || a_axes
                .iter()
                .zip(b_axes)
                .any(|(&i, &j)| a.shape()[i] != b.shape()[j])
        {
            return Err(ndarray::ShapeError::from_kind(ndarray::ErrorKind::IncompatibleShape).into());
        }
        let a_free: Vec<usize> = (0..a.ndim()).filter(|i| !a_axes.contains(i)).collect();
        let b_free: Vec<usize> = (0..b.ndim()).filter(|j| !b_axes.contains(j)).collect();

        let out_shape: Vec<usize> = a_free
            .iter()
            .map(|&i| a.shape()[i])
            .chain(b_free.iter().map(|&j| b.shape()[j]))
            .collect();
        self.reserve(out_shape.iter().product())?;

        let m: usize = a_free.iter().map(|&i| a.shape()[i]).product();
        let k: usize = a_axes.iter().map(|&i| a.shape()[i]).product();
        let n: usize = b_free.iter().map(|&j| b.shape()[j]).product();

        let a_order: Vec<usize> = a_free.iter().chain(a_axes).copied().collect();
        let b_order: Vec<usize> = b_axes.iter().chain(&b_free).copied().collect();
        let a2 = Array2::from_shape_vec(
            (m, k),
            a.view().permuted_axes(IxDyn(&a_order)).iter().copied().collect(),
        )?;
        let b2 = Array2::from_shape_vec(
            (k, n),
            b.view().permuted_axes(IxDyn(&b_order)).iter().copied().collect(),
        )?;
        let product = a2.dot(&b2);
        Ok(ArrayD::from_shape_vec(
            IxDyn(&out_shape),
            product.iter().copied().collect(),
        )?)
    }

    fn scalar(&self, tensor: &ArrayD<f64>) -> Result<f64> {
        if tensor.ndim() == 0 {
            Ok(tensor[IxDyn(&[])])
        } else {
            Err(Error::NonScalarResult {
                rank: tensor.ndim(),
            })
        }
    }

    fn entry_size(&self) -> usize {
        std::mem::size_of::<f64>()
    }
}
