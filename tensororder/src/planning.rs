//! The planning loop and plan execution.
//!
//! Planning streams candidate trees from a contraction method, keeps the
//! plan with the smallest max rank and stops early once the estimated
//! contraction time of the best plan is below the time already spent.
//! Execution contracts a plan and slices further whenever the backend runs
//! out of memory.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::TensorBackend;
use crate::error::{Error, Result};
use crate::methods::ContractionMethod;
use crate::network::TensorNetwork;
use crate::plan::SlicedExecutionPlan;
use crate::slicers::{SliceBounds, Slicer, SlicerKind};
use crate::snapshot::PlanSnapshot;
use crate::solver::SolverParams;
use crate::timer::Timer;

/// Planning configuration.
///
/// # Example
///
/// ```rust
/// use tensororder::planning::PlannerConfig;
/// use tensororder::slicers::SlicerKind;
///
/// let config = PlannerConfig::default()
///     .with_seed(7)
///     .with_rank_limit(20)
///     .with_slicer(SlicerKind::GreedyMost);
/// assert_eq!(config.bounds.rank, Some(20));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Seed for the decomposition solver and every randomized choice.
    pub seed: u64,
    /// Slice each new best plan with this policy; `None` leaves plans
    /// unsliced.
    pub slicer: Option<SlicerKind>,
    /// Bounds applied when slicing.
    pub bounds: SliceBounds,
    /// Seconds per estimated FLOP. Once a plan is found, the planning
    /// deadline is pulled in to its estimated contraction time.
    pub performance_factor: Option<f64>,
    /// Keep a snapshot of every improving tree.
    pub keep_snapshots: bool,
    /// Ask the solver for every decomposition narrower than this.
    pub print_width_below: usize,
    /// CPU list for the solver process.
    pub affinity: Option<String>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            slicer: None,
            bounds: SliceBounds::default(),
            performance_factor: None,
            keep_snapshots: false,
            print_width_below: 100,
            affinity: None,
        }
    }
}

impl PlannerConfig {
    /// Settings of the full pipeline: stop planning early and slice to a
    /// rank of 30.
    pub fn pipeline() -> Self {
        Self {
            slicer: Some(SlicerKind::GreedyMem),
            bounds: SliceBounds::new().with_rank(30),
            performance_factor: Some(1e-11),
            ..Self::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_slicer(mut self, slicer: SlicerKind) -> Self {
        self.slicer = Some(slicer);
        self
    }

    pub fn with_memory_limit(mut self, entries: f64) -> Self {
        self.bounds.memory = Some(entries);
        self
    }

    pub fn with_rank_limit(mut self, rank: usize) -> Self {
        self.bounds.rank = Some(rank);
        self
    }

    pub fn with_performance_factor(mut self, factor: f64) -> Self {
        self.performance_factor = Some(factor);
        self
    }

    pub fn with_snapshots(mut self) -> Self {
        self.keep_snapshots = true;
        self
    }

    pub fn with_affinity(mut self, affinity: impl Into<String>) -> Self {
        self.affinity = Some(affinity.into());
        self
    }

    fn solver_params(&self) -> SolverParams {
        let params = SolverParams::default()
            .with_seed(self.seed)
            .with_print_width_below(self.print_width_below);
        match &self.affinity {
            Some(cpus) => params.with_affinity(cpus.clone()),
            None => params,
        }
    }
}

/// One observed candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRecord {
    /// Seconds since planning started.
    pub elapsed: f64,
    pub widths: Vec<(String, usize)>,
    pub total_flops: f64,
}

impl PlanRecord {
    fn of(plan: &SlicedExecutionPlan, elapsed: f64) -> Self {
        Self {
            elapsed,
            widths: plan
                .widths()
                .into_iter()
                .map(|(name, width)| (name.to_string(), width))
                .collect(),
            total_flops: plan.total_flops(),
        }
    }
}

/// Result of [`plan`].
#[derive(Debug, Clone)]
pub struct PlanningOutcome {
    /// Plan with the smallest max rank, sliced if a slicer was configured.
    pub best: SlicedExecutionPlan,
    /// Every candidate, in discovery order.
    pub log: Vec<PlanRecord>,
    /// Candidates that improved on the previous best.
    pub improvements: Vec<PlanRecord>,
    /// Snapshot of each improving tree when requested.
    pub snapshots: Vec<PlanSnapshot>,
}

/// Search for a contraction plan of `network` until the method is
/// exhausted or `timer` expires.
///
/// A timeout ends the search and keeps the best plan; it is an error only if
/// no plan was found yet.
pub fn plan(
    method: &dyn ContractionMethod,
    network: &TensorNetwork,
    timer: &Timer,
    config: &PlannerConfig,
) -> Result<PlanningOutcome> {
    let mut slicer = config.slicer.map(|kind| kind.build(config.seed));
    let mut best: Option<SlicedExecutionPlan> = None;
    let mut log = Vec::new();
    let mut improvements = Vec::new();
    let mut snapshots = Vec::new();

    let search = (|| -> Result<()> {
        for candidate in method.contraction_trees(network, &config.solver_params(), timer)? {
            let (tree, factored) = candidate?;
            let elapsed = timer.elapsed().as_secs_f64();
            info!(maxrank = tree.maxrank(), width = ?tree.width(), "found tree");

            if best.as_ref().is_some_and(|b| b.tree().maxrank() <= tree.maxrank()) {
                log.push(PlanRecord::of(&SlicedExecutionPlan::new(tree, factored), elapsed));
                continue;
            }

            if config.keep_snapshots {
                snapshots.push(PlanSnapshot::new(elapsed, tree.clone(), factored.clone()));
            }
            let mut candidate = SlicedExecutionPlan::new(tree, factored);
            let record = PlanRecord::of(&candidate, elapsed);
            log.push(record.clone());
            improvements.push(record);

            if let Some(slicer) = slicer.as_mut() {
                slicer.slice_until(&mut candidate, &config.bounds)?;
            }
            let total_flops = candidate.total_flops();
            best = Some(candidate);
            if let Some(factor) = config.performance_factor {
                debug!(total_flops, "recapping planning time");
                timer.recap_timeout(total_flops * factor)?;
            }
        }
        Ok(())
    })();

    match (search, best) {
        (Ok(()), Some(best)) => Ok(PlanningOutcome {
            best,
            log,
            improvements,
            snapshots,
        }),
        (Err(e), Some(best)) if e.is_timeout() => {
            debug!("planning stopped by timer");
            Ok(PlanningOutcome {
                best,
                log,
                improvements,
                snapshots,
            })
        }
        (Ok(()), None) => Err(Error::Solver("no decomposition was produced".to_string())),
        (Err(e), _) => Err(e),
    }
}

/// Contract `plan`, slicing once more with `slicer` every time the backend
/// runs out of memory. At most `slice_limit` slices are contracted.
pub fn execute<B, S>(
    plan: &mut SlicedExecutionPlan,
    backend: &mut B,
    slicer: &mut S,
    slice_limit: Option<usize>,
    timer: &Timer,
) -> Result<f64>
where
    B: TensorBackend + ?Sized,
    S: Slicer + ?Sized,
{
    loop {
        match backend.contract_sliced_within(plan, slice_limit, timer) {
            Err(e) if e.is_out_of_memory() => {
                warn!(error = %e, memory = plan.memory(), "backend out of memory, slicing further");
                if let Err(slice_error) = slicer.slice_once(plan) {
                    debug!(error = %slice_error, "unable to slice further");
                    return Err(e);
                }
            }
            result => return result,
        }
    }
}
