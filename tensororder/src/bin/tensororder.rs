//! Command-line front end: plan, slice and contract weighted model counts.
//!
//! Results are printed to stdout as `Key: value` lines. A failure in any
//! phase prints `Error: <reason>` and still exits successfully so batch
//! drivers can parse the reason.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use tensororder::planning::{execute, plan, PlannerConfig};
use tensororder::snapshot::{readjson, writejson, PlanSnapshot};
use tensororder::{
    cnf_count, Formula, MethodKind, NdarrayBackend, SliceBounds, SlicedExecutionPlan, SlicerKind,
    SolverKind, Stopwatch, TensorBackend, Timer, WeightFormat,
};

#[derive(Parser)]
#[command(name = "tensororder")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Search for a contraction tree and report its widths
    Plan {
        #[command(flatten)]
        input: FormulaArgs,
        #[command(flatten)]
        planning: PlanningArgs,
    },
    /// Slice a stored plan to the given limits and report its cost
    Slice {
        /// Snapshot written by `plan --store`
        snapshot: PathBuf,
        #[command(flatten)]
        slicing: SlicingArgs,
    },
    /// Slice and contract a stored plan
    Execute {
        /// Snapshot written by `plan --store`
        snapshot: PathBuf,
        #[command(flatten)]
        slicing: SlicingArgs,
        #[command(flatten)]
        execution: ExecutionArgs,
    },
    /// Plan, slice and contract a formula
    Run {
        #[command(flatten)]
        input: FormulaArgs,
        #[command(flatten)]
        planning: PlanningArgs,
        #[command(flatten)]
        slicing: SlicingArgs,
        #[command(flatten)]
        execution: ExecutionArgs,
    },
}

#[derive(Args)]
struct FormulaArgs {
    /// DIMACS CNF file
    formula: PathBuf,

    /// Weight format of the formula
    #[arg(long, value_enum, default_value_t = WeightFormat::Unweighted)]
    weights: WeightFormat,
}

#[derive(Args)]
struct PlanningArgs {
    /// Total time budget in seconds
    #[arg(long)]
    timeout: Option<f64>,

    /// Seed for the solver and every randomized choice
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Contraction method
    #[arg(long, value_enum, default_value_t = MethodKind::Line)]
    planner: MethodKind,

    /// Decomposition solver
    #[arg(long, value_enum, default_value_t = SolverKind::SingleBag)]
    solver: SolverKind,

    /// Solver program (classpath for Tamaki)
    #[arg(long)]
    solver_path: Option<String>,

    /// Run the solver pinned to these CPUs
    #[arg(long)]
    affinity: Option<String>,

    /// Seconds per estimated FLOP used to stop planning early
    #[arg(long, default_value_t = 1e-11)]
    performance_factor: f64,

    /// Write the best plan to this JSON file
    #[arg(long)]
    store: Option<PathBuf>,
}

#[derive(Args)]
struct SlicingArgs {
    /// Memory limit in bytes
    #[arg(long)]
    mem_limit: Option<f64>,

    /// Largest rank of any intermediate tensor
    #[arg(long, default_value_t = 30)]
    rank_limit: usize,

    /// Minimum number of sliced edge groups
    #[arg(long)]
    min_slices: Option<usize>,

    /// Slicing policy
    #[arg(long, value_enum, default_value_t = SlicerKind::GreedyMem)]
    slicer: SlicerKind,

    /// Contract subtrees below this rank once before slicing the rest
    #[arg(long)]
    contract_small: Option<usize>,
}

#[derive(Args)]
struct ExecutionArgs {
    /// Contract at most this many slices
    #[arg(long)]
    slice_cutoff: Option<usize>,

    /// Time budget in seconds for contracting a stored plan
    #[arg(long)]
    execution_timeout: Option<f64>,
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env("TENSORORDER_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Plan { input, planning } => {
            let mut stopwatch = Stopwatch::new();
            let Some(network) = phase("parsing", load_network(&input)) else {
                return Ok(());
            };
            stopwatch.record_interval("Construction");
            let timer = Timer::new("planning", budget(planning.timeout)?);
            let config = planner_config(&planning, None);
            let Some(outcome) = phase("planning", planned(&planning, &network, &timer, &config)) else {
                return Ok(());
            };
            stopwatch.record_interval("Planning");
            print_pairs(outcome.best.widths());
            if let Some(path) = &planning.store {
                store(path, &outcome.best, timer.elapsed())?;
            }
            stopwatch.record_total("Total");
            print_times(&stopwatch);
        }
        Command::Slice { snapshot, slicing } => {
            let Some(mut plan) = phase("loading", load_plan(&snapshot)) else {
                return Ok(());
            };
            let backend = NdarrayBackend::new();
            if phase("slicing", slice(&mut plan, &slicing, 0, backend.entry_size())).is_none() {
                return Ok(());
            }
            print_pairs(plan.widths());
            print_pairs(plan.report_statistics());
        }
        Command::Execute {
            snapshot,
            slicing,
            execution,
        } => {
            let mut stopwatch = Stopwatch::new();
            let Some(mut plan) = phase("loading", load_plan(&snapshot)) else {
                return Ok(());
            };
            let timer = Timer::new("execution", budget(execution.execution_timeout)?);
            run_execution(&mut plan, &slicing, &execution, 0, &timer, &mut stopwatch);
            stopwatch.record_total("Total");
            print_times(&stopwatch);
        }
        Command::Run {
            input,
            planning,
            slicing,
            execution,
        } => {
            let mut stopwatch = Stopwatch::new();
            let Some(network) = phase("parsing", load_network(&input)) else {
                return Ok(());
            };
            stopwatch.record_interval("Construction");

            let total = budget(planning.timeout)?;
            let timer = Timer::new("planning", total);
            let config = planner_config(&planning, Some(&slicing));
            let Some(outcome) = phase("planning", planned(&planning, &network, &timer, &config)) else {
                return Ok(());
            };
            stopwatch.record_interval("Planning");
            print_pairs(outcome.best.widths());
            if let Some(path) = &planning.store {
                store(path, &outcome.best, timer.elapsed())?;
            }

            // Execution gets whatever is left of the total budget.
            let remaining = total.map(|t| t.saturating_sub(stopwatch.elapsed()));
            let timer = Timer::new("execution", remaining);
            let mut plan = outcome.best;
            run_execution(&mut plan, &slicing, &execution, planning.seed, &timer, &mut stopwatch);
            stopwatch.record_total("Total");
            print_times(&stopwatch);
        }
    }
    Ok(())
}

fn load_network(input: &FormulaArgs) -> tensororder::Result<tensororder::TensorNetwork> {
    let file = File::open(&input.formula)?;
    let formula = Formula::parse_dimacs(BufReader::new(file), input.weights)?;
    cnf_count(&formula)
}

fn load_plan(path: &Path) -> tensororder::Result<SlicedExecutionPlan> {
    readjson(path).map(PlanSnapshot::into_plan)
}

fn budget(seconds: Option<f64>) -> anyhow::Result<Option<Duration>> {
    seconds
        .map(|s| Duration::try_from_secs_f64(s).with_context(|| format!("invalid timeout {s}")))
        .transpose()
}

fn store(path: &Path, plan: &SlicedExecutionPlan, elapsed: Duration) -> anyhow::Result<()> {
    let snapshot = PlanSnapshot::from_plan(plan, elapsed.as_secs_f64());
    writejson(path, &snapshot).with_context(|| format!("writing plan {}", path.display()))
}

fn planner_config(planning: &PlanningArgs, slicing: Option<&SlicingArgs>) -> PlannerConfig {
    let mut config = PlannerConfig::default()
        .with_seed(planning.seed)
        .with_performance_factor(planning.performance_factor);
    if let Some(cpus) = &planning.affinity {
        config = config.with_affinity(cpus.clone());
    }
    if let Some(slicing) = slicing {
        config = config
            .with_slicer(slicing.slicer)
            .with_rank_limit(slicing.rank_limit);
        if let Some(bytes) = slicing.mem_limit {
            config = config.with_memory_limit(bytes / NdarrayBackend::new().entry_size() as f64);
        }
    }
    config
}

fn planned(
    planning: &PlanningArgs,
    network: &tensororder::TensorNetwork,
    timer: &Timer,
    config: &PlannerConfig,
) -> tensororder::Result<tensororder::PlanningOutcome> {
    let solver = planning.solver.build(planning.solver_path.as_deref());
    let method = planning.planner.build(solver);
    plan(method.as_ref(), network, timer, config)
}

fn slice(
    plan: &mut SlicedExecutionPlan,
    slicing: &SlicingArgs,
    seed: u64,
    entry_size: usize,
) -> tensororder::Result<()> {
    let mut bounds = SliceBounds::new().with_rank(slicing.rank_limit);
    if let Some(bytes) = slicing.mem_limit {
        bounds = bounds.with_memory(bytes / entry_size as f64);
    }
    if let Some(slices) = slicing.min_slices {
        bounds = bounds.with_slices(slices);
    }
    slicing.slicer.build(seed).slice_until(plan, &bounds)?;
    if let Some(threshold) = slicing.contract_small {
        plan.contract_small(threshold)?;
    }
    Ok(())
}

fn run_execution(
    plan: &mut SlicedExecutionPlan,
    slicing: &SlicingArgs,
    execution: &ExecutionArgs,
    seed: u64,
    timer: &Timer,
    stopwatch: &mut Stopwatch,
) {
    let mut backend = NdarrayBackend::new();
    if let Some(bytes) = slicing.mem_limit {
        backend = backend.with_memory_limit(bytes as usize);
    }
    if phase("slicing", slice(plan, slicing, seed, backend.entry_size())).is_none() {
        return;
    }
    stopwatch.record_interval("Slicing");
    print_pairs(plan.report_statistics());

    let mut slicer = slicing.slicer.build(seed);
    let count = execute(plan, &mut backend, &mut slicer, execution.slice_cutoff, timer);
    if let Some(count) = phase("execution", count) {
        stopwatch.record_interval("Execution");
        println!("Count: {count}");
    }
}

/// Unwrap a phase result, reporting a failure as an `Error:` line.
fn phase<T>(name: &str, result: tensororder::Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            error!(phase = name, error = %e, "phase failed");
            println!("Error: {}", e.key(name));
            None
        }
    }
}

fn print_pairs<K: std::fmt::Display, V: std::fmt::Display>(pairs: Vec<(K, V)>) {
    for (key, value) in pairs {
        println!("{key}: {value}");
    }
}

fn print_times(stopwatch: &Stopwatch) {
    for (name, duration) in stopwatch.records() {
        println!("{name} Time: {:.3}", duration.as_secs_f64());
    }
}
