//! Planning benchmark on random 3-CNF formulas.
//!
//! Run with: cargo run --release --example benchmark -p tensororder

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Instant;

use rand::rngs::SmallRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tensororder::planning::{plan, PlannerConfig};
use tensororder::{
    cnf_count, ContractionMethod, FactorTreeMethod, Formula, GreedyMethod, LineGraphMethod,
    SingleBagSolver, TensorNetwork, Timer,
};

#[derive(Debug, Serialize)]
struct MethodResult {
    maxrank: usize,
    log2_flops: f64,
    log2_memory: f64,
    avg_ms: f64,
    runs: usize,
}

#[derive(Debug, Serialize)]
struct BenchmarkResult {
    name: String,
    variables: usize,
    clauses: usize,
    tensors: usize,
    edges: usize,
    line: MethodResult,
    factor: MethodResult,
    greedy: MethodResult,
}

fn random_3cnf(rng: &mut SmallRng, num_variables: usize, num_clauses: usize) -> tensororder::Result<Formula> {
    let mut formula = Formula::new();
    for _ in 0..num_variables {
        formula.fresh_variable(1.0, 1.0);
    }
    for _ in 0..num_clauses {
        let clause = index::sample(rng, num_variables, 3)
            .into_iter()
            .map(|v| if rng.random_bool(0.5) { v as i64 + 1 } else { -(v as i64 + 1) })
            .collect();
        formula.add_clause(clause)?;
    }
    Ok(formula)
}

fn benchmark_method(
    method: &dyn ContractionMethod,
    network: &TensorNetwork,
    runs: usize,
) -> Result<MethodResult, Box<dyn std::error::Error>> {
    let config = PlannerConfig::default().with_seed(1);

    // Warmup
    plan(method, network, &Timer::unbounded("planning"), &config)?;

    let start = Instant::now();
    let mut outcome = None;
    for _ in 0..runs {
        outcome = Some(plan(method, network, &Timer::unbounded("planning"), &config)?);
    }
    let elapsed = start.elapsed().as_secs_f64();
    let best = outcome.ok_or("no runs")?.best;

    println!("  Max rank:           {}", best.maxrank());
    println!("  Estimated FLOPs:    2^{:.2}", best.flops().log2());
    println!("  Estimated memory:   2^{:.2}", best.memory().log2());
    println!("  Average per run:    {:.3} ms", elapsed / runs as f64 * 1000.0);
    println!();

    Ok(MethodResult {
        maxrank: best.maxrank(),
        log2_flops: best.flops().log2(),
        log2_memory: best.memory().log2(),
        avg_ms: elapsed / runs as f64 * 1000.0,
        runs,
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!();
    println!("{}", "=".repeat(70));
    println!("tensororder planning benchmark");
    println!("{}", "=".repeat(70));
    println!();

    let results_dir = Path::new("benchmarks/results");
    fs::create_dir_all(results_dir)?;

    let mut rng = SmallRng::seed_from_u64(2024);
    let mut results = Vec::new();
    let instances = [(10, 30, 20), (20, 80, 10), (40, 160, 5), (80, 320, 3)];

    for (variables, clauses, runs) in instances {
        let name = format!("3cnf_{variables}_{clauses}");
        let formula = random_3cnf(&mut rng, variables, clauses)?;
        let network = cnf_count(&formula)?;

        println!("{}", "=".repeat(70));
        println!("Benchmark: {name}");
        println!("  Tensors: {}", network.len());
        println!("  Edges:   {}", network.num_edges());
        println!();

        println!("LineGraphMethod:");
        let line = benchmark_method(&LineGraphMethod::new(SingleBagSolver), &network, runs)?;
        println!("FactorTreeMethod:");
        let factor = benchmark_method(&FactorTreeMethod::new(SingleBagSolver), &network, runs)?;
        println!("GreedyMethod:");
        let greedy = benchmark_method(&GreedyMethod::new(), &network, runs)?;

        results.push(BenchmarkResult {
            name,
            variables,
            clauses,
            tensors: network.len(),
            edges: network.num_edges(),
            line,
            factor,
            greedy,
        });
    }

    // ========== Summary Table ==========
    println!("{}", "=".repeat(70));
    println!("SUMMARY");
    println!("{}", "=".repeat(70));
    println!();
    println!(
        "{:<15} {:>8} {:>8} │ {:>6} {:>6} {:>6} │ {:>9} {:>9} {:>9}",
        "Formula", "Tensors", "Edges", "Line", "Factor", "Greedy", "Line ms", "Factor ms", "Greedy ms"
    );
    println!("{}", "─".repeat(31) + "─┼" + &"─".repeat(21) + "─┼" + &"─".repeat(30));
    for r in &results {
        println!(
            "{:<15} {:>8} {:>8} │ {:>6} {:>6} {:>6} │ {:>9.3} {:>9.3} {:>9.3}",
            r.name,
            r.tensors,
            r.edges,
            r.line.maxrank,
            r.factor.maxrank,
            r.greedy.maxrank,
            r.line.avg_ms,
            r.factor.avg_ms,
            r.greedy.avg_ms
        );
    }
    println!();

    let output = serde_json::json!({
        "results": results.iter().map(|r| (r.name.clone(), r)).collect::<HashMap<_, _>>(),
    });
    let output_path = results_dir.join("planning_results.json");
    fs::write(&output_path, serde_json::to_string_pretty(&output)?)?;

    println!("Results saved to:");
    println!("  {}", output_path.display());

    Ok(())
}
