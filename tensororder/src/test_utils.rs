//! Test utilities for validating model counts
//!
//! This module provides random formula generators and a brute-force weighted
//! model counter to check that planned contractions produce correct results.

use rand::seq::index;
use rand::Rng;

use crate::formula::Formula;

/// Generate a random CNF formula
///
/// # Arguments
/// * `num_variables` - Number of variables; some may not occur in any clause
/// * `num_clauses` - Number of clauses
/// * `max_width` - Maximum clause width, capped at `num_variables`
///
/// Literals within a clause use distinct variables. Variable weights are
/// drawn from `{0.25, 0.5, 1.0, 2.0}` so that counts stay exact in `f64`.
pub fn random_cnf<R: Rng + ?Sized>(
    rng: &mut R,
    num_variables: usize,
    num_clauses: usize,
    max_width: usize,
) -> Formula {
    const WEIGHTS: [f64; 4] = [0.25, 0.5, 1.0, 2.0];
    let max_width = max_width.min(num_variables).max(1);

    let mut formula = Formula::new();
    for _ in 0..num_variables {
        let negative = WEIGHTS[rng.random_range(0..WEIGHTS.len())];
        let positive = WEIGHTS[rng.random_range(0..WEIGHTS.len())];
        formula.fresh_variable(negative, positive);
    }
    for _ in 0..num_clauses {
        let width = rng.random_range(1..=max_width);
        let clause = index::sample(rng, num_variables, width)
            .into_iter()
            .map(|v| {
                let var = v as i64 + 1;
                if rng.random_bool(0.5) {
                    var
                } else {
                    -var
                }
            })
            .collect();
        formula.add_clause(clause).unwrap();
    }
    formula
}

/// Weighted model count by enumerating every assignment
///
/// Exponential in the number of variables; keep formulas small.
pub fn brute_force_count(formula: &Formula) -> f64 {
    let n = formula.num_variables();
    assert!(n < 24, "too many variables to enumerate");

    let mut total = 0.0;
    for assignment in 0u32..(1 << n) {
        let value = |var: i64| assignment >> (var - 1) & 1 == 1;
        let satisfied = formula
            .clauses()
            .iter()
            .all(|clause| clause.iter().any(|&l| value(l.abs()) == (l > 0)));
        if satisfied {
            total += (1..=n as i64)
                .map(|var| formula.literal_weight(if value(var) { var } else { -var }))
                .product::<f64>();
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn test_brute_force_small_formulas() {
        let formula = Formula::from_clauses(3, vec![vec![1, 2], vec![-1, 3], vec![-2, -3]]).unwrap();
        assert_eq!(brute_force_count(&formula), 2.0);

        let unsat = Formula::from_clauses(1, vec![vec![1], vec![-1]]).unwrap();
        assert_eq!(brute_force_count(&unsat), 0.0);

        let mut weighted = Formula::new();
        weighted.fresh_variable(0.25, 0.75);
        weighted.add_clause(vec![1]).unwrap();
        assert_eq!(brute_force_count(&weighted), 0.75);
    }

    #[test]
    fn test_random_cnf_shape() {
        let mut rng = SmallRng::seed_from_u64(11);
        let formula = random_cnf(&mut rng, 5, 7, 3);
        assert_eq!(formula.num_variables(), 5);
        assert_eq!(formula.clauses().len(), 7);
        for clause in formula.clauses() {
            assert!((1..=3).contains(&clause.len()));
            let mut vars: Vec<_> = clause.iter().map(|l| l.abs()).collect();
            vars.sort_unstable();
            vars.dedup();
            assert_eq!(vars.len(), clause.len());
        }
    }
}
