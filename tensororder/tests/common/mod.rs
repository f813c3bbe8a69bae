//! Shared strategies and reference computations for integration tests.

#![allow(dead_code)]

use proptest::prelude::*;
use tensororder::Formula;

/// Unweighted CNF formulas over 2 to 6 variables with up to 6 clauses of
/// width 1 to 3. Literals within a clause use distinct variables.
pub fn formula() -> impl Strategy<Value = Formula> {
    (2usize..=6).prop_flat_map(|n| {
        let clause = prop::collection::vec((1..=n as i64, any::<bool>()), 1..=3).prop_map(|lits| {
            let mut seen = Vec::new();
            lits.into_iter()
                .filter(|&(v, _)| {
                    let fresh = !seen.contains(&v);
                    seen.push(v);
                    fresh
                })
                .map(|(v, positive)| if positive { v } else { -v })
                .collect::<Vec<i64>>()
        });
        prop::collection::vec(clause, 1..=6)
            .prop_map(move |clauses| Formula::from_clauses(n, clauses).unwrap())
    })
}

/// Weighted model count by enumeration.
pub fn brute_force_count(formula: &Formula) -> f64 {
    let n = formula.num_variables();
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

pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}
