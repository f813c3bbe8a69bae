//! Reductions from counting problems to tensor networks.

use tracing::debug;

use crate::error::{Error, Result};
use crate::formula::Formula;
use crate::network::TensorNetwork;
use crate::tensor::Tensor;

/// Weighted model counting network of a CNF formula.
///
/// Each variable becomes a copy tensor with one dimension per occurrence,
/// weighted by its literal weights; each clause becomes an OR tensor whose
/// dimensions connect to unused dimensions of its variables. Contracting
/// the network yields the weighted model count.
pub fn cnf_count(formula: &Formula) -> Result<TensorNetwork> {
    let mut occurrences = vec![0usize; formula.num_variables()];
    for clause in formula.clauses() {
        for literal in clause {
            let var = literal.unsigned_abs() as usize;
            match var.checked_sub(1).and_then(|v| occurrences.get_mut(v)) {
                Some(count) => *count += 1,
                None => {
                    return Err(Error::Formula {
                        line: 0,
                        reason: format!("literal {literal} names no variable of the formula"),
                    })
                }
            }
        }
    }

    let mut network = TensorNetwork::new();
    let mut free_dims: Vec<Vec<_>> = occurrences
        .iter()
        .enumerate()
        .map(|(v, &count)| {
            let var = v as i64 + 1;
            network.add_node(
                Tensor::variable(count, formula.literal_weight(var), formula.literal_weight(-var))
                    .with_label(format!("x{var}")),
            )
        })
        .collect();

    for clause in formula.clauses() {
        let polarities = clause.iter().map(|&l| l > 0).collect();
        let dims = network.add_node(Tensor::or(polarities).with_label("or"));
        for (dim, literal) in dims.into_iter().zip(clause) {
            let var = literal.unsigned_abs() as usize - 1;
            if let Some(var_dim) = free_dims[var].pop() {
                network.connect(dim, var_dim)?;
            }
        }
    }
    debug!(
        variables = formula.num_variables(),
        clauses = formula.clauses().len(),
        tensors = network.len(),
        edges = network.num_edges(),
        "reduced formula to tensor network"
    );
    Ok(network)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::WeightFormat;
    use ndarray::IxDyn;

    fn count(text: &str, format: WeightFormat) -> f64 {
        let formula = Formula::parse_dimacs_str(text, format).unwrap();
        cnf_count(&formula).unwrap().contract_dense().unwrap()[IxDyn(&[])]
    }

    #[test]
    fn test_network_shape() {
        let formula = Formula::from_clauses(3, vec![vec![1, 2], vec![-1, 3], vec![-2, -3]]).unwrap();
        let network = cnf_count(&formula).unwrap();
        assert_eq!(network.len(), 6);
        assert_eq!(network.num_edges(), 6);
        for t in 0..3 {
            assert_eq!(network.tensor(t).unwrap().rank(), 2);
        }
        assert!(network.index_list(3).iter().all(Option::is_some));
    }

    #[test]
    fn test_model_counts() {
        let clauses = "1 2 0\n-1 3 0\n-2 -3 0\n";
        assert_eq!(count(&format!("p cnf 3 3\n{clauses}"), WeightFormat::Unweighted), 2.0);
        // The unconstrained fourth variable doubles the count.
        assert_eq!(count(&format!("p cnf 4 3\n{clauses}"), WeightFormat::Unweighted), 4.0);
    }

    #[test]
    fn test_weighted_count() {
        // x1 or x2 with P(x1) = 0.3, P(x2) = 0.5.
        let value = count("p cnf 2 1\nw 1 0.3\n1 2 0\n", WeightFormat::Cachet);
        assert!((value - (1.0 - 0.7 * 0.5)).abs() < 1e-12);
    }

    #[test]
    fn test_unsatisfiable() {
        assert_eq!(count("p cnf 1 2\n1 0\n-1 0\n", WeightFormat::Unweighted), 0.0);
    }

    #[test]
    fn test_literals_outside_the_formula_are_errors() {
        // Deserialized formulas skip the checks of `add_clause`.
        let zero: Formula =
            serde_json::from_str(r#"{"weights":[[1.0,1.0],[1.0,1.0]],"clauses":[[1,0]]}"#).unwrap();
        assert!(matches!(cnf_count(&zero), Err(Error::Formula { line: 0, .. })));
        let missing: Formula =
            serde_json::from_str(r#"{"weights":[[1.0,1.0]],"clauses":[[1,-2]]}"#).unwrap();
        assert!(matches!(cnf_count(&missing), Err(Error::Formula { .. })));
    }
}
