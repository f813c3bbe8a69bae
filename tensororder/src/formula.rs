//! Weighted CNF formulas and the DIMACS weight dialects.

use std::io::{BufRead, BufReader, Read};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How literal weights are written in a DIMACS file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum WeightFormat {
    /// No weights; every literal weighs 1.
    #[default]
    Unweighted,
    /// `w <var> <p>` gives the positive literal weight `p` and the negative
    /// `1 - p`; `p = -1` leaves the variable unweighted. Unlisted variables
    /// weigh 0.5 on both literals.
    Cachet,
    /// A single `c weights <pos1> <neg1> <pos2> <neg2> ...` line.
    Minic2d,
    /// `w <lit> <weight>` per literal; unlisted literals weigh 1.
    Mcc,
}

impl WeightFormat {
    fn default_weight(self) -> f64 {
        match self {
            WeightFormat::Cachet => 0.5,
            _ => 1.0,
        }
    }
}

/// A CNF formula over variables `1..=num_variables` with a weight on each
/// literal. Clauses hold DIMACS literals: `v` or `-v`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Formula {
    /// `(negative, positive)` literal weights of variable `i + 1`.
    weights: Vec<(f64, f64)>,
    clauses: Vec<Vec<i64>>,
}

impl Formula {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unweighted formula over `num_variables` variables.
    pub fn from_clauses(num_variables: usize, clauses: Vec<Vec<i64>>) -> Result<Self> {
        let mut formula = Self {
            weights: vec![(1.0, 1.0); num_variables],
            clauses: Vec::new(),
        };
        for clause in clauses {
            formula.add_clause(clause)?;
        }
        Ok(formula)
    }

    /// Add a variable with the given literal weights and return its id.
    pub fn fresh_variable(&mut self, negative: f64, positive: f64) -> usize {
        self.weights.push((negative, positive));
        self.weights.len()
    }

    /// Add the disjunction of `literals`. Variables it mentions that do not
    /// exist yet are created unweighted. Literal 0 is rejected.
    pub fn add_clause(&mut self, literals: Vec<i64>) -> Result<()> {
        if literals.contains(&0) {
            return Err(Error::Formula {
                line: 0,
                reason: format!("clause {literals:?} contains literal 0"),
            });
        }
        let needed = literals
            .iter()
            .map(|l| l.unsigned_abs() as usize)
            .max()
            .unwrap_or(0);
        self.grow(needed, 1.0);
        self.clauses.push(literals);
        Ok(())
    }

    pub fn num_variables(&self) -> usize {
        self.weights.len()
    }

    pub fn clauses(&self) -> &[Vec<i64>] {
        &self.clauses
    }

    /// Weight of a literal; 1 for variables outside the formula.
    pub fn literal_weight(&self, literal: i64) -> f64 {
        let var = literal.unsigned_abs() as usize;
        match self.weights.get(var.wrapping_sub(1)) {
            Some(&(negative, positive)) => {
                if literal > 0 {
                    positive
                } else {
                    negative
                }
            }
            None => 1.0,
        }
    }

    pub fn set_variable_weight(&mut self, var: usize, negative: f64, positive: f64) {
        assert!(var >= 1, "variables are numbered from 1");
        self.grow(var, 1.0);
        self.weights[var - 1] = (negative, positive);
    }

    pub fn set_literal_weight(&mut self, literal: i64, weight: f64) {
        let var = literal.unsigned_abs() as usize;
        assert!(var >= 1, "variables are numbered from 1");
        self.grow(var, 1.0);
        let slot = &mut self.weights[var - 1];
        if literal > 0 {
            slot.1 = weight;
        } else {
            slot.0 = weight;
        }
    }

    fn grow(&mut self, num_variables: usize, weight: f64) {
        if self.weights.len() < num_variables {
            self.weights.resize(num_variables, (weight, weight));
        }
    }

    /// Parse a DIMACS CNF file with weights in the given dialect. Each
    /// non-comment line after the header is one clause. Every variable up to
    /// the header count gets the dialect's default weight unless weighted.
    pub fn parse_dimacs<R: Read>(reader: R, format: WeightFormat) -> Result<Formula> {
        let mut declared = 0;
        let mut set: Vec<Option<(f64, f64)>> = Vec::new();
        let mut clauses = Vec::new();

        fn slot(set: &mut Vec<Option<(f64, f64)>>, var: usize) -> &mut Option<(f64, f64)> {
            if set.len() < var {
                set.resize(var, None);
            }
            &mut set[var - 1]
        }

        for (i, line) in BufReader::new(reader).lines().enumerate() {
            let line = line?;
            let number = i + 1;
            let err = |reason: String| Error::Formula {
                line: number,
                reason,
            };
            let trimmed = line.trim();

            if format == WeightFormat::Minic2d && trimmed.starts_with("c weights") {
                let values = trimmed
                    .split_whitespace()
                    .skip(2)
                    .map(|w| w.parse::<f64>().map_err(|e| err(format!("bad weight {w:?}: {e}"))))
                    .collect::<Result<Vec<_>>>()?;
                for (v, pair) in values.chunks_exact(2).enumerate() {
                    *slot(&mut set, v + 1) = Some((pair[1], pair[0]));
                }
            } else if trimmed.is_empty() || trimmed.starts_with('c') || trimmed.starts_with('%') {
                continue;
            } else if trimmed.starts_with('p') {
                let count = trimmed
                    .split_whitespace()
                    .nth(2)
                    .ok_or_else(|| err("header lacks a variable count".to_string()))?;
                declared = count
                    .parse()
                    .map_err(|e| err(format!("bad variable count {count:?}: {e}")))?;
            } else if trimmed.starts_with('w') {
                let mut fields = trimmed.split_whitespace().skip(1);
                let (Some(target), Some(weight)) = (fields.next(), fields.next()) else {
                    return Err(err("weight line needs a literal and a weight".to_string()));
                };
                let target: i64 = target
                    .parse()
                    .map_err(|e| err(format!("bad literal {target:?}: {e}")))?;
                let weight: f64 = weight
                    .parse()
                    .map_err(|e| err(format!("bad weight {weight:?}: {e}")))?;
                let var = target.unsigned_abs() as usize;
                if var == 0 {
                    return Err(err("variable 0 cannot be weighted".to_string()));
                }
                match format {
                    WeightFormat::Cachet if weight == -1.0 => *slot(&mut set, var) = Some((1.0, 1.0)),
                    WeightFormat::Cachet => *slot(&mut set, var) = Some((1.0 - weight, weight)),
                    WeightFormat::Mcc => {
                        let entry = slot(&mut set, var).get_or_insert((1.0, 1.0));
                        if target > 0 {
                            entry.1 = weight;
                        } else {
                            entry.0 = weight;
                        }
                    }
                    other => {
                        return Err(err(format!("weight lines are not allowed in {other:?} files")))
                    }
                }
            } else {
                let literals = trimmed
                    .split_whitespace()
                    .map(|l| l.parse::<i64>().map_err(|e| err(format!("bad literal {l:?}: {e}"))))
                    .filter(|l| !matches!(l, Ok(0)))
                    .collect::<Result<Vec<_>>>()?;
                if !literals.is_empty() {
                    clauses.push(literals);
                }
            }
        }

        let mut formula = Formula::new();
        formula.grow(declared, format.default_weight());
        for (v, weights) in set.into_iter().enumerate() {
            if let Some((negative, positive)) = weights {
                formula.set_variable_weight(v + 1, negative, positive);
            }
        }
        for clause in clauses {
            let needed = clause
                .iter()
                .map(|l| l.unsigned_abs() as usize)
                .max()
                .unwrap_or(0);
            formula.grow(needed, format.default_weight());
            formula.clauses.push(clause);
        }
        Ok(formula)
    }

    pub fn parse_dimacs_str(text: &str, format: WeightFormat) -> Result<Formula> {
        Self::parse_dimacs(text.as_bytes(), format)
    }
}
