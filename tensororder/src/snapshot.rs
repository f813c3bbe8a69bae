//! JSON interchange of planned contractions.
//!
//! A snapshot stores the time spent planning, a contraction tree and the
//! (possibly factored) network it contracts, so planning, slicing and
//! execution can run as separate invocations. Materialized tensor values are
//! not stored; they are rebuilt on demand after loading.
//!
//! # Example
//!
//! ```rust
//! use tensororder::snapshot::{from_json_string, to_json_string, PlanSnapshot};
//! use tensororder::{ContractionTree, Tensor, TensorNetwork};
//!
//! let mut network = TensorNetwork::new();
//! let x = network.add_node(Tensor::variable(1, 0.5, 0.5));
//! let c = network.add_node(Tensor::or(vec![true]));
//! network.connect(x[0], c[0]).unwrap();
//! let tree = ContractionTree::sequential(&network);
//!
//! let json = to_json_string(&PlanSnapshot::new(1.5, tree, network)).unwrap();
//! let loaded = from_json_string(&json).unwrap();
//! assert_eq!(loaded.tree.maxrank(), 1);
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::contraction_tree::ContractionTree;
use crate::error::{Error, Result};
use crate::network::TensorNetwork;
use crate::plan::SlicedExecutionPlan;

/// Planning result handed between phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PlanSnapshot {
    /// Seconds spent before this tree was found.
    pub elapsed: f64,
    pub tree: ContractionTree,
    pub network: TensorNetwork,
}

impl PlanSnapshot {
    pub fn new(elapsed: f64, tree: ContractionTree, network: TensorNetwork) -> Self {
        Self {
            elapsed,
            tree,
            network,
        }
    }

    /// Snapshot of the tree and network of `plan`. Slice groups are not
    /// stored.
    pub fn from_plan(plan: &SlicedExecutionPlan, elapsed: f64) -> Self {
        Self::new(elapsed, plan.tree().clone(), plan.network().clone())
    }

    /// Fresh plan over the stored tree, with nothing sliced.
    pub fn into_plan(self) -> SlicedExecutionPlan {
        SlicedExecutionPlan::new(self.tree, self.network)
    }

    fn validated(self) -> Result<Self> {
        if !self.tree.is_complete(&self.network) {
            return Err(Error::IncompleteTree);
        }
        Ok(self)
    }
}

/// Write a snapshot to a JSON file.
pub fn writejson<P: AsRef<Path>>(path: P, snapshot: &PlanSnapshot) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer(std::io::BufWriter::new(file), snapshot)?;
    Ok(())
}

/// Write a snapshot to a JSON string.
pub fn to_json_string(snapshot: &PlanSnapshot) -> Result<String> {
    Ok(serde_json::to_string(snapshot)?)
}

/// Read a snapshot from a JSON file. The tree must partition the network.
pub fn readjson<P: AsRef<Path>>(path: P) -> Result<PlanSnapshot> {
    let reader = BufReader::new(File::open(path)?);
    let snapshot: PlanSnapshot = serde_json::from_reader(reader)?;
    snapshot.validated()
}

/// Read a snapshot from a JSON string. The tree must partition the network.
pub fn from_json_string(s: &str) -> Result<PlanSnapshot> {
    let snapshot: PlanSnapshot = serde_json::from_str(s)?;
    snapshot.validated()
}
