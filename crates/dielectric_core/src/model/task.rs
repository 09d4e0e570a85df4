//! Calculation (task) documents produced by upstream simulation parsing.
//!
//! # Responsibility
//! - Describe the subset of a task document the dielectric builder reads.
//! - Keep every output tensor optional so non-dielectric tasks still decode.
//!
//! # Invariants
//! - `calcs_reversed[0]` is the most recent calculation of the task.
//! - Dielectric tensors are 3x3; piezoelectric tensors are 3 rows of 6 Voigt
//!   components. Wrong shapes are rejected at decode time.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Stable identifier for a task document.
pub type TaskId = String;

/// 3x3 tensor in nested-array form.
pub type Tensor3x3 = [[f64; 3]; 3];

/// Piezoelectric tensor in Voigt form: 3 field directions x 6 strain components.
pub type VoigtPiezo = [[f64; 6]; 3];

/// Calculation input parameters relevant to classification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskInput {
    /// Raw INCAR key/value pairs, keys upper-case as written by VASP.
    #[serde(default)]
    pub incar: Map<String, Value>,
}

/// OUTCAR-derived quantities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcarOutput {
    /// Electronic (clamped-ion) piezoelectric tensor.
    #[serde(default)]
    pub piezo_tensor: Option<VoigtPiezo>,
    /// Ionic-relaxation contribution to the piezoelectric tensor.
    #[serde(default)]
    pub piezo_ionic_tensor: Option<VoigtPiezo>,
}

/// Output block of one calculation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalcOutput {
    #[serde(default)]
    pub epsilon_ionic: Option<Tensor3x3>,
    /// Electronic (high-frequency) dielectric tensor.
    #[serde(default)]
    pub epsilon_static: Option<Tensor3x3>,
    #[serde(default)]
    pub outcar: Option<OutcarOutput>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Calculation {
    #[serde(default)]
    pub output: CalcOutput,
}

/// Task document as stored in the source task collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDoc {
    pub task_id: TaskId,
    /// Unix epoch milliseconds of the last change to this task.
    pub last_updated: i64,
    /// Optional pre-computed task-type string, e.g. `GGA Static Dielectric`.
    #[serde(default)]
    pub task_type: Option<String>,
    #[serde(default)]
    pub input: TaskInput,
    #[serde(default)]
    pub calcs_reversed: Vec<Calculation>,
}

impl TaskDoc {
    /// Creates an empty task with no input parameters and no calculations.
    pub fn new(task_id: impl Into<String>, last_updated: i64) -> Self {
        Self {
            task_id: task_id.into(),
            last_updated,
            task_type: None,
            input: TaskInput::default(),
            calcs_reversed: Vec::new(),
        }
    }

    /// Returns the output block of the most recent calculation, if any.
    pub fn latest_output(&self) -> Option<&CalcOutput> {
        self.calcs_reversed.first().map(|calc| &calc.output)
    }
}
