//! Derived dielectric/piezoelectric record written to the target collection.
//!
//! # Invariants
//! - One record per `material_id`; writes replace the whole record.
//! - `piezo` is present only for non-centrosymmetric structures.
//! - `last_updated` is assigned by the store on upsert, never by callers.

use crate::model::material::MaterialId;
use crate::model::task::{TaskId, Tensor3x3, VoigtPiezo};
use serde::{Deserialize, Serialize};

/// Dielectric tensors and their scalar invariants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DielectricTensors {
    pub ionic: Tensor3x3,
    pub electronic: Tensor3x3,
    /// `ionic + electronic`.
    pub total: Tensor3x3,
    pub e_total: f64,
    pub e_ionic: f64,
    pub e_electronic: f64,
}

/// Point-group symmetrized piezoelectric response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiezoRecord {
    pub piezoelectric_tensor: VoigtPiezo,
    /// Largest absolute Voigt coefficient.
    pub eij_max: f64,
}

/// Full derived record for one material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DielectricRecord {
    pub material_id: MaterialId,
    /// Task the tensors were taken from.
    pub task_id: TaskId,
    pub dielectric: DielectricTensors,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub piezo: Option<PiezoRecord>,
}

/// Record as read back from the target store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDielectricRecord {
    pub record: DielectricRecord,
    /// Unix epoch milliseconds set by the pipeline at upsert time.
    pub last_updated: i64,
}
