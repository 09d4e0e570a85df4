//! Incremental builder for dielectric and piezoelectric material properties.
//!
//! Raw calculation documents go in, one derived record per material comes
//! out, and only materials changed since their last build are recomputed.

pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod tensor;

pub use logging::{default_log_level, init_logging, logging_status, BuildLogContext};
pub use model::dielectric::{
    DielectricRecord, DielectricTensors, PiezoRecord, StoredDielectricRecord,
};
pub use model::material::{Material, MaterialId, MaterialSummary, Site, Structure};
pub use model::task::{CalcOutput, Calculation, OutcarOutput, TaskDoc, TaskInput};
pub use repo::dielectric_repo::{DielectricRepository, SqliteDielectricRepository};
pub use repo::material_repo::{
    MaterialRepository, SqliteMaterialRepository, StaleMaterialQuery, DEFAULT_BAND_GAP_THRESHOLD,
};
pub use repo::task_repo::{SqliteTaskRepository, TaskRepository};
pub use repo::{RepoError, RepoResult};
pub use service::dielectric_builder::{
    process_item, BuildConfig, BuildError, BuildReport, DielectricBuilder, MaterialFailure,
    ProcessError, WorkItem, BUILDER_NAME,
};
pub use service::task_selector::{
    select_dielectric_output, IncarTaskClassifier, TaskClassifier, DIELECTRIC_LABEL,
};
pub use tensor::symmetry::{LatticeSymmetryAnalyzer, SymmetryAnalyzer, SymmetryError};
pub use tensor::{combine_piezo, invariant_scalar, is_centrosymmetric, TensorError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
