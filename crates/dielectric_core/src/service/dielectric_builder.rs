//! Incremental dielectric/piezoelectric builder.
//!
//! # Responsibility
//! - Find materials whose derived record is missing or outdated.
//! - Select each material's dielectric task, derive tensors and invariants,
//!   and replace the derived record.
//! - Report per-material outcomes without letting one bad material stop
//!   the run.
//!
//! # Invariants
//! - Per material: `FETCHED -> TASK_SELECTED -> COMPUTED -> UPSERTED`, or
//!   `FETCHED -> TASK_SELECTED(none) -> SKIPPED`. Nothing intermediate is
//!   persisted and no partial record is written.
//! - A failed material keeps its previous record and timestamp, so it stays
//!   stale and is retried on the next run.
//! - Only store transport errors abort the run.
//! - The upsert stamp is `max(now, material.last_updated)`; a second run
//!   without source changes selects nothing.

use crate::logging::BuildLogContext;
use crate::model::dielectric::{DielectricRecord, DielectricTensors, PiezoRecord};
use crate::model::material::{MaterialId, Structure};
use crate::model::task::{TaskDoc, TaskId, Tensor3x3};
use crate::repo::dielectric_repo::DielectricRepository;
use crate::repo::material_repo::{
    MaterialRepository, StaleMaterialQuery, DEFAULT_BAND_GAP_THRESHOLD,
};
use crate::repo::task_repo::TaskRepository;
use crate::repo::{RepoError, RepoResult};
use crate::service::task_selector::{
    select_dielectric_output, IncarTaskClassifier, SelectionError, TaskClassifier,
};
use crate::tensor::symmetry::{
    has_inversion, LatticeSymmetryAnalyzer, SymmetryAnalyzer, SymmetryError, DEFAULT_SYMPREC,
};
use crate::tensor::{add_tensors, combine_piezo, invariant_scalar, TensorError};
use rayon::prelude::*;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Builder name used in log events.
pub const BUILDER_NAME: &str = "dielectric";

/// Build configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildConfig {
    /// Materials with `band_gap <= band_gap_threshold` are never built.
    pub band_gap_threshold: f64,
    /// Symmetry site tolerance in Angstrom.
    pub symprec: f64,
    /// Work items computed concurrently per chunk (minimum 1).
    pub parallelism: usize,
    /// Optional restriction to these material ids.
    pub material_ids: Option<Vec<MaterialId>>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            band_gap_threshold: DEFAULT_BAND_GAP_THRESHOLD,
            symprec: DEFAULT_SYMPREC,
            parallelism: 1,
            material_ids: None,
        }
    }
}

impl BuildConfig {
    fn stale_query(&self) -> StaleMaterialQuery {
        StaleMaterialQuery {
            band_gap_threshold: self.band_gap_threshold,
            material_ids: self.material_ids.clone(),
        }
    }
}

/// One material with everything needed to compute its record.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub material_id: MaterialId,
    pub structure: Structure,
    pub tasks: Vec<TaskDoc>,
    pub source_last_updated: i64,
}

/// A work item could not be loaded from the source stores.
#[derive(Debug)]
pub struct FetchError {
    pub material_id: MaterialId,
    pub error: RepoError,
}

/// Lazily loaded, single-pass sequence of work items.
///
/// Each `next()` loads one material summary and its tasks. The sequence is
/// consumed as it is iterated; run the change-detection query again for a
/// fresh one.
pub struct WorkItems<'a, M, T> {
    ids: std::vec::IntoIter<MaterialId>,
    materials: &'a M,
    tasks: &'a T,
}

impl<M, T> WorkItems<'_, M, T> {
    /// Number of materials not yet fetched.
    pub fn remaining(&self) -> usize {
        self.ids.len()
    }
}

impl<M: MaterialRepository, T: TaskRepository> WorkItems<'_, M, T> {
    fn fetch(&self, material_id: &str) -> RepoResult<WorkItem> {
        let summary = self
            .materials
            .get_summary(material_id)?
            .ok_or_else(|| RepoError::NotFound(material_id.to_string()))?;
        let tasks = self.tasks.get_tasks(&summary.task_ids)?;
        Ok(WorkItem {
            material_id: summary.material_id,
            structure: summary.structure,
            tasks,
            source_last_updated: summary.last_updated,
        })
    }
}

impl<M: MaterialRepository, T: TaskRepository> Iterator for WorkItems<'_, M, T> {
    type Item = Result<WorkItem, FetchError>;

    fn next(&mut self) -> Option<Self::Item> {
        let material_id = self.ids.next()?;
        Some(
            self.fetch(&material_id)
                .map_err(|error| FetchError { material_id, error }),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.ids.size_hint()
    }
}

/// Per-material computation failure.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessError {
    /// Selected task lacks its output block or a dielectric tensor.
    Selection {
        material_id: MaterialId,
        source: SelectionError,
    },
    /// A dielectric tensor cannot be reduced to its invariant.
    Tensor {
        material_id: MaterialId,
        task_id: TaskId,
        tensor: &'static str,
        source: TensorError,
    },
    /// Non-centrosymmetric material whose task lacks piezoelectric output.
    MissingPiezo {
        material_id: MaterialId,
        task_id: TaskId,
        field: &'static str,
    },
}

impl ProcessError {
    pub fn material_id(&self) -> &str {
        match self {
            Self::Selection { material_id, .. }
            | Self::Tensor { material_id, .. }
            | Self::MissingPiezo { material_id, .. } => material_id,
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            Self::Selection { source, .. } => &source.task_id,
            Self::Tensor { task_id, .. } | Self::MissingPiezo { task_id, .. } => task_id,
        }
    }
}

impl Display for ProcessError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Selection {
                material_id,
                source,
            } => write!(f, "material `{material_id}`: {source}"),
            Self::Tensor {
                material_id,
                task_id,
                tensor,
                source,
            } => write!(
                f,
                "material `{material_id}` task `{task_id}`: {tensor} tensor: {source}"
            ),
            Self::MissingPiezo {
                material_id,
                task_id,
                field,
            } => write!(
                f,
                "material `{material_id}` task `{task_id}`: non-centrosymmetric structure but `outcar.{field}` is missing"
            ),
        }
    }
}

impl Error for ProcessError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Selection { source, .. } => Some(source),
            Self::Tensor { source, .. } => Some(source),
            Self::MissingPiezo { .. } => None,
        }
    }
}

/// Successfully computed record plus any non-fatal symmetry problem.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedItem {
    pub record: DielectricRecord,
    /// Set when symmetry could not be determined and `piezo` was omitted.
    pub piezo_omitted: Option<SymmetryError>,
}

/// Derives the dielectric record for one work item.
///
/// Pure: reads only its arguments. Returns `Ok(None)` when the material has
/// no dielectric-type task.
pub fn process_item(
    item: &WorkItem,
    classifier: &dyn TaskClassifier,
    symmetry: &dyn SymmetryAnalyzer,
) -> Result<Option<ProcessedItem>, ProcessError> {
    let selected = select_dielectric_output(&item.tasks, classifier).map_err(|source| {
        ProcessError::Selection {
            material_id: item.material_id.clone(),
            source,
        }
    })?;
    let Some(output) = selected else {
        return Ok(None);
    };

    let invariant = |tensor: &'static str, matrix: &Tensor3x3| {
        invariant_scalar(matrix).map_err(|source| ProcessError::Tensor {
            material_id: item.material_id.clone(),
            task_id: output.task_id.clone(),
            tensor,
            source,
        })
    };
    let total = add_tensors(&output.epsilon_ionic, &output.epsilon_static);
    let dielectric = DielectricTensors {
        ionic: output.epsilon_ionic,
        electronic: output.epsilon_static,
        total,
        e_total: invariant("total", &total)?,
        e_ionic: invariant("ionic", &output.epsilon_ionic)?,
        e_electronic: invariant("electronic", &output.epsilon_static)?,
    };

    // One search serves both the inversion check and the projection.
    let (piezo, piezo_omitted) = match symmetry.symmetry_operations(&item.structure) {
        Ok(ops) if has_inversion(&ops) => (None, None),
        Ok(ops) => {
            let missing = |field: &'static str| ProcessError::MissingPiezo {
                material_id: item.material_id.clone(),
                task_id: output.task_id.clone(),
                field,
            };
            let electronic = output.piezo_tensor.ok_or_else(|| missing("piezo_tensor"))?;
            let ionic = output
                .piezo_ionic_tensor
                .ok_or_else(|| missing("piezo_ionic_tensor"))?;
            match combine_piezo(&electronic, &ionic, &item.structure, &ops) {
                Ok(combined) => (
                    Some(PiezoRecord {
                        piezoelectric_tensor: combined.voigt,
                        eij_max: combined.max_coefficient,
                    }),
                    None,
                ),
                Err(err) => (None, Some(err)),
            }
        }
        Err(err) => (None, Some(err)),
    };

    Ok(Some(ProcessedItem {
        record: DielectricRecord {
            material_id: item.material_id.clone(),
            task_id: output.task_id,
            dielectric,
            piezo,
        },
        piezo_omitted,
    }))
}

/// One material that could not be built in this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterialFailure {
    pub material_id: MaterialId,
    pub task_id: Option<TaskId>,
    pub message: String,
}

/// Outcome summary of one build run.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildReport {
    pub run_id: Uuid,
    /// Stale materials selected by change detection.
    pub candidates: usize,
    pub upserted: Vec<MaterialId>,
    /// Materials without any dielectric-type task.
    pub skipped: Vec<MaterialId>,
    pub failures: Vec<MaterialFailure>,
    /// Upserted without `piezo` because symmetry analysis failed.
    pub piezo_omitted: Vec<MaterialId>,
}

impl BuildReport {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            candidates: 0,
            upserted: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
            piezo_omitted: Vec::new(),
        }
    }
}

/// Fatal build error: the run stops and should be retried later.
#[derive(Debug)]
pub enum BuildError {
    Store(RepoError),
    ThreadPool(String),
}

impl Display for BuildError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "store failure: {err}"),
            Self::ThreadPool(message) => write!(f, "failed to start worker pool: {message}"),
        }
    }
}

impl Error for BuildError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::ThreadPool(_) => None,
        }
    }
}

impl From<RepoError> for BuildError {
    fn from(value: RepoError) -> Self {
        Self::Store(value)
    }
}

/// Incremental builder over material/task sources and the dielectric target.
pub struct DielectricBuilder<M, T, D> {
    materials: M,
    tasks: T,
    dielectric: D,
    classifier: Box<dyn TaskClassifier + Send + Sync>,
    symmetry: Box<dyn SymmetryAnalyzer + Send + Sync>,
    config: BuildConfig,
}

impl<M, T, D> DielectricBuilder<M, T, D>
where
    M: MaterialRepository,
    T: TaskRepository,
    D: DielectricRepository,
{
    /// Creates a builder with the default classifier and symmetry finder.
    pub fn new(materials: M, tasks: T, dielectric: D, config: BuildConfig) -> Self {
        Self {
            materials,
            tasks,
            dielectric,
            classifier: Box::new(IncarTaskClassifier),
            symmetry: Box::new(LatticeSymmetryAnalyzer::new(config.symprec)),
            config,
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn TaskClassifier + Send + Sync>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_symmetry_analyzer(
        mut self,
        symmetry: Box<dyn SymmetryAnalyzer + Send + Sync>,
    ) -> Self {
        self.symmetry = symmetry;
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Runs change detection and returns the lazily fetched work items.
    pub fn get_items(&self) -> RepoResult<WorkItems<'_, M, T>> {
        let ids = self.materials.find_stale(&self.config.stale_query())?;
        Ok(WorkItems {
            ids: ids.into_iter(),
            materials: &self.materials,
            tasks: &self.tasks,
        })
    }

    /// Executes one incremental build, consuming the run's log context.
    ///
    /// # Errors
    /// - `BuildError::Store` when a store transport operation fails.
    /// - `BuildError::ThreadPool` when the worker pool cannot start.
    pub fn run(&self, log: BuildLogContext) -> Result<BuildReport, BuildError> {
        let result = self.run_with(&log);
        match &result {
            Ok(report) => log.finish(
                report.upserted.len(),
                report.skipped.len(),
                report.failures.len(),
            ),
            Err(err) => log.abort(err),
        }
        result
    }

    fn run_with(&self, log: &BuildLogContext) -> Result<BuildReport, BuildError> {
        let parallelism = self.config.parallelism.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parallelism)
            .build()
            .map_err(|err| BuildError::ThreadPool(err.to_string()))?;

        let mut report = BuildReport::new(log.run_id());
        let mut items = self.get_items()?;
        report.candidates = items.remaining();
        log.candidates_found(report.candidates);

        let classifier: &(dyn TaskClassifier + Send + Sync) = self.classifier.as_ref();
        let symmetry: &(dyn SymmetryAnalyzer + Send + Sync) = self.symmetry.as_ref();

        while items.remaining() > 0 {
            let mut batch = Vec::with_capacity(parallelism);
            for fetched in items.by_ref().take(parallelism) {
                match fetched {
                    Ok(item) => batch.push(item),
                    Err(FetchError { error, .. }) if error.is_fatal() => {
                        return Err(BuildError::Store(error));
                    }
                    Err(FetchError { material_id, error }) => {
                        log.item_failed(&material_id, None, &error);
                        report.failures.push(MaterialFailure {
                            material_id,
                            task_id: None,
                            message: error.to_string(),
                        });
                    }
                }
            }

            let outcomes: Vec<_> = pool.install(|| {
                batch
                    .par_iter()
                    .map(|item| process_item(item, classifier, symmetry))
                    .collect()
            });

            for (item, outcome) in batch.iter().zip(outcomes) {
                self.update_target(item, outcome, log, &mut report)?;
            }
        }

        Ok(report)
    }

    fn update_target(
        &self,
        item: &WorkItem,
        outcome: Result<Option<ProcessedItem>, ProcessError>,
        log: &BuildLogContext,
        report: &mut BuildReport,
    ) -> Result<(), BuildError> {
        let processed = match outcome {
            Ok(Some(processed)) => processed,
            Ok(None) => {
                log.item_skipped(&item.material_id);
                report.skipped.push(item.material_id.clone());
                return Ok(());
            }
            Err(err) => {
                log.item_failed(err.material_id(), Some(err.task_id()), &err);
                report.failures.push(MaterialFailure {
                    material_id: err.material_id().to_string(),
                    task_id: Some(err.task_id().to_string()),
                    message: err.to_string(),
                });
                return Ok(());
            }
        };

        let record = processed.record;
        let updated_at = now_epoch_ms().max(item.source_last_updated);
        match self.dielectric.upsert_record(&record, updated_at) {
            Ok(()) => {}
            Err(err) if err.is_fatal() => return Err(BuildError::Store(err)),
            Err(err) => {
                log.item_failed(&record.material_id, Some(&record.task_id), &err);
                report.failures.push(MaterialFailure {
                    material_id: record.material_id,
                    task_id: Some(record.task_id),
                    message: err.to_string(),
                });
                return Ok(());
            }
        }

        if let Some(err) = processed.piezo_omitted {
            log.piezo_omitted(&record.material_id, &err);
            report.piezo_omitted.push(record.material_id.clone());
        }
        log.item_upserted(&record.material_id, &record.task_id, record.piezo.is_some());
        report.upserted.push(record.material_id);
        Ok(())
    }
}

fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
