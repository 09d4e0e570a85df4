//! Task classification and dielectric task selection.
//!
//! # Responsibility
//! - Label task documents with calculation-type tags.
//! - Pick the most recent dielectric-type task of a material and extract its
//!   output block.
//!
//! # Invariants
//! - Candidate order is total: `last_updated DESC`, then `task_id DESC` with
//!   the trailing integer compared numerically (`mp-10` before `mp-9`).
//! - No dielectric-type task is a normal `Ok(None)`, not an error.

use crate::model::task::{TaskDoc, TaskId, Tensor3x3, VoigtPiezo};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Label every dielectric-type task carries.
pub const DIELECTRIC_LABEL: &str = "dielectric";

static TASK_TYPE_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9+]+").expect("valid task type word regex"));
static TRAILING_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*?)(\d+)$").expect("valid trailing number regex"));

/// Assigns calculation-type labels to a task document.
pub trait TaskClassifier {
    fn classify(&self, task: &TaskDoc) -> BTreeSet<String>;
}

/// Default classifier.
///
/// Uses the `task_type` string when present; otherwise derives labels from
/// the INCAR flags (functional, then calculation kind).
#[derive(Debug, Clone, Copy, Default)]
pub struct IncarTaskClassifier;

impl TaskClassifier for IncarTaskClassifier {
    fn classify(&self, task: &TaskDoc) -> BTreeSet<String> {
        if let Some(task_type) = task.task_type.as_deref() {
            return TASK_TYPE_WORD_RE
                .find_iter(task_type)
                .map(|word| word.as_str().to_ascii_lowercase())
                .collect();
        }

        let incar = &task.input.incar;
        let mut labels = BTreeSet::new();

        if incar_flag(incar.get("LHFCALC")) {
            labels.insert("hse".to_string());
        } else if incar.get("METAGGA").is_some_and(|value| !is_none_like(value)) {
            labels.insert("metagga".to_string());
        } else {
            labels.insert("gga".to_string());
        }
        if incar_flag(incar.get("LDAU")) {
            labels.insert("+u".to_string());
        }

        if incar_number(incar.get("ICHARG")).is_some_and(|icharg| icharg > 10.0) {
            labels.insert("nscf".to_string());
        } else if incar_flag(incar.get("LEPSILON")) || incar_flag(incar.get("LCALCEPS")) {
            labels.insert(DIELECTRIC_LABEL.to_string());
            labels.insert("static".to_string());
        } else if incar_number(incar.get("NSW")) == Some(0.0) {
            labels.insert("static".to_string());
        } else {
            labels.insert("structure_optimization".to_string());
        }

        labels
    }
}

/// Raw output block of the selected dielectric task.
#[derive(Debug, Clone, PartialEq)]
pub struct DielectricOutput {
    pub task_id: TaskId,
    pub epsilon_ionic: Tensor3x3,
    pub epsilon_static: Tensor3x3,
    pub piezo_tensor: Option<VoigtPiezo>,
    pub piezo_ionic_tensor: Option<VoigtPiezo>,
}

/// Selected task lacks a required output field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionError {
    pub task_id: TaskId,
    pub field: &'static str,
}

impl Display for SelectionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "task `{}` is missing required output field `{}`",
            self.task_id, self.field
        )
    }
}

impl Error for SelectionError {}

/// Returns dielectric-type tasks, most relevant first.
pub fn dielectric_candidates<'a>(
    tasks: &'a [TaskDoc],
    classifier: &dyn TaskClassifier,
) -> Vec<&'a TaskDoc> {
    let mut candidates: Vec<&TaskDoc> = tasks
        .iter()
        .filter(|task| classifier.classify(task).contains(DIELECTRIC_LABEL))
        .collect();
    candidates.sort_by(|lhs, rhs| compare_relevance(lhs, rhs));
    candidates
}

/// Picks the most recent dielectric-type task and extracts its output.
///
/// # Errors
/// - Returns `SelectionError` when the chosen task has no calculation or
///   lacks `epsilon_ionic`/`epsilon_static`. Older candidates are not tried:
///   a broken newest calculation must be visible, not papered over.
pub fn select_dielectric_output(
    tasks: &[TaskDoc],
    classifier: &dyn TaskClassifier,
) -> Result<Option<DielectricOutput>, SelectionError> {
    let Some(task) = dielectric_candidates(tasks, classifier).into_iter().next() else {
        return Ok(None);
    };
    let missing = |field: &'static str| SelectionError {
        task_id: task.task_id.clone(),
        field,
    };

    let output = task
        .latest_output()
        .ok_or_else(|| missing("calcs_reversed.0.output"))?;
    let outcar = output.outcar.as_ref();

    Ok(Some(DielectricOutput {
        task_id: task.task_id.clone(),
        epsilon_ionic: output.epsilon_ionic.ok_or_else(|| missing("epsilon_ionic"))?,
        epsilon_static: output
            .epsilon_static
            .ok_or_else(|| missing("epsilon_static"))?,
        piezo_tensor: outcar.and_then(|outcar| outcar.piezo_tensor),
        piezo_ionic_tensor: outcar.and_then(|outcar| outcar.piezo_ionic_tensor),
    }))
}

fn compare_relevance(lhs: &TaskDoc, rhs: &TaskDoc) -> Ordering {
    rhs.last_updated
        .cmp(&lhs.last_updated)
        .then_with(|| task_id_key(&rhs.task_id).cmp(&task_id_key(&lhs.task_id)))
}

/// Sort key splitting `mp-123` into (`mp-`, 123) so numbers compare by value.
fn task_id_key(task_id: &str) -> (String, Option<u64>, String) {
    if let Some(captures) = TRAILING_NUMBER_RE.captures(task_id) {
        if let Ok(number) = captures[2].parse::<u64>() {
            return (captures[1].to_string(), Some(number), task_id.to_string());
        }
    }
    (task_id.to_string(), None, task_id.to_string())
}

fn incar_flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(text)) => matches!(
            text.trim().to_ascii_lowercase().as_str(),
            ".true." | "true" | "t"
        ),
        Some(Value::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    }
}

fn incar_number(value: Option<&Value>) -> Option<f64> {
    match value {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse().ok(),
        _ => None,
    }
}

fn is_none_like(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().eq_ignore_ascii_case("none"),
        _ => false,
    }
}
