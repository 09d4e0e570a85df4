//! Material repository and change-detection query.
//!
//! # Responsibility
//! - Store and load source material documents.
//! - Select materials whose derived dielectric record is missing or older
//!   than the material itself.
//!
//! # Invariants
//! - A material is stale iff it has no `dielectric` row or
//!   `materials.last_updated > dielectric.last_updated` (strictly).
//! - Materials with `band_gap <= threshold` are never selected.
//! - Stale ids are returned in ascending `material_id` order.

use super::{decode_json, encode_json, RepoResult};
use crate::model::material::{Material, MaterialId, MaterialSummary, Structure};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

/// Band gap (eV) at or below which dielectric data is not derived.
pub const DEFAULT_BAND_GAP_THRESHOLD: f64 = 0.1;

/// Restricts a `materials` row to those newer than their `dielectric` row.
const STALENESS_FILTER_SQL: &str =
    "(d.material_id IS NULL OR m.last_updated > d.last_updated)";

/// Options for the change-detection query.
#[derive(Debug, Clone, PartialEq)]
pub struct StaleMaterialQuery {
    /// Strict lower bound on `band_gap`.
    pub band_gap_threshold: f64,
    /// Optional allow-list of material ids to consider.
    pub material_ids: Option<Vec<MaterialId>>,
}

impl Default for StaleMaterialQuery {
    fn default() -> Self {
        Self {
            band_gap_threshold: DEFAULT_BAND_GAP_THRESHOLD,
            material_ids: None,
        }
    }
}

/// Repository interface for the source material collection.
pub trait MaterialRepository {
    /// Inserts or fully replaces one material document.
    fn upsert_material(&self, material: &Material) -> RepoResult<()>;
    /// Loads the id/structure/task-ids projection of one material.
    fn get_summary(&self, material_id: &str) -> RepoResult<Option<MaterialSummary>>;
    /// Returns ids of materials whose derived record is missing or outdated.
    fn find_stale(&self, query: &StaleMaterialQuery) -> RepoResult<Vec<MaterialId>>;
}

/// SQLite-backed material repository.
pub struct SqliteMaterialRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteMaterialRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl MaterialRepository for SqliteMaterialRepository<'_> {
    fn upsert_material(&self, material: &Material) -> RepoResult<()> {
        let key = material.material_id.as_str();
        self.conn.execute(
            "INSERT INTO materials (material_id, band_gap, structure, task_ids, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(material_id) DO UPDATE SET
                band_gap = excluded.band_gap,
                structure = excluded.structure,
                task_ids = excluded.task_ids,
                last_updated = excluded.last_updated;",
            params![
                key,
                material.band_gap,
                encode_json(&material.structure, key)?,
                encode_json(&material.task_ids, key)?,
                material.last_updated,
            ],
        )?;
        Ok(())
    }

    fn get_summary(&self, material_id: &str) -> RepoResult<Option<MaterialSummary>> {
        let row = self
            .conn
            .query_row(
                "SELECT structure, task_ids, last_updated FROM materials WHERE material_id = ?1;",
                [material_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((structure_json, task_ids_json, last_updated)) = row else {
            return Ok(None);
        };
        let structure: Structure = decode_json(&structure_json, material_id, "structure")?;
        let task_ids: Vec<String> = decode_json(&task_ids_json, material_id, "task_ids")?;

        Ok(Some(MaterialSummary {
            material_id: material_id.to_string(),
            structure,
            task_ids,
            last_updated,
        }))
    }

    fn find_stale(&self, query: &StaleMaterialQuery) -> RepoResult<Vec<MaterialId>> {
        let mut sql = format!(
            "SELECT m.material_id
             FROM materials m
             LEFT JOIN dielectric d ON d.material_id = m.material_id
             WHERE m.band_gap > ? AND {STALENESS_FILTER_SQL}"
        );
        let mut bind_values = vec![Value::Real(query.band_gap_threshold)];

        if let Some(ids) = &query.material_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders = vec!["?"; ids.len()].join(", ");
            sql.push_str(&format!(" AND m.material_id IN ({placeholders})"));
            bind_values.extend(ids.iter().map(|id| Value::Text(id.clone())));
        }
        sql.push_str(" ORDER BY m.material_id ASC;");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            ids.push(row.get(0)?);
        }
        Ok(ids)
    }
}
