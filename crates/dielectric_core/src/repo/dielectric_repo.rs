//! Target repository for derived dielectric records.
//!
//! # Responsibility
//! - Upsert whole derived records keyed by `material_id`.
//! - Expose the `last_updated` mark consumed by change detection.
//!
//! # Invariants
//! - Upsert is a single `INSERT .. ON CONFLICT DO UPDATE` statement, so a
//!   record is replaced atomically and never merged field by field.
//! - `last_updated` comes from the caller-supplied build clock only.

use super::{decode_json, encode_json, RepoResult};
use crate::model::dielectric::{DielectricRecord, StoredDielectricRecord};
use rusqlite::{params, Connection, OptionalExtension};

/// Repository interface for the derived dielectric collection.
pub trait DielectricRepository {
    /// Replaces the record for `record.material_id`, stamping `updated_at`.
    fn upsert_record(&self, record: &DielectricRecord, updated_at: i64) -> RepoResult<()>;
    fn get_record(&self, material_id: &str) -> RepoResult<Option<StoredDielectricRecord>>;
    fn count_records(&self) -> RepoResult<u64>;
}

/// SQLite-backed dielectric repository.
pub struct SqliteDielectricRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteDielectricRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl DielectricRepository for SqliteDielectricRepository<'_> {
    fn upsert_record(&self, record: &DielectricRecord, updated_at: i64) -> RepoResult<()> {
        let key = record.material_id.as_str();
        self.conn.execute(
            "INSERT INTO dielectric (material_id, document, last_updated)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(material_id) DO UPDATE SET
                document = excluded.document,
                last_updated = excluded.last_updated;",
            params![key, encode_json(record, key)?, updated_at],
        )?;
        Ok(())
    }

    fn get_record(&self, material_id: &str) -> RepoResult<Option<StoredDielectricRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT document, last_updated FROM dielectric WHERE material_id = ?1;",
                [material_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        row.map(|(document, last_updated)| -> RepoResult<StoredDielectricRecord> {
            Ok(StoredDielectricRecord {
                record: decode_json(&document, material_id, "dielectric document")?,
                last_updated,
            })
        })
        .transpose()
    }

    fn count_records(&self) -> RepoResult<u64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM dielectric;", [], |row| row.get::<_, i64>(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
