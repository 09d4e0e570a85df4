//! Task document repository.
//!
//! # Invariants
//! - `document` holds the full task JSON; `last_updated` mirrors its field.
//! - Unknown task ids are skipped, matching an `$in` lookup.

use super::{decode_json, encode_json, RepoResult};
use crate::model::task::TaskDoc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};

/// Repository interface for the source task collection.
pub trait TaskRepository {
    /// Inserts or fully replaces one task document.
    fn upsert_task(&self, task: &TaskDoc) -> RepoResult<()>;
    /// Loads every stored task whose id is in `task_ids`.
    fn get_tasks(&self, task_ids: &[String]) -> RepoResult<Vec<TaskDoc>>;
}

/// SQLite-backed task repository.
pub struct SqliteTaskRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTaskRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl TaskRepository for SqliteTaskRepository<'_> {
    fn upsert_task(&self, task: &TaskDoc) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO tasks (task_id, document, last_updated)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(task_id) DO UPDATE SET
                document = excluded.document,
                last_updated = excluded.last_updated;",
            params![
                task.task_id.as_str(),
                encode_json(task, &task.task_id)?,
                task.last_updated,
            ],
        )?;
        Ok(())
    }

    fn get_tasks(&self, task_ids: &[String]) -> RepoResult<Vec<TaskDoc>> {
        if task_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; task_ids.len()].join(", ");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT task_id, document FROM tasks WHERE task_id IN ({placeholders}) ORDER BY task_id;"
        ))?;
        let bind_values = task_ids.iter().map(|id| Value::Text(id.clone()));
        let mut rows = stmt.query(params_from_iter(bind_values))?;

        let mut tasks = Vec::new();
        while let Some(row) = rows.next()? {
            let task_id: String = row.get(0)?;
            let document: String = row.get(1)?;
            tasks.push(decode_json::<TaskDoc>(&document, &task_id, "task document")?);
        }
        Ok(tasks)
    }
}
