//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the source (materials, tasks) and target (dielectric) store
//!   contracts used by the builder.
//! - Isolate SQLite and JSON document details from the pipeline.
//!
//! # Invariants
//! - Documents are decoded into explicit schemas at this boundary; malformed
//!   rows surface as `RepoError::InvalidData`, never as defaulted values.
//! - Transport failures surface as `RepoError::Db` and are fatal to a build.

pub mod dielectric_repo;
pub mod material_repo;
pub mod task_repo;

use crate::db::DbError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Generic repository error for document persistence and queries.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    NotFound(String),
    /// Stored document cannot be decoded into its schema.
    InvalidData(String),
}

impl RepoError {
    /// Whether the error means the store itself is unusable.
    ///
    /// Data errors affect one document only; callers may continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Db(_))
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(key) => write!(f, "document not found: {key}"),
            Self::InvalidData(message) => write!(f, "invalid stored document: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::NotFound(_) | Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Decodes a JSON column, tagging failures with the owning key and column.
pub(crate) fn decode_json<T: serde::de::DeserializeOwned>(
    raw: &str,
    key: &str,
    column: &str,
) -> RepoResult<T> {
    serde_json::from_str(raw)
        .map_err(|err| RepoError::InvalidData(format!("`{key}` has malformed {column}: {err}")))
}

/// Encodes a document for a JSON column.
pub(crate) fn encode_json<T: serde::Serialize>(value: &T, key: &str) -> RepoResult<String> {
    serde_json::to_string(value)
        .map_err(|err| RepoError::InvalidData(format!("`{key}` cannot be encoded: {err}")))
}
