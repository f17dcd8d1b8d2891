//! Storage module for persisting harvest results
//!
//! This module handles all database operations for the harvester, including:
//! - SQLite database initialization and schema management
//! - Fingerprint-keyed, idempotent record persistence
//! - Append-only run outcomes
//! - Source scheduling state for resumption across restarts

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{ResultSink, StorageError, StorageResult};

use crate::extract::CandidateRecord;
use std::path::Path;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
pub fn open_store(path: &Path) -> StorageResult<SqliteStore> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    SqliteStore::new(path)
}

/// A record as persisted by the SQLite sink
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub id: i64,
    pub source_id: String,
    pub fingerprint: String,
    pub record: CandidateRecord,
    pub created_at: String,
}
