//! Result sink trait and storage error types
//!
//! The sink is the authoritative store of previously seen fingerprints and
//! the only place run outcomes and source state are persisted.

use crate::extract::CandidateRecord;
use crate::state::{RunOutcome, SourceState};
use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence contract used by the run coordinator
///
/// Implementations must be safe to share between worker tasks. Calls for the
/// same source never overlap because attempts are single-flight per source.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Appends one run outcome; outcomes are never updated
    async fn record_outcome(&self, source_id: &str, outcome: &RunOutcome) -> StorageResult<()>;

    /// Returns true if `token` was already sunk for `source_id`
    async fn exists_fingerprint(&self, source_id: &str, token: &str) -> StorageResult<bool>;

    /// Persists an accepted record
    ///
    /// Idempotent per `(source_id, token)`.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The record was inserted
    /// * `Ok(false)` - A record with this fingerprint already existed
    async fn sink_record(
        &self,
        source_id: &str,
        record: &CandidateRecord,
        token: &str,
    ) -> StorageResult<bool>;

    /// Overwrites the scheduling state of a source
    async fn update_source_state(&self, source_id: &str, state: &SourceState)
        -> StorageResult<()>;
}
