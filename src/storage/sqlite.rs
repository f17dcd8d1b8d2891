//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the `ResultSink`
//! trait, plus the read queries used by the statistics report.

use crate::extract::CandidateRecord;
use crate::state::{PageShape, RunOutcome, RunStatus, SourceState};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{ResultSink, StorageError, StorageResult};
use crate::storage::StoredRecord;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite storage backend
///
/// The connection sits behind a mutex so a single store can be shared by all
/// worker tasks.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens or creates the database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database or create the schema
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Database("connection lock poisoned".to_string()))
    }

    // ===== Reads =====

    /// Loads the persisted scheduling state of every known source
    pub fn load_source_states(&self) -> StorageResult<HashMap<String, SourceState>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, last_attempt, last_success, consecutive_failures, next_eligible_at, hint_invalidated
             FROM sources",
        )?;

        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let state = SourceState {
                last_attempt: parse_timestamp(row.get(1)?),
                last_success: parse_timestamp(row.get(2)?),
                consecutive_failures: row.get(3)?,
                next_eligible_at: parse_timestamp(row.get(4)?),
                hint_invalidated: row.get::<_, i32>(5)? != 0,
            };
            Ok((id, state))
        })?;

        let mut states = HashMap::new();
        for row in rows {
            let (id, state) = row?;
            states.insert(id, state);
        }

        Ok(states)
    }

    /// Gets the total number of accepted records
    pub fn count_records(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Counts run outcomes grouped by status
    pub fn count_outcomes_by_status(&self) -> StorageResult<HashMap<RunStatus, u64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM run_outcomes GROUP BY status")?;

        let rows = stmt.query_map([], |row| {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((status, count))
        })?;

        let mut summary = HashMap::new();
        for row in rows {
            let (status, count) = row?;
            if let Some(status) = RunStatus::from_db_string(&status) {
                summary.insert(status, count as u64);
            }
        }

        Ok(summary)
    }

    /// Gets the most recent outcome of every source, ordered by source id
    pub fn latest_outcomes(&self) -> StorageResult<Vec<RunOutcome>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT source_id, status, strategy, fallback_used, fetch_attempts, candidates_found,
                    candidates_dropped, candidates_new, started_at, duration_ms, message
             FROM run_outcomes
             WHERE id IN (SELECT MAX(id) FROM run_outcomes GROUP BY source_id)
             ORDER BY source_id",
        )?;

        let outcomes = stmt
            .query_map([], outcome_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(outcomes.into_iter().flatten().collect())
    }

    /// Gets all records of one source in insertion order
    pub fn records_for_source(&self, source_id: &str) -> StorageResult<Vec<StoredRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, fingerprint, title, location, category, valid_from, valid_until, body,
                    extras, created_at
             FROM records WHERE source_id = ?1 ORDER BY id",
        )?;

        let rows = stmt.query_map(params![source_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                CandidateRecord {
                    title: row.get(2)?,
                    location: row.get(3)?,
                    category: row.get(4)?,
                    valid_from: parse_date(row.get(5)?),
                    valid_until: parse_date(row.get(6)?),
                    body: row.get(7)?,
                    extras: BTreeMap::new(),
                },
                row.get::<_, String>(8)?,
                row.get::<_, String>(9)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, fingerprint, mut record, extras, created_at) = row?;
            record.extras = serde_json::from_str(&extras)?;
            records.push(StoredRecord {
                id,
                source_id: source_id.to_string(),
                fingerprint,
                record,
                created_at,
            });
        }

        Ok(records)
    }
}

#[async_trait]
impl ResultSink for SqliteStore {
    async fn record_outcome(&self, source_id: &str, outcome: &RunOutcome) -> StorageResult<()> {
        self.conn()?.execute(
            "INSERT INTO run_outcomes
             (source_id, status, strategy, fallback_used, fetch_attempts, candidates_found,
              candidates_dropped, candidates_new, started_at, duration_ms, message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                source_id,
                outcome.status.to_db_string(),
                outcome.strategy.map(|s| s.to_db_string()),
                outcome.fallback_used as i32,
                outcome.fetch_attempts,
                outcome.candidates_found as i64,
                outcome.candidates_dropped as i64,
                outcome.candidates_new as i64,
                outcome.started_at.to_rfc3339(),
                outcome.duration_ms as i64,
                outcome.message,
            ],
        )?;
        Ok(())
    }

    async fn exists_fingerprint(&self, source_id: &str, token: &str) -> StorageResult<bool> {
        let found = self
            .conn()?
            .query_row(
                "SELECT 1 FROM records WHERE source_id = ?1 AND fingerprint = ?2",
                params![source_id, token],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    async fn sink_record(
        &self,
        source_id: &str,
        record: &CandidateRecord,
        token: &str,
    ) -> StorageResult<bool> {
        let title = record
            .title
            .as_deref()
            .ok_or_else(|| StorageError::Database("record without title".to_string()))?;
        let extras = serde_json::to_string(&record.extras)?;

        let inserted = self.conn()?.execute(
            "INSERT OR IGNORE INTO records
             (source_id, fingerprint, title, location, category, valid_from, valid_until, body,
              extras, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                source_id,
                token,
                title,
                record.location,
                record.category,
                record.valid_from.map(|d| d.to_string()),
                record.valid_until.map(|d| d.to_string()),
                record.body,
                extras,
                Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(inserted > 0)
    }

    async fn update_source_state(
        &self,
        source_id: &str,
        state: &SourceState,
    ) -> StorageResult<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO sources
             (id, last_attempt, last_success, consecutive_failures, next_eligible_at, hint_invalidated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                source_id,
                state.last_attempt.map(|t| t.to_rfc3339()),
                state.last_success.map(|t| t.to_rfc3339()),
                state.consecutive_failures,
                state.next_eligible_at.map(|t| t.to_rfc3339()),
                state.hint_invalidated as i32,
            ],
        )?;
        Ok(())
    }
}

fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value.and_then(|s| s.parse::<DateTime<Utc>>().ok())
}

fn parse_date(value: Option<String>) -> Option<NaiveDate> {
    value.and_then(|s| s.parse::<NaiveDate>().ok())
}

/// Maps a `run_outcomes` row; rows with an unknown status are skipped
fn outcome_from_row(row: &Row<'_>) -> rusqlite::Result<Option<RunOutcome>> {
    let status: String = row.get(1)?;
    let started_at: String = row.get(8)?;

    let (Some(status), Some(started_at)) = (
        RunStatus::from_db_string(&status),
        parse_timestamp(Some(started_at)),
    ) else {
        return Ok(None);
    };

    Ok(Some(RunOutcome {
        source_id: row.get(0)?,
        status,
        strategy: row
            .get::<_, Option<String>>(2)?
            .and_then(|s| PageShape::from_db_string(&s)),
        fallback_used: row.get::<_, i32>(3)? != 0,
        fetch_attempts: row.get(4)?,
        candidates_found: row.get::<_, i64>(5)? as usize,
        candidates_dropped: row.get::<_, i64>(6)? as usize,
        candidates_new: row.get::<_, i64>(7)? as usize,
        started_at,
        duration_ms: row.get::<_, i64>(9)? as u64,
        message: row.get(10)?,
    }))
}
