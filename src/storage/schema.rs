//! Database schema definitions

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Mutable scheduling state, one row per source id
CREATE TABLE IF NOT EXISTS sources (
    id TEXT PRIMARY KEY,
    last_attempt TEXT,
    last_success TEXT,
    consecutive_failures INTEGER NOT NULL DEFAULT 0,
    next_eligible_at TEXT,
    hint_invalidated INTEGER NOT NULL DEFAULT 0
);

-- Accepted notice records, deduplicated per source by fingerprint
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    title TEXT NOT NULL,
    location TEXT,
    category TEXT,
    valid_from TEXT,
    valid_until TEXT,
    body TEXT,
    extras TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    UNIQUE(source_id, fingerprint)
);

CREATE INDEX IF NOT EXISTS idx_records_source ON records(source_id);

-- Append-only run outcomes
CREATE TABLE IF NOT EXISTS run_outcomes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id TEXT NOT NULL,
    status TEXT NOT NULL,
    strategy TEXT,
    fallback_used INTEGER NOT NULL DEFAULT 0,
    fetch_attempts INTEGER NOT NULL DEFAULT 0,
    candidates_found INTEGER NOT NULL DEFAULT 0,
    candidates_dropped INTEGER NOT NULL DEFAULT 0,
    candidates_new INTEGER NOT NULL DEFAULT 0,
    started_at TEXT NOT NULL,
    duration_ms INTEGER NOT NULL,
    message TEXT
);

CREATE INDEX IF NOT EXISTS idx_run_outcomes_source ON run_outcomes(source_id);
CREATE INDEX IF NOT EXISTS idx_run_outcomes_status ON run_outcomes(status);
"#;

/// Initializes the database schema
///
/// Safe to call on an existing database.
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
