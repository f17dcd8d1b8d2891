//! Run outcome definitions
//!
//! One `RunOutcome` is produced per (source, attempt). Outcomes are immutable
//! once built and are appended to the sink, never updated.

use crate::state::{PageShape, SourceState};
use chrono::{DateTime, Utc};
use std::fmt;

/// Terminal status of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStatus {
    // ===== Pipeline completed =====
    /// Every candidate survived validation
    Success,

    /// Some candidates were dropped by validation, at least one survived
    Partial,

    // ===== Failures that drive backoff =====
    /// Network, DNS, connection or non-success HTTP status
    TransportError,

    /// Fetch timeout or attempt deadline exceeded
    Timeout,

    // ===== Failures that keep the normal interval =====
    /// No usable candidates, even after the fallback hop
    ExtractionError,

    /// Every candidate was rejected by the validator
    ValidationError,

    /// Persistence failed after a successful pipeline
    SinkError,
}

impl RunStatus {
    /// Returns true if the pipeline reached the sink with data
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::Partial)
    }

    /// Returns true if this status increments the consecutive-failure counter
    pub fn counts_as_failure(&self) -> bool {
        matches!(self, Self::TransportError | Self::Timeout)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::TransportError => "transport-error",
            Self::Timeout => "timeout",
            Self::ExtractionError => "extraction-error",
            Self::ValidationError => "validation-error",
            Self::SinkError => "sink-error",
        }
    }

    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "partial" => Some(Self::Partial),
            "transport-error" => Some(Self::TransportError),
            "timeout" => Some(Self::Timeout),
            "extraction-error" => Some(Self::ExtractionError),
            "validation-error" => Some(Self::ValidationError),
            "sink-error" => Some(Self::SinkError),
            _ => None,
        }
    }

    pub fn all_statuses() -> Vec<Self> {
        vec![
            Self::Success,
            Self::Partial,
            Self::TransportError,
            Self::Timeout,
            Self::ExtractionError,
            Self::ValidationError,
            Self::SinkError,
        ]
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Immutable record of one attempt's result
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub source_id: String,
    pub status: RunStatus,

    /// Extraction strategy that produced the final candidates
    pub strategy: Option<PageShape>,

    /// Whether the language-model fallback hop was taken
    pub fallback_used: bool,

    pub fetch_attempts: u32,
    pub candidates_found: usize,
    pub candidates_dropped: usize,
    pub candidates_new: usize,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub message: Option<String>,
}

/// Outcome plus the source state written at the terminal transition
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub state: SourceState,
}

/// What a worker hands back to the scheduler
#[derive(Debug, Clone)]
pub enum AttemptResult {
    /// The attempt reached a terminal state
    Completed(RunReport),

    /// Shutdown interrupted the attempt before `stage`; nothing was written
    Aborted { source_id: String, stage: &'static str },
}
