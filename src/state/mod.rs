//! State module for sources and attempt results
//!
//! # Components
//!
//! - `Source` / `SourceState`: a configured source and its mutable scheduling state
//! - `BackoffPolicy`: exponential backoff on the next eligible attempt time
//! - `RunStatus` / `RunOutcome`: the immutable result of one attempt

mod outcome;
mod source;

// Re-export main types
pub use outcome::{AttemptResult, RunOutcome, RunReport, RunStatus};
pub use source::{BackoffPolicy, PageShape, Source, SourceState};
