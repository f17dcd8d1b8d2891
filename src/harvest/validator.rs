//! Candidate validation
//!
//! Normalizes candidate fields and drops records that cannot be persisted.
//! Drops are counted per reason so run outcomes can report them.

use crate::extract::text::collapse_whitespace;
use crate::extract::CandidateRecord;

/// Result of validating one batch of candidates
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub accepted: Vec<CandidateRecord>,
    pub missing_title: usize,
    pub inverted_window: usize,
}

impl ValidationReport {
    /// Total candidates rejected
    pub fn dropped(&self) -> usize {
        self.missing_title + self.inverted_window
    }

    /// True when candidates were offered and none survived
    pub fn all_dropped(&self) -> bool {
        self.accepted.is_empty() && self.dropped() > 0
    }
}

/// Validates a batch of candidates
///
/// Text fields are trimmed and whitespace-collapsed; blank values become
/// `None`. A candidate is dropped when its title is missing or blank, or
/// when its validity window ends before it starts.
pub fn validate_candidates(candidates: Vec<CandidateRecord>) -> ValidationReport {
    let mut report = ValidationReport::default();

    for candidate in candidates {
        let record = normalize(candidate);

        if record.title.is_none() {
            report.missing_title += 1;
            continue;
        }

        if let (Some(start), Some(end)) = (record.valid_from, record.valid_until) {
            if end < start {
                report.inverted_window += 1;
                continue;
            }
        }

        report.accepted.push(record);
    }

    report
}

fn normalize(mut record: CandidateRecord) -> CandidateRecord {
    record.title = clean(record.title);
    record.location = clean(record.location);
    record.category = clean(record.category);
    record.body = record
        .body
        .map(|body| body.trim().to_string())
        .filter(|body| !body.is_empty());
    record
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| collapse_whitespace(&v))
        .filter(|v| !v.is_empty())
}
