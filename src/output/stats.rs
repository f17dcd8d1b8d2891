//! Statistics generation from the harvest database
//!
//! This module provides functionality for extracting and displaying
//! harvest statistics from the storage layer.

use crate::state::{RunOutcome, RunStatus};
use crate::storage::{SqliteStore, StorageResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// A source whose next attempt is delayed by consecutive failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackingOffSource {
    pub source_id: String,
    pub consecutive_failures: u32,
    pub next_eligible_at: DateTime<Utc>,
}

/// Harvest statistics summary
#[derive(Debug, Clone)]
pub struct HarvestStatistics {
    /// Total number of records persisted
    pub total_records: u64,

    /// Count of run outcomes by status
    pub outcomes_by_status: HashMap<RunStatus, u64>,

    /// Most recent outcome of each source, ordered by source id
    pub latest_outcomes: Vec<RunOutcome>,

    /// Sources still waiting out a backoff at load time
    pub backing_off: Vec<BackingOffSource>,
}

impl HarvestStatistics {
    pub fn total_outcomes(&self) -> u64 {
        self.outcomes_by_status.values().sum()
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `store` - The database to query
/// * `now` - Reference time for deciding which sources are backing off
///
/// # Returns
///
/// * `Ok(HarvestStatistics)` - Successfully loaded statistics
/// * `Err(StorageError)` - Failed to query statistics
pub fn load_statistics(store: &SqliteStore, now: DateTime<Utc>) -> StorageResult<HarvestStatistics> {
    let total_records = store.count_records()?;
    let outcomes_by_status = store.count_outcomes_by_status()?;
    let latest_outcomes = store.latest_outcomes()?;

    let mut backing_off: Vec<_> = store
        .load_source_states()?
        .into_iter()
        .filter(|(_, state)| state.consecutive_failures > 0)
        .filter_map(|(source_id, state)| match state.next_eligible_at {
            Some(next) if next > now => Some(BackingOffSource {
                source_id,
                consecutive_failures: state.consecutive_failures,
                next_eligible_at: next,
            }),
            _ => None,
        })
        .collect();
    backing_off.sort_by(|a, b| a.source_id.cmp(&b.source_id));

    Ok(HarvestStatistics {
        total_records,
        outcomes_by_status,
        latest_outcomes,
        backing_off,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &HarvestStatistics) {
    println!("=== Harvest Statistics ===\n");

    println!("Overview:");
    println!("  Records stored: {}", stats.total_records);
    println!("  Runs recorded: {}", stats.total_outcomes());
    println!();

    println!("Runs by Status:");
    let total = stats.total_outcomes();
    for status in RunStatus::all_statuses() {
        let count = stats.outcomes_by_status.get(&status).copied().unwrap_or(0);
        if count == 0 {
            continue;
        }
        let percentage = (count as f64 / total as f64) * 100.0;
        println!("  {}: {} ({:.1}%)", status, count, percentage);
    }
    println!();

    if !stats.latest_outcomes.is_empty() {
        println!("Latest Run per Source:");
        for outcome in &stats.latest_outcomes {
            let strategy = outcome
                .strategy
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {}: {} at {} via {}{} ({} found, {} new)",
                outcome.source_id,
                outcome.status,
                outcome.started_at.format("%Y-%m-%d %H:%M"),
                strategy,
                if outcome.fallback_used { " (fallback)" } else { "" },
                outcome.candidates_found,
                outcome.candidates_new
            );
            if let Some(message) = &outcome.message {
                println!("      {}", message);
            }
        }
        println!();
    }

    if !stats.backing_off.is_empty() {
        println!("Backing Off ({}):", stats.backing_off.len());
        for source in &stats.backing_off {
            println!(
                "  - {} ({} consecutive failures, next attempt {})",
                source.source_id,
                source.consecutive_failures,
                source.next_eligible_at.format("%Y-%m-%d %H:%M")
            );
        }
        println!();
    }

    let succeeded: u64 = [RunStatus::Success, RunStatus::Partial]
        .iter()
        .filter_map(|status| stats.outcomes_by_status.get(status))
        .sum();
    let success_rate = if total > 0 {
        (succeeded as f64 / total as f64) * 100.0
    } else {
        0.0
    };

    println!(
        "Success Rate: {:.1}% ({} / {} runs completed the pipeline)",
        success_rate, succeeded, total
    );
}
