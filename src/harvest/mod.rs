//! Harvest engine
//!
//! This module contains the core harvesting logic, including:
//! - HTTP fetching with a hard timeout per request
//! - The per-attempt run coordinator (fetch, classify, extract, validate,
//!   deduplicate, sink)
//! - Source scheduling with a bounded worker pool and single-flight per source
//! - The long-running harvest loop with configuration reloads and shutdown

mod clock;
mod coordinator;
pub mod dedup;
mod fetcher;
mod scheduler;
pub mod validator;

pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{RunCoordinator, RunPolicy};
pub use dedup::{fingerprint, Deduplicator};
pub use fetcher::{build_http_client, FetchError, FetchedPage, Fetcher, HttpFetcher};
pub use scheduler::{DispatchError, InFlightGuard, SourceScheduler};
pub use validator::{validate_candidates, ValidationReport};

use crate::config::{compute_config_hash, load_config, Config};
use crate::extract::{ExtractorSet, OllamaClient};
use crate::state::{AttemptResult, RunStatus};
use crate::storage::open_store;
use crate::HarvestError;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;

/// Totals over every attempt a harvest loop observed
#[derive(Debug, Clone, Default)]
pub struct HarvestSummary {
    pub by_status: HashMap<RunStatus, usize>,
    pub new_records: usize,
    pub aborted: usize,

    /// Worker tasks that panicked or were cancelled
    pub worker_failures: usize,
}

impl HarvestSummary {
    pub fn completed(&self) -> usize {
        self.by_status.values().sum()
    }

    fn record(&mut self, joined: Result<AttemptResult, JoinError>) {
        match joined {
            Ok(AttemptResult::Completed(report)) => {
                *self.by_status.entry(report.outcome.status).or_insert(0) += 1;
                self.new_records += report.outcome.candidates_new;
            }
            Ok(AttemptResult::Aborted { .. }) => self.aborted += 1,
            Err(e) => {
                tracing::error!("Worker task failed: {}", e);
                self.worker_failures += 1;
            }
        }
    }
}

/// How long a harvest runs and what it dispatches
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarvestMode {
    /// Dispatch due sources on every tick until shutdown
    Continuous,

    /// Dispatch due sources once, wait for them and return
    Once,

    /// Run one source now regardless of its due time, wait for it and return
    Source(String),
}

/// Runs the harvester until shutdown, or for a single pass
///
/// # Arguments
///
/// * `config_path` - Configuration file, re-hashed on every tick to detect changes
/// * `config` - The already loaded configuration
/// * `mode` - Continuous loop, single pass or a single named source
/// * `shutdown` - Set to true to stop dispatching and abort running attempts
///   between stages
///
/// # Returns
///
/// * `Ok(HarvestSummary)` - Totals over the attempts that ran
/// * `Err(HarvestError)` - Startup failed (storage, HTTP client or config), or
///   the named source is unknown
pub async fn run_harvest(
    config_path: &Path,
    config: Config,
    mode: HarvestMode,
    mut shutdown: watch::Receiver<bool>,
) -> Result<HarvestSummary, HarvestError> {
    let store = Arc::new(open_store(Path::new(&config.output.database_path))?);
    let fetcher = Arc::new(HttpFetcher::from_config(&config.user_agent)?);
    let llm = Arc::new(OllamaClient::new(&config.llm)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let coordinator = Arc::new(
        RunCoordinator::new(
            RunPolicy::from_config(&config.harvester),
            fetcher,
            ExtractorSet::new(llm, config.llm.max_input_chars),
            store.clone(),
            Arc::clone(&clock),
        )
        .with_shutdown(shutdown.clone()),
    );

    let scheduler = SourceScheduler::from_entries(
        &config.sources,
        config.harvester.max_concurrent_runs as usize,
        clock,
    );
    let stored = store.load_source_states()?;
    tracing::info!("Restored scheduling state for {} source(s)", stored.len());
    scheduler.restore_states(stored);

    let mut config_hash = compute_config_hash(config_path)?;
    let mut ticker = tokio::time::interval(Duration::from_secs(config.harvester.tick_interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut tasks = JoinSet::new();
    let mut summary = HarvestSummary::default();

    let once = mode != HarvestMode::Continuous;
    match &mode {
        HarvestMode::Continuous => {}
        HarvestMode::Once => {
            scheduler.dispatch(&coordinator, &mut tasks);
        }
        HarvestMode::Source(source_id) => {
            scheduler.dispatch_source(&coordinator, &mut tasks, source_id)?;
        }
    }

    loop {
        if once && tasks.is_empty() {
            break;
        }

        tokio::select! {
            _ = ticker.tick(), if !once => {
                reload_if_changed(config_path, &mut config_hash, &scheduler);
                scheduler.dispatch(&coordinator, &mut tasks);
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                summary.record(joined);
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!(
                        "Shutdown requested, waiting for {} running attempt(s)",
                        scheduler.in_flight_count()
                    );
                    break;
                }
            }
        }
    }

    scheduler.close();
    while let Some(joined) = tasks.join_next().await {
        summary.record(joined);
    }

    tracing::info!(
        "Harvest stopped: {} completed, {} aborted, {} new record(s)",
        summary.completed(),
        summary.aborted,
        summary.new_records
    );

    Ok(summary)
}

/// Re-reads the configuration when its hash changed
///
/// Only the source list is reloaded; harvester and LLM settings apply on
/// restart. An invalid file keeps the current registry.
fn reload_if_changed(config_path: &Path, current_hash: &mut String, scheduler: &SourceScheduler) {
    let hash = match compute_config_hash(config_path) {
        Ok(hash) => hash,
        Err(e) => {
            tracing::warn!("Could not re-read configuration: {}", e);
            return;
        }
    };
    if hash == *current_hash {
        return;
    }
    *current_hash = hash;

    match load_config(config_path) {
        Ok(config) => {
            tracing::info!("Configuration changed, reloading sources");
            scheduler.replace_sources(&config.sources);
        }
        Err(e) => tracing::warn!("Ignoring invalid configuration change: {}", e),
    }
}
