//! Source scheduler and worker pool
//!
//! This module handles:
//! - The registry of configured sources and their scheduling state
//! - Selecting the sources that are due at the current time
//! - Single-flight per source via an in-flight marker
//! - Bounding concurrent attempts with a semaphore

use crate::config::SourceEntry;
use crate::harvest::{Clock, RunCoordinator};
use crate::state::{AttemptResult, Source, SourceState};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

type Registry = Arc<Mutex<Vec<Source>>>;
type InFlight = Arc<Mutex<HashSet<String>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Why a source could not be dispatched on demand
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Unknown source '{0}'")]
    UnknownSource(String),

    #[error("Source '{0}' already has an attempt in flight")]
    InFlight(String),
}

/// Marks a source as in flight until dropped
///
/// Dropping releases the marker on every exit path, including panics and
/// task aborts.
#[derive(Debug)]
pub struct InFlightGuard {
    source_id: String,
    in_flight: InFlight,
}

impl InFlightGuard {
    pub fn source_id(&self) -> &str {
        &self.source_id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.source_id);
    }
}

/// SourceScheduler offers due sources to a bounded worker pool
///
/// The scheduler coordinates:
/// - Global concurrency limits (max concurrent runs)
/// - Per-source single-flight (no overlapping attempts for one source)
/// - Applying each attempt's terminal state back to the registry
pub struct SourceScheduler {
    clock: Arc<dyn Clock>,

    /// Global semaphore for limiting concurrent attempts
    permits: Arc<Semaphore>,

    /// Configured sources in configuration order
    sources: Registry,

    /// Ids of sources with an attempt queued or running
    in_flight: InFlight,
}

impl SourceScheduler {
    /// Creates a new scheduler
    ///
    /// # Arguments
    ///
    /// * `sources` - Initial source registry
    /// * `max_concurrent` - Maximum number of attempts running at once
    /// * `clock` - Clock used for due checks
    pub fn new(sources: Vec<Source>, max_concurrent: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            sources: Arc::new(Mutex::new(sources)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Builds a scheduler from configuration entries
    pub fn from_entries(
        entries: &[SourceEntry],
        max_concurrent: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sources = entries.iter().map(Source::from_entry).collect();
        Self::new(sources, max_concurrent, clock)
    }

    /// Snapshot of the registry
    pub fn sources(&self) -> Vec<Source> {
        lock(&self.sources).clone()
    }

    /// Sources due at the current time that have no attempt in flight
    pub fn due_sources(&self) -> Vec<Source> {
        let now = self.clock.now();
        let in_flight = lock(&self.in_flight);
        lock(&self.sources)
            .iter()
            .filter(|source| source.is_due(now) && !in_flight.contains(&source.id))
            .cloned()
            .collect()
    }

    /// Claims the in-flight marker for a source
    ///
    /// Returns None if an attempt for the source is already in flight.
    pub fn try_claim(&self, source_id: &str) -> Option<InFlightGuard> {
        let mut in_flight = lock(&self.in_flight);
        if !in_flight.insert(source_id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            source_id: source_id.to_string(),
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Number of sources with an attempt queued or running
    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Spawns one attempt per due source
    ///
    /// Each task waits for a worker permit, runs the coordinator, applies the
    /// resulting state to the registry and only then releases the source's
    /// in-flight marker.
    ///
    /// # Returns
    ///
    /// The number of attempts spawned
    pub fn dispatch(
        &self,
        coordinator: &Arc<RunCoordinator>,
        tasks: &mut JoinSet<AttemptResult>,
    ) -> usize {
        let mut spawned = 0;

        for source in self.due_sources() {
            let Some(guard) = self.try_claim(&source.id) else {
                debug!("Skipping {}: attempt already in flight", source.id);
                continue;
            };
            self.spawn_attempt(source, guard, coordinator, tasks);
            spawned += 1;
        }

        if spawned > 0 {
            info!("Dispatched {} source run(s)", spawned);
        }
        spawned
    }

    /// Spawns an attempt for one source now, ignoring its due time
    ///
    /// The in-flight marker is still claimed, so this never overlaps a
    /// running attempt. Inactive sources are accepted when named explicitly.
    ///
    /// # Errors
    ///
    /// * `DispatchError::UnknownSource` - No source with this id is configured
    /// * `DispatchError::InFlight` - An attempt for the source is queued or running
    pub fn dispatch_source(
        &self,
        coordinator: &Arc<RunCoordinator>,
        tasks: &mut JoinSet<AttemptResult>,
        source_id: &str,
    ) -> Result<(), DispatchError> {
        let source = lock(&self.sources)
            .iter()
            .find(|source| source.id == source_id)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownSource(source_id.to_string()))?;

        let guard = self
            .try_claim(source_id)
            .ok_or_else(|| DispatchError::InFlight(source_id.to_string()))?;

        info!("Dispatching {} on demand", source_id);
        self.spawn_attempt(source, guard, coordinator, tasks);
        Ok(())
    }

    /// Queues one attempt behind a worker permit
    ///
    /// The task applies the terminal state to the registry before the guard
    /// drops.
    fn spawn_attempt(
        &self,
        source: Source,
        guard: InFlightGuard,
        coordinator: &Arc<RunCoordinator>,
        tasks: &mut JoinSet<AttemptResult>,
    ) {
        let permits = Arc::clone(&self.permits);
        let registry = Arc::clone(&self.sources);
        let coordinator = Arc::clone(coordinator);

        tasks.spawn(async move {
            let _guard = guard;
            let source_id = source.id.clone();

            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    return AttemptResult::Aborted {
                        source_id,
                        stage: "queued",
                    }
                }
            };

            let result = coordinator.run(source).await;
            if let AttemptResult::Completed(report) = &result {
                apply_to_registry(&registry, &source_id, report.state.clone());
            }
            result
        });
    }

    /// Replaces the registry with a freshly loaded configuration
    ///
    /// Sources are matched by id. Known sources keep their scheduling state;
    /// removed sources disappear once any in-flight attempt finishes.
    pub fn replace_sources(&self, entries: &[SourceEntry]) {
        let mut sources = lock(&self.sources);
        let mut previous: HashMap<String, Source> = sources
            .drain(..)
            .map(|source| (source.id.clone(), source))
            .collect();

        for entry in entries {
            let source = match previous.remove(&entry.id) {
                Some(mut existing) => {
                    existing.refresh_from(entry);
                    existing
                }
                None => Source::from_entry(entry),
            };
            sources.push(source);
        }

        info!(
            "Source registry reloaded: {} source(s), {} removed",
            sources.len(),
            previous.len()
        );
    }

    /// Restores persisted scheduling state, keyed by source id
    pub fn restore_states(&self, mut states: HashMap<String, SourceState>) {
        for source in lock(&self.sources).iter_mut() {
            if let Some(state) = states.remove(&source.id) {
                source.state = state;
            }
        }
    }

    /// Overwrites one source's scheduling state
    pub fn apply_state(&self, source_id: &str, state: SourceState) {
        apply_to_registry(&self.sources, source_id, state);
    }

    /// Stops handing out worker permits
    ///
    /// Attempts still waiting for a permit finish as aborted.
    pub fn close(&self) {
        self.permits.close();
    }
}

fn apply_to_registry(registry: &Registry, source_id: &str, state: SourceState) {
    if let Some(source) = lock(registry).iter_mut().find(|s| s.id == source_id) {
        source.state = state;
    }
}
