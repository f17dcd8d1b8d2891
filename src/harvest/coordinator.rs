//! Run coordinator: one attempt of one source
//!
//! An attempt moves through Fetching, Classifying, Extracting, Validating,
//! Deduplicating and Sinking. Every terminal path produces exactly one run
//! outcome and one source-state write, except when shutdown interrupts the
//! attempt between stages, in which case nothing is written.

use crate::config::{HarvesterConfig, MAX_DURATION_SECS};
use crate::extract::{CandidateRecord, ExtractorSet, StrategySelector};
use crate::harvest::dedup::Deduplicator;
use crate::harvest::validator::validate_candidates;
use crate::harvest::{Clock, FetchedPage, Fetcher};
use crate::state::{
    AttemptResult, BackoffPolicy, PageShape, RunOutcome, RunReport, RunStatus, Source,
};
use crate::storage::ResultSink;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};

/// Retry, deadline and backoff settings for attempts
#[derive(Debug, Clone, Copy)]
pub struct RunPolicy {
    /// Wall-clock limit for one fetch
    pub fetch_timeout: Duration,

    /// Deadline covering fetching and extraction
    pub attempt_deadline: Duration,

    /// Extra fetches after a retryable failure
    pub transport_retries: u32,

    /// Base delay before a retry, jittered up to twice this value
    pub retry_delay: Duration,

    pub backoff: BackoffPolicy,
}

impl RunPolicy {
    pub fn from_config(config: &HarvesterConfig) -> Self {
        Self {
            fetch_timeout: Duration::from_secs(config.fetch_timeout_secs),
            attempt_deadline: Duration::from_secs(config.attempt_deadline_secs.min(MAX_DURATION_SECS)),
            transport_retries: config.transport_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            backoff: BackoffPolicy::new(config.max_backoff_multiplier),
        }
    }
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self::from_config(&HarvesterConfig::default())
    }
}

/// Why the pipeline stopped early
enum Halt {
    Failed { status: RunStatus, message: String },
    Aborted(&'static str),
}

impl Halt {
    fn failed(status: RunStatus, message: impl Into<String>) -> Self {
        Self::Failed {
            status,
            message: message.into(),
        }
    }
}

/// Counters gathered while an attempt runs
#[derive(Debug, Default)]
struct Progress {
    fetch_attempts: u32,
    strategy: Option<PageShape>,
    fallback_used: bool,
    hint_failed: bool,
    found: usize,
    dropped: usize,
    new: usize,
}

/// Drives single attempts through the extraction pipeline
///
/// Shared by all workers; holds no per-source state of its own.
pub struct RunCoordinator {
    policy: RunPolicy,
    fetcher: Arc<dyn Fetcher>,
    extractors: ExtractorSet,
    selector: StrategySelector,
    sink: Arc<dyn ResultSink>,
    dedup: Deduplicator,
    clock: Arc<dyn Clock>,
    shutdown: watch::Receiver<bool>,
}

impl RunCoordinator {
    /// Creates a coordinator with the default strategy selector and no
    /// shutdown signal
    ///
    /// # Arguments
    ///
    /// * `policy` - Retry, deadline and backoff settings
    /// * `fetcher` - Page fetcher
    /// * `extractors` - Table, list and language-model extractors
    /// * `sink` - Persistence for records, outcomes and source state
    /// * `clock` - Clock used to timestamp attempts
    pub fn new(
        policy: RunPolicy,
        fetcher: Arc<dyn Fetcher>,
        extractors: ExtractorSet,
        sink: Arc<dyn ResultSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (_, shutdown) = watch::channel(false);
        Self {
            policy,
            fetcher,
            extractors,
            selector: StrategySelector::default(),
            dedup: Deduplicator::new(Arc::clone(&sink)),
            sink,
            clock,
            shutdown,
        }
    }

    /// Aborts attempts between stages once `shutdown` reads true
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Runs one attempt for `source`
    ///
    /// `source` is a snapshot; the new state is returned in the report and
    /// persisted through the sink, never written back here.
    pub async fn run(&self, source: Source) -> AttemptResult {
        let started_at = self.clock.now();
        let started = Instant::now();
        let deadline = started
            .checked_add(self.policy.attempt_deadline)
            .unwrap_or_else(|| started + Duration::from_secs(MAX_DURATION_SECS));
        let mut progress = Progress::default();

        tracing::info!("Starting run for {} ({})", source.id, source.url);

        let (status, message) = match self.pipeline(&source, deadline, &mut progress).await {
            Ok(status) => {
                let message = (status == RunStatus::Partial).then(|| {
                    format!(
                        "{} of {} candidates dropped by validation",
                        progress.dropped, progress.found
                    )
                });
                (status, message)
            }
            Err(Halt::Failed { status, message }) => (status, Some(message)),
            Err(Halt::Aborted(stage)) => {
                tracing::info!("Run for {} aborted by shutdown before {}", source.id, stage);
                return AttemptResult::Aborted {
                    source_id: source.id,
                    stage,
                };
            }
        };

        let state = source.state.after_attempt(
            status,
            started_at,
            source.min_interval,
            self.policy.backoff,
            progress.hint_failed,
        );

        let outcome = RunOutcome {
            source_id: source.id.clone(),
            status,
            strategy: progress.strategy,
            fallback_used: progress.fallback_used,
            fetch_attempts: progress.fetch_attempts,
            candidates_found: progress.found,
            candidates_dropped: progress.dropped,
            candidates_new: progress.new,
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
            message,
        };

        if let Err(e) = self.sink.record_outcome(&source.id, &outcome).await {
            tracing::error!("Failed to record outcome for {}: {}", source.id, e);
        }
        if let Err(e) = self.sink.update_source_state(&source.id, &state).await {
            tracing::error!("Failed to update state for {}: {}", source.id, e);
        }

        match &outcome.message {
            Some(message) if !status.is_success() => {
                tracing::warn!("Run for {} finished {}: {}", source.id, status, message)
            }
            _ => tracing::info!(
                "Run for {} finished {}: {} found, {} new",
                source.id,
                status,
                outcome.candidates_found,
                outcome.candidates_new
            ),
        }

        AttemptResult::Completed(RunReport { outcome, state })
    }

    async fn pipeline(
        &self,
        source: &Source,
        deadline: Instant,
        progress: &mut Progress,
    ) -> Result<RunStatus, Halt> {
        self.checkpoint("fetching")?;
        let page = self.fetch_with_retries(source, deadline, progress).await?;

        self.checkpoint("classifying")?;
        let hint = source.effective_hint();
        let shape = match hint {
            Some(shape) => shape,
            None => self
                .selector
                .classify(&page.body, &source.selectors, &self.extractors),
        };
        tracing::debug!(
            "{}: classified as {} ({})",
            source.id,
            shape,
            if hint.is_some() { "declared" } else { "heuristic" }
        );

        self.checkpoint("extracting")?;
        progress.strategy = Some(shape);
        let mut candidates = self.extract(shape, &page, source, deadline).await?;

        if candidates.is_empty() && shape.is_structured() {
            tracing::warn!(
                "{}: {} extractor found nothing, falling back to LLM",
                source.id,
                shape
            );
            progress.hint_failed = hint == Some(shape);
            progress.fallback_used = true;
            progress.strategy = Some(PageShape::Unstructured);
            candidates = self
                .extract(PageShape::Unstructured, &page, source, deadline)
                .await?;
        }

        if candidates.is_empty() {
            return Err(Halt::failed(
                RunStatus::ExtractionError,
                "no candidates extracted",
            ));
        }
        progress.found = candidates.len();

        self.checkpoint("validating")?;
        let report = validate_candidates(candidates);
        progress.dropped = report.dropped();
        tracing::debug!(
            "{}: {} accepted, {} without title, {} with inverted window",
            source.id,
            report.accepted.len(),
            report.missing_title,
            report.inverted_window
        );
        if report.all_dropped() {
            return Err(Halt::failed(
                RunStatus::ValidationError,
                format!("all {} candidates rejected by validation", progress.found),
            ));
        }
        let status = if report.dropped() > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Success
        };

        self.checkpoint("deduplicating")?;
        let (fresh, seen) = self
            .dedup
            .partition(&source.id, report.accepted)
            .await
            .map_err(|e| Halt::failed(RunStatus::SinkError, format!("dedup lookup failed: {}", e)))?;
        tracing::debug!("{}: {} new, {} already seen", source.id, fresh.len(), seen);

        self.checkpoint("sinking")?;
        self.sink_all(&source.id, fresh, progress).await?;

        Ok(status)
    }

    /// Fetches with bounded, jittered retries inside the attempt deadline
    async fn fetch_with_retries(
        &self,
        source: &Source,
        deadline: Instant,
        progress: &mut Progress,
    ) -> Result<FetchedPage, Halt> {
        loop {
            progress.fetch_attempts += 1;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(deadline_exceeded("fetching"));
            }
            let timeout = self.policy.fetch_timeout.min(remaining);

            let error = match timeout_at(deadline, self.fetcher.fetch(source, timeout)).await {
                Ok(Ok(page)) => {
                    tracing::debug!(
                        "{}: fetched {} (HTTP {}, {} bytes)",
                        source.id,
                        page.final_url,
                        page.status_code,
                        page.body.len()
                    );
                    return Ok(page);
                }
                Ok(Err(error)) => error,
                Err(_) => return Err(deadline_exceeded("fetching")),
            };

            let retries_left = progress.fetch_attempts <= self.policy.transport_retries;
            if !error.is_retryable() || !retries_left {
                return Err(Halt::failed(error.run_status(), error.to_string()));
            }

            let delay = self.jittered_delay();
            if Instant::now() + delay >= deadline {
                return Err(Halt::failed(error.run_status(), error.to_string()));
            }
            tracing::warn!(
                "{}: fetch attempt {} failed ({}), retrying in {}ms",
                source.id,
                progress.fetch_attempts,
                error,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
            self.checkpoint("fetching")?;
        }
    }

    async fn extract(
        &self,
        shape: PageShape,
        page: &FetchedPage,
        source: &Source,
        deadline: Instant,
    ) -> Result<Vec<CandidateRecord>, Halt> {
        let extractor = self.extractors.for_shape(shape);
        match timeout_at(deadline, extractor.extract(page, &source.selectors)).await {
            Ok(Ok(candidates)) => {
                tracing::debug!("{}: {} extractor found {}", source.id, shape, candidates.len());
                Ok(candidates)
            }
            Ok(Err(e)) => Err(Halt::failed(e.run_status(), e.to_string())),
            Err(_) => Err(deadline_exceeded("extracting")),
        }
    }

    async fn sink_all(
        &self,
        source_id: &str,
        fresh: Vec<(String, CandidateRecord)>,
        progress: &mut Progress,
    ) -> Result<(), Halt> {
        for (token, record) in &fresh {
            match self.sink.sink_record(source_id, record, token).await {
                Ok(true) => progress.new += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!("Failed to sink record for {}: {}", source_id, e);
                    return Err(Halt::failed(
                        RunStatus::SinkError,
                        format!("sink failed after {} of {} records: {}", progress.new, fresh.len(), e),
                    ));
                }
            }
        }
        Ok(())
    }

    fn checkpoint(&self, stage: &'static str) -> Result<(), Halt> {
        if *self.shutdown.borrow() {
            return Err(Halt::Aborted(stage));
        }
        Ok(())
    }

    fn jittered_delay(&self) -> Duration {
        let factor: f64 = rand::thread_rng().gen_range(1.0..2.0);
        self.policy.retry_delay.mul_f64(factor)
    }
}

fn deadline_exceeded(stage: &str) -> Halt {
    Halt::failed(
        RunStatus::Timeout,
        format!("attempt deadline exceeded while {}", stage),
    )
}
