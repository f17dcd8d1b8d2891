//! Run coordinator scenarios against fake fetchers, models and sinks

use crate::common::*;
use chrono::Duration as ChronoDuration;
use notice_harvester::extract::{ExtractorSet, LlmError};
use notice_harvester::harvest::{Clock, FetchError, RunCoordinator, RunPolicy};
use notice_harvester::state::{AttemptResult, PageShape, RunReport, RunStatus, SourceState};
use notice_harvester::storage::SqliteStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn completed(result: AttemptResult) -> RunReport {
    match result {
        AttemptResult::Completed(report) => report,
        AttemptResult::Aborted { stage, .. } => panic!("attempt aborted before {}", stage),
    }
}

#[tokio::test]
async fn test_table_hint_with_three_rows() {
    let harness = Harness::new(
        ScriptedFetcher::new().with("rail", Script::Page(TABLE_PAGE.to_string())),
        CountingLlm::answering(TWO_NOTICES_JSON),
    );
    let mut source = create_test_source("rail", Some(PageShape::Table));
    source.state.consecutive_failures = 2;

    let report = completed(harness.coordinator.run(source).await);

    assert_eq!(report.outcome.status, RunStatus::Success);
    assert_eq!(report.outcome.strategy, Some(PageShape::Table));
    assert!(!report.outcome.fallback_used);
    assert_eq!(report.outcome.candidates_found, 3);
    assert_eq!(report.outcome.candidates_new, 3);
    assert_eq!(report.state.consecutive_failures, 0);
    assert_eq!(report.state.last_success, Some(t0()));
    assert_eq!(report.state.next_eligible_at, Some(t0() + ChronoDuration::minutes(60)));
    assert_eq!(harness.llm.calls(), 0);

    let stored = harness.store.records_for_source("rail").unwrap();
    let titles: Vec<_> = stored
        .iter()
        .filter_map(|r| r.record.title.as_deref())
        .collect();
    assert_eq!(
        titles,
        vec![
            "Road repair at depot",
            "Boundary wall construction",
            "Painting of office buildings"
        ]
    );

    let states = harness.store.load_source_states().unwrap();
    assert_eq!(states.get("rail"), Some(&report.state));
}

#[tokio::test]
async fn test_unparseable_table_falls_back_to_llm_once() {
    let harness = Harness::new(
        ScriptedFetcher::new().with("bank", Script::Page(PROSE_PAGE.to_string())),
        CountingLlm::answering(TWO_NOTICES_JSON),
    );
    let source = create_test_source("bank", Some(PageShape::Table));

    let report = completed(harness.coordinator.run(source).await);

    assert_eq!(harness.llm.calls(), 1);
    assert_eq!(report.outcome.status, RunStatus::Success);
    assert!(report.outcome.fallback_used);
    assert_eq!(report.outcome.strategy, Some(PageShape::Unstructured));
    assert_eq!(report.outcome.candidates_new, 2);
    assert!(report.state.hint_invalidated);
}

#[tokio::test]
async fn test_invalidated_hint_is_not_reused() {
    let harness = Harness::new(
        ScriptedFetcher::new().with("bank", Script::Page(PROSE_PAGE.to_string())),
        CountingLlm::answering(TWO_NOTICES_JSON),
    );
    let mut source = create_test_source("bank", Some(PageShape::Table));
    source.state.hint_invalidated = true;

    let report = completed(harness.coordinator.run(source).await);

    // Heuristic classification picks the model directly, no fallback hop
    assert!(!report.outcome.fallback_used);
    assert_eq!(report.outcome.strategy, Some(PageShape::Unstructured));
    assert!(report.state.hint_invalidated);
    assert_eq!(harness.llm.calls(), 1);
}

#[tokio::test]
async fn test_heuristic_classification_without_hint() {
    let harness = Harness::new(
        ScriptedFetcher::new().with("rail", Script::Page(TABLE_PAGE.to_string())),
        CountingLlm::answering(TWO_NOTICES_JSON),
    );

    let report = completed(
        harness
            .coordinator
            .run(create_test_source("rail", None))
            .await,
    );

    assert_eq!(report.outcome.strategy, Some(PageShape::Table));
    assert_eq!(report.outcome.candidates_new, 3);
    assert!(!report.state.hint_invalidated);
    assert_eq!(harness.llm.calls(), 0);
}

#[tokio::test]
async fn test_empty_fallback_is_extraction_error() {
    let harness = Harness::new(
        ScriptedFetcher::new().with("bank", Script::Page(PROSE_PAGE.to_string())),
        CountingLlm::answering(r#"{"notifications": []}"#),
    );
    let mut source = create_test_source("bank", Some(PageShape::List));
    source.state.consecutive_failures = 1;

    let report = completed(harness.coordinator.run(source).await);

    assert_eq!(report.outcome.status, RunStatus::ExtractionError);
    assert_eq!(harness.llm.calls(), 1);
    // Extraction errors keep the counter and the base interval
    assert_eq!(report.state.consecutive_failures, 1);
    assert_eq!(report.state.next_eligible_at, Some(t0() + ChronoDuration::minutes(60)));
}

#[tokio::test]
async fn test_fetch_past_deadline_is_timeout() {
    let policy = RunPolicy {
        fetch_timeout: Duration::from_millis(100),
        attempt_deadline: Duration::from_millis(200),
        transport_retries: 0,
        ..fast_policy()
    };
    let harness = Harness::with_policy(
        ScriptedFetcher::new().with(
            "slow",
            Script::Slow(Duration::from_secs(5), TABLE_PAGE.to_string()),
        ),
        CountingLlm::answering(TWO_NOTICES_JSON),
        policy,
    );

    let mut source = create_test_source("slow", Some(PageShape::Table));
    let last_success = t0() - ChronoDuration::days(1);
    source.state = SourceState {
        last_attempt: Some(last_success),
        last_success: Some(last_success),
        consecutive_failures: 1,
        ..SourceState::default()
    };

    let report = completed(harness.coordinator.run(source).await);

    assert_eq!(report.outcome.status, RunStatus::Timeout);
    assert_eq!(report.outcome.candidates_found, 0);
    assert_eq!(report.state.last_success, Some(last_success));
    assert_eq!(report.state.last_attempt, Some(t0()));
    assert_eq!(report.state.consecutive_failures, 2);
    assert_eq!(
        report.state.next_eligible_at,
        Some(t0() + ChronoDuration::minutes(60 * 4))
    );
    assert!(report.outcome.duration_ms < 5000);
}

#[tokio::test]
async fn test_slow_llm_past_deadline_is_timeout() {
    let harness = Harness::new(
        ScriptedFetcher::new().with("prose", Script::Page(PROSE_PAGE.to_string())),
        CountingLlm::answering(TWO_NOTICES_JSON).with_delay(Duration::from_secs(5)),
    );

    let source = create_test_source("prose", Some(PageShape::Unstructured));
    let report = completed(harness.coordinator.run(source).await);

    assert_eq!(report.outcome.status, RunStatus::Timeout);
    assert_eq!(report.outcome.fetch_attempts, 1);
    assert_eq!(report.outcome.candidates_new, 0);
    assert_eq!(report.state.consecutive_failures, 1);
    assert_eq!(report.state.last_success, None);
    assert_eq!(
        report.state.next_eligible_at,
        Some(t0() + ChronoDuration::minutes(60 * 2))
    );
    assert_eq!(harness.llm.calls(), 1);
    assert_eq!(harness.store.count_records().unwrap(), 0);
    assert!(report.outcome.duration_ms < 5000);
}

#[tokio::test]
async fn test_fetch_timeouts_are_retried_within_attempt() {
    let harness = Harness::new(
        ScriptedFetcher::new().with(
            "flaky",
            Script::Fail(FetchError::Timeout {
                url: "https://example.com/flaky".to_string(),
            }),
        ),
        CountingLlm::answering(TWO_NOTICES_JSON),
    );

    let report = completed(
        harness
            .coordinator
            .run(create_test_source("flaky", None))
            .await,
    );

    assert_eq!(report.outcome.status, RunStatus::Timeout);
    assert_eq!(report.outcome.fetch_attempts, 3);
    assert_eq!(harness.fetcher.calls("flaky"), 3);
    assert_eq!(report.state.consecutive_failures, 1);
}

#[tokio::test]
async fn test_transient_transport_error_recovers() {
    let harness = Harness::new(
        ScriptedFetcher::new().with("rail", Script::FailThen(1, TABLE_PAGE.to_string())),
        CountingLlm::answering(TWO_NOTICES_JSON),
    );

    let report = completed(
        harness
            .coordinator
            .run(create_test_source("rail", Some(PageShape::Table)))
            .await,
    );

    assert_eq!(report.outcome.status, RunStatus::Success);
    assert_eq!(report.outcome.fetch_attempts, 2);
    assert_eq!(report.state.consecutive_failures, 0);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let harness = Harness::new(ScriptedFetcher::new(), CountingLlm::answering(TWO_NOTICES_JSON));

    let report = completed(
        harness
            .coordinator
            .run(create_test_source("missing", None))
            .await,
    );

    assert_eq!(report.outcome.status, RunStatus::TransportError);
    assert_eq!(report.outcome.fetch_attempts, 1);
    assert!(report.outcome.message.unwrap().contains("404"));
}

#[tokio::test]
async fn test_second_run_finds_nothing_new() {
    let harness = Harness::new(
        ScriptedFetcher::new().with("rail", Script::Page(TABLE_PAGE.to_string())),
        CountingLlm::answering(TWO_NOTICES_JSON),
    );
    let source = create_test_source("rail", Some(PageShape::Table));

    let first = completed(harness.coordinator.run(source.clone()).await);
    assert_eq!(first.outcome.candidates_new, 3);

    harness.clock.advance(ChronoDuration::hours(2));
    let mut again = source;
    again.state = first.state;
    let second = completed(harness.coordinator.run(again).await);

    assert_eq!(second.outcome.status, RunStatus::Success);
    assert_eq!(second.outcome.candidates_found, 3);
    assert_eq!(second.outcome.candidates_new, 0);
    assert_eq!(harness.store.count_records().unwrap(), 3);
}

#[tokio::test]
async fn test_validation_error_only_when_all_dropped() {
    let untitled = r#"{"notifications": [{"title": null, "location": "Delhi"}, {"title": "  "}]}"#;
    let harness = Harness::new(
        ScriptedFetcher::new().with("bank", Script::Page(PROSE_PAGE.to_string())),
        CountingLlm::answering(untitled),
    );

    let report = completed(
        harness
            .coordinator
            .run(create_test_source("bank", Some(PageShape::Unstructured)))
            .await,
    );

    assert_eq!(report.outcome.status, RunStatus::ValidationError);
    assert_eq!(report.outcome.candidates_found, 2);
    assert_eq!(report.outcome.candidates_dropped, 2);
    assert_eq!(report.state.consecutive_failures, 0);
    assert_eq!(harness.store.count_records().unwrap(), 0);
}

#[tokio::test]
async fn test_some_dropped_is_partial() {
    let mixed = r#"{"notifications": [
        {"title": "Valid notice", "start_date": "2024-03-01", "end_date": "2024-03-10"},
        {"title": "Inverted window", "start_date": "2024-03-10", "end_date": "2024-03-01"},
        {"title": "Another valid notice"}
    ]}"#;
    let harness = Harness::new(
        ScriptedFetcher::new().with("bank", Script::Page(PROSE_PAGE.to_string())),
        CountingLlm::answering(mixed),
    );

    let report = completed(
        harness
            .coordinator
            .run(create_test_source("bank", None))
            .await,
    );

    assert_eq!(report.outcome.status, RunStatus::Partial);
    assert_eq!(report.outcome.candidates_found, 3);
    assert_eq!(report.outcome.candidates_dropped, 1);
    assert_eq!(report.outcome.candidates_new, 2);
    assert_eq!(report.state.last_success, Some(t0()));
}

#[tokio::test]
async fn test_llm_failure_is_transport_error() {
    let harness = Harness::new(
        ScriptedFetcher::new().with("bank", Script::Page(PROSE_PAGE.to_string())),
        CountingLlm::failing(LlmError::Transport("connection refused".to_string())),
    );

    let report = completed(
        harness
            .coordinator
            .run(create_test_source("bank", None))
            .await,
    );
    assert_eq!(report.outcome.status, RunStatus::TransportError);
    assert_eq!(report.state.consecutive_failures, 1);

    let harness = Harness::new(
        ScriptedFetcher::new().with("bank", Script::Page(PROSE_PAGE.to_string())),
        CountingLlm::failing(LlmError::Timeout),
    );
    let report = completed(
        harness
            .coordinator
            .run(create_test_source("bank", None))
            .await,
    );
    assert_eq!(report.outcome.status, RunStatus::Timeout);
}

#[tokio::test]
async fn test_sink_failure_is_reported() {
    let fetcher = Arc::new(ScriptedFetcher::new().with("rail", Script::Page(TABLE_PAGE.to_string())));
    let sink = Arc::new(RejectingSink {
        inner: SqliteStore::open_in_memory().unwrap(),
    });
    let clock: Arc<dyn Clock> = Arc::new(notice_harvester::harvest::ManualClock::new(t0()));
    let coordinator = RunCoordinator::new(
        fast_policy(),
        fetcher,
        ExtractorSet::new(Arc::new(CountingLlm::answering(TWO_NOTICES_JSON)), 4000),
        sink.clone(),
        clock,
    );

    let report = completed(
        coordinator
            .run(create_test_source("rail", Some(PageShape::Table)))
            .await,
    );

    assert_eq!(report.outcome.status, RunStatus::SinkError);
    assert_eq!(report.outcome.candidates_found, 3);
    assert_eq!(report.outcome.candidates_new, 0);
    assert!(report.outcome.message.unwrap().contains("disk full"));

    // The outcome itself still reached the sink
    let latest = sink.inner.latest_outcomes().unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].status, RunStatus::SinkError);
}

#[tokio::test]
async fn test_shutdown_aborts_without_writes() {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let fetcher = Arc::new(ScriptedFetcher::new().with("rail", Script::Page(TABLE_PAGE.to_string())));
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let clock: Arc<dyn Clock> = Arc::new(notice_harvester::harvest::ManualClock::new(t0()));
    let coordinator = RunCoordinator::new(
        fast_policy(),
        fetcher.clone(),
        ExtractorSet::new(Arc::new(CountingLlm::answering(TWO_NOTICES_JSON)), 4000),
        store.clone(),
        clock,
    )
    .with_shutdown(shutdown_rx);

    shutdown_tx.send(true).unwrap();
    let result = coordinator
        .run(create_test_source("rail", Some(PageShape::Table)))
        .await;

    match result {
        AttemptResult::Aborted { source_id, stage } => {
            assert_eq!(source_id, "rail");
            assert_eq!(stage, "fetching");
        }
        AttemptResult::Completed(_) => panic!("expected the attempt to abort"),
    }
    assert_eq!(fetcher.calls("rail"), 0);
    assert!(store.latest_outcomes().unwrap().is_empty());
    assert!(store.load_source_states().unwrap().is_empty());
}
