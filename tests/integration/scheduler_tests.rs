//! Scheduler behaviour: single-flight, backoff and state restoration

use crate::common::*;
use chrono::Duration as ChronoDuration;
use notice_harvester::harvest::{Clock, DispatchError, FetchError, SourceScheduler};
use notice_harvester::state::{AttemptResult, PageShape, RunStatus};
use std::time::Duration;
use tokio::task::JoinSet;

fn create_test_scheduler(harness: &Harness, ids: &[&str]) -> SourceScheduler {
    let entries: Vec<_> = ids
        .iter()
        .map(|id| create_test_entry(id, Some(PageShape::Table)))
        .collect();
    SourceScheduler::from_entries(&entries, 4, harness.clock.clone())
}

async fn join_all(tasks: &mut JoinSet<AttemptResult>) -> Vec<AttemptResult> {
    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        results.push(joined.unwrap());
    }
    results
}

#[tokio::test]
async fn test_overlapping_ticks_never_run_a_source_twice() {
    let harness = Harness::new(
        ScriptedFetcher::new().with(
            "rail",
            Script::Slow(Duration::from_millis(300), TABLE_PAGE.to_string()),
        ),
        CountingLlm::answering(TWO_NOTICES_JSON),
    );
    let scheduler = create_test_scheduler(&harness, &["rail"]);
    let mut tasks = JoinSet::new();

    assert_eq!(scheduler.dispatch(&harness.coordinator, &mut tasks), 1);

    // Later ticks while the first attempt is still running, with the clock
    // far enough ahead that the due check alone would pass
    for _ in 0..5 {
        harness.clock.advance(ChronoDuration::hours(3));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(scheduler.dispatch(&harness.coordinator, &mut tasks), 0);
    }
    assert_eq!(scheduler.in_flight_count(), 1);

    let results = join_all(&mut tasks).await;
    assert_eq!(results.len(), 1);
    assert_eq!(harness.fetcher.calls("rail"), 1);
    assert_eq!(harness.fetcher.max_active(), 1);
    assert_eq!(scheduler.in_flight_count(), 0);

    // The marker is released only after the new state is applied
    let state = scheduler.sources()[0].state.clone();
    assert!(state.last_success.is_some());
}

#[tokio::test]
async fn test_finished_source_is_not_due_until_interval() {
    let harness = Harness::new(
        ScriptedFetcher::new().with("rail", Script::Page(TABLE_PAGE.to_string())),
        CountingLlm::answering(TWO_NOTICES_JSON),
    );
    let scheduler = create_test_scheduler(&harness, &["rail"]);
    let mut tasks = JoinSet::new();

    scheduler.dispatch(&harness.coordinator, &mut tasks);
    join_all(&mut tasks).await;

    harness.clock.advance(ChronoDuration::minutes(59));
    assert_eq!(scheduler.dispatch(&harness.coordinator, &mut tasks), 0);

    harness.clock.advance(ChronoDuration::minutes(1));
    assert_eq!(scheduler.dispatch(&harness.coordinator, &mut tasks), 1);
    let results = join_all(&mut tasks).await;

    match &results[0] {
        AttemptResult::Completed(report) => {
            assert_eq!(report.outcome.status, RunStatus::Success);
            assert_eq!(report.outcome.candidates_new, 0);
        }
        AttemptResult::Aborted { .. } => panic!("attempt should complete"),
    }
}

#[tokio::test]
async fn test_worker_pool_bounds_concurrency() {
    let ids = ["a", "b", "c", "d", "e", "f"];
    let mut fetcher = ScriptedFetcher::new();
    for id in ids {
        fetcher = fetcher.with(
            id,
            Script::Slow(Duration::from_millis(100), TABLE_PAGE.to_string()),
        );
    }
    let harness = Harness::new(fetcher, CountingLlm::answering(TWO_NOTICES_JSON));

    let entries: Vec<_> = ids
        .iter()
        .map(|id| create_test_entry(id, Some(PageShape::Table)))
        .collect();
    let scheduler = SourceScheduler::from_entries(&entries, 2, harness.clock.clone());
    let mut tasks = JoinSet::new();

    assert_eq!(scheduler.dispatch(&harness.coordinator, &mut tasks), 6);
    let results = join_all(&mut tasks).await;

    assert_eq!(results.len(), 6);
    assert!(harness.fetcher.max_active() <= 2);
    assert_eq!(harness.store.count_records().unwrap(), 18);
}

#[tokio::test]
async fn test_backoff_grows_to_cap_and_resets() {
    let harness = Harness::new(
        ScriptedFetcher::new().with(
            "down",
            Script::Fail(FetchError::Transport {
                url: "https://example.com/down".to_string(),
                message: "connection refused".to_string(),
            }),
        ),
        CountingLlm::answering(TWO_NOTICES_JSON),
    );
    let scheduler = create_test_scheduler(&harness, &["down"]);
    let mut tasks = JoinSet::new();

    let mut gaps = Vec::new();
    for _ in 0..5 {
        assert_eq!(scheduler.dispatch(&harness.coordinator, &mut tasks), 1);
        join_all(&mut tasks).await;

        let state = scheduler.sources()[0].state.clone();
        let (Some(attempted), Some(next)) = (state.last_attempt, state.next_eligible_at) else {
            panic!("state not written");
        };
        gaps.push((next - attempted).num_minutes());
        harness.clock.set(next);
    }

    // Interval 60m, multiplier doubles per failure up to 8x
    assert_eq!(gaps, vec![120, 240, 480, 480, 480]);
    assert_eq!(scheduler.sources()[0].state.consecutive_failures, 5);

    harness
        .fetcher
        .set("down", Script::Page(TABLE_PAGE.to_string()));
    assert_eq!(scheduler.dispatch(&harness.coordinator, &mut tasks), 1);
    join_all(&mut tasks).await;

    let state = scheduler.sources()[0].state.clone();
    assert_eq!(state.consecutive_failures, 0);
    assert_eq!(
        state.next_eligible_at,
        state.last_attempt.map(|t| t + ChronoDuration::minutes(60))
    );
}

#[tokio::test]
async fn test_failing_source_does_not_block_others() {
    let harness = Harness::new(
        ScriptedFetcher::new()
            .with("rail", Script::Page(TABLE_PAGE.to_string()))
            .with(
                "down",
                Script::Fail(FetchError::Status {
                    url: "https://example.com/down".to_string(),
                    status: 500,
                }),
            ),
        CountingLlm::answering(TWO_NOTICES_JSON),
    );
    let scheduler = create_test_scheduler(&harness, &["down", "rail"]);
    let mut tasks = JoinSet::new();

    scheduler.dispatch(&harness.coordinator, &mut tasks);
    let mut statuses: Vec<_> = join_all(&mut tasks)
        .await
        .into_iter()
        .filter_map(|result| match result {
            AttemptResult::Completed(report) => {
                Some((report.outcome.source_id, report.outcome.status))
            }
            AttemptResult::Aborted { .. } => None,
        })
        .collect();
    statuses.sort_by(|a, b| a.0.cmp(&b.0));

    assert_eq!(
        statuses,
        vec![
            ("down".to_string(), RunStatus::TransportError),
            ("rail".to_string(), RunStatus::Success)
        ]
    );
}

#[tokio::test]
async fn test_restored_state_survives_restart() {
    let harness = Harness::new(
        ScriptedFetcher::new().with("rail", Script::Page(TABLE_PAGE.to_string())),
        CountingLlm::answering(TWO_NOTICES_JSON),
    );
    let scheduler = create_test_scheduler(&harness, &["rail"]);
    let mut tasks = JoinSet::new();
    scheduler.dispatch(&harness.coordinator, &mut tasks);
    join_all(&mut tasks).await;

    // A fresh scheduler over the same store picks up where the first left off
    let restarted = create_test_scheduler(&harness, &["rail"]);
    assert_eq!(restarted.due_sources().len(), 1);
    restarted.restore_states(harness.store.load_source_states().unwrap());
    assert!(restarted.due_sources().is_empty());
    assert_eq!(restarted.sources()[0].state, scheduler.sources()[0].state);
}

#[tokio::test]
async fn test_closed_pool_aborts_queued_attempts() {
    let harness = Harness::new(
        ScriptedFetcher::new().with("rail", Script::Page(TABLE_PAGE.to_string())),
        CountingLlm::answering(TWO_NOTICES_JSON),
    );
    let scheduler = create_test_scheduler(&harness, &["rail"]);
    scheduler.close();

    let mut tasks = JoinSet::new();
    scheduler.dispatch(&harness.coordinator, &mut tasks);
    let results = join_all(&mut tasks).await;

    assert!(matches!(
        results[0],
        AttemptResult::Aborted { stage: "queued", .. }
    ));
    assert_eq!(harness.fetcher.calls("rail"), 0);
    assert!(harness.store.load_source_states().unwrap().is_empty());
    assert_eq!(scheduler.in_flight_count(), 0);
}

#[tokio::test]
async fn test_dispatch_source_ignores_due_time() {
    let harness = Harness::new(
        ScriptedFetcher::new()
            .with("rail", Script::Page(TABLE_PAGE.to_string()))
            .with("port", Script::Page(TABLE_PAGE.to_string())),
        CountingLlm::answering(TWO_NOTICES_JSON),
    );
    let scheduler = create_test_scheduler(&harness, &["rail", "port"]);
    let mut tasks = JoinSet::new();

    scheduler.dispatch(&harness.coordinator, &mut tasks);
    join_all(&mut tasks).await;
    assert!(scheduler.due_sources().is_empty());

    harness.clock.advance(ChronoDuration::minutes(5));
    scheduler
        .dispatch_source(&harness.coordinator, &mut tasks, "rail")
        .unwrap();
    let results = join_all(&mut tasks).await;

    assert_eq!(results.len(), 1);
    assert_eq!(harness.fetcher.calls("rail"), 2);
    assert_eq!(harness.fetcher.calls("port"), 1);

    let rail = scheduler
        .sources()
        .into_iter()
        .find(|s| s.id == "rail")
        .unwrap();
    assert_eq!(rail.state.last_attempt, Some(harness.clock.now()));
}

#[tokio::test]
async fn test_dispatch_source_respects_single_flight() {
    let harness = Harness::new(
        ScriptedFetcher::new().with(
            "rail",
            Script::Slow(Duration::from_millis(200), TABLE_PAGE.to_string()),
        ),
        CountingLlm::answering(TWO_NOTICES_JSON),
    );
    let scheduler = create_test_scheduler(&harness, &["rail"]);
    let mut tasks = JoinSet::new();

    scheduler
        .dispatch_source(&harness.coordinator, &mut tasks, "rail")
        .unwrap();
    assert_eq!(
        scheduler.dispatch_source(&harness.coordinator, &mut tasks, "rail"),
        Err(DispatchError::InFlight("rail".to_string()))
    );
    assert_eq!(
        scheduler.dispatch_source(&harness.coordinator, &mut tasks, "missing"),
        Err(DispatchError::UnknownSource("missing".to_string()))
    );

    let results = join_all(&mut tasks).await;
    assert_eq!(results.len(), 1);
    assert_eq!(harness.fetcher.max_active(), 1);
    assert_eq!(scheduler.in_flight_count(), 0);
}
