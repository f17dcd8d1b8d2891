//! End-to-end harvest runs: config file, mock publishers, mock model, SQLite

use crate::common::*;
use notice_harvester::config::load_config_with_hash;
use notice_harvester::harvest::{run_harvest, DispatchError, HarvestMode};
use notice_harvester::HarvestError;
use notice_harvester::output::load_statistics;
use notice_harvester::state::RunStatus;
use notice_harvester::storage::SqliteStore;
use serde_json::json;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};
use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn start_publisher() -> MockServer {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/tenders"))
        .respond_with(ResponseTemplate::new(200).set_body_string(TABLE_PAGE))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/circulars"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PROSE_PAGE))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": TWO_NOTICES_JSON,
            "done": true
        })))
        .mount(&mock_server)
        .await;

    mock_server
}

fn write_config(base_url: &str, db_path: &Path) -> NamedTempFile {
    let content = format!(
        r#"
[harvester]
max-concurrent-runs = 2
tick-interval-secs = 1
fetch-timeout-secs = 5
attempt-deadline-secs = 10
transport-retries = 0

[user-agent]
crawler-name = "TestHarvester"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "test@example.com"

[llm]
endpoint = "{base}"
model = "test-model"
timeout-secs = 5

[output]
database-path = "{db}"

[[source]]
id = "tenders"
name = "Tender board"
url = "{base}/tenders"
page-shape = "table"

[[source]]
id = "circulars"
name = "Circulars"
url = "{base}/circulars"
page-shape = "unstructured"

[[source]]
id = "archived"
name = "Archived board"
url = "{base}/archived"
active = false
"#,
        base = base_url,
        db = db_path.display()
    );

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn db_path(dir: &TempDir) -> PathBuf {
    dir.path().join("data").join("notices.db")
}

#[tokio::test]
async fn test_single_pass_harvest() {
    let mock_server = start_publisher().await;
    let dir = TempDir::new().unwrap();
    let config_file = write_config(&mock_server.uri(), &db_path(&dir));
    let (config, _) = load_config_with_hash(config_file.path()).unwrap();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let summary = run_harvest(config_file.path(), config.clone(), HarvestMode::Once, shutdown_rx.clone())
        .await
        .unwrap();

    assert_eq!(summary.completed(), 2);
    assert_eq!(summary.by_status.get(&RunStatus::Success), Some(&2));
    assert_eq!(summary.new_records, 5);
    assert_eq!(summary.worker_failures, 0);

    let store = SqliteStore::new(&db_path(&dir)).unwrap();
    let stats = load_statistics(&store, chrono::Utc::now()).unwrap();
    assert_eq!(stats.total_records, 5);
    assert_eq!(stats.latest_outcomes.len(), 2);
    assert!(stats.backing_off.is_empty());
    drop(store);

    // Restored state keeps both sources waiting for their interval
    let summary = run_harvest(config_file.path(), config, HarvestMode::Once, shutdown_rx)
        .await
        .unwrap();
    assert_eq!(summary.completed(), 0);
    assert_eq!(summary.new_records, 0);
}

#[tokio::test]
async fn test_harvest_loop_stops_on_shutdown() {
    let mock_server = start_publisher().await;
    let dir = TempDir::new().unwrap();
    let config_file = write_config(&mock_server.uri(), &db_path(&dir));
    let (config, _) = load_config_with_hash(config_file.path()).unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let config_path = config_file.path().to_path_buf();
    let handle = tokio::spawn(async move {
        run_harvest(&config_path, config, HarvestMode::Continuous, shutdown_rx).await
    });

    tokio::time::sleep(Duration::from_millis(1500)).await;
    shutdown_tx.send(true).unwrap();

    let summary = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("harvest loop did not stop")
        .unwrap()
        .unwrap();

    // Both sources ran once; later ticks found nothing due
    assert_eq!(summary.completed(), 2);
    assert_eq!(summary.new_records, 5);
}

#[tokio::test]
async fn test_unreachable_publisher_backs_off() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let config_file = write_config(&mock_server.uri(), &db_path(&dir));
    let (config, _) = load_config_with_hash(config_file.path()).unwrap();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let summary = run_harvest(config_file.path(), config, HarvestMode::Once, shutdown_rx)
        .await
        .unwrap();
    assert_eq!(summary.by_status.get(&RunStatus::TransportError), Some(&2));

    let store = SqliteStore::new(&db_path(&dir)).unwrap();
    let stats = load_statistics(&store, chrono::Utc::now()).unwrap();
    let backing_off: Vec<_> = stats
        .backing_off
        .iter()
        .map(|s| (s.source_id.as_str(), s.consecutive_failures))
        .collect();
    assert_eq!(backing_off, vec![("circulars", 1), ("tenders", 1)]);
}

#[tokio::test]
async fn test_single_source_runs_before_it_is_due() {
    let mock_server = start_publisher().await;
    let dir = TempDir::new().unwrap();
    let config_file = write_config(&mock_server.uri(), &db_path(&dir));
    let (config, _) = load_config_with_hash(config_file.path()).unwrap();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    run_harvest(config_file.path(), config.clone(), HarvestMode::Once, shutdown_rx.clone())
        .await
        .unwrap();

    let summary = run_harvest(
        config_file.path(),
        config.clone(),
        HarvestMode::Source("tenders".to_string()),
        shutdown_rx.clone(),
    )
    .await
    .unwrap();
    assert_eq!(summary.completed(), 1);
    assert_eq!(summary.by_status.get(&RunStatus::Success), Some(&1));
    assert_eq!(summary.new_records, 0);

    let error = run_harvest(
        config_file.path(),
        config,
        HarvestMode::Source("missing".to_string()),
        shutdown_rx,
    )
    .await
    .unwrap_err();
    assert!(matches!(
        error,
        HarvestError::Dispatch(DispatchError::UnknownSource(_))
    ));
}
