use crate::state::PageShape;
use serde::Deserialize;
use std::collections::HashMap;

/// Longest accepted re-scrape interval (one year)
pub const MAX_INTERVAL_MINUTES: u64 = 525_600;

/// Longest accepted tick, timeout or deadline (one day)
pub const MAX_DURATION_SECS: u64 = 86_400;

/// Main configuration structure for the harvester
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub harvester: HarvesterConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    pub output: OutputConfig,
    #[serde(default, rename = "source")]
    pub sources: Vec<SourceEntry>,
}

/// Scheduling, retry and deadline policy
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HarvesterConfig {
    /// Size of the worker pool (concurrent source runs)
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: u32,

    /// Seconds between scheduler ticks
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// Hard wall-clock timeout for a single page fetch
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Deadline covering fetching and extraction for one attempt
    #[serde(default = "default_attempt_deadline_secs")]
    pub attempt_deadline_secs: u64,

    /// Extra fetch attempts after a transport error or timeout
    #[serde(default = "default_transport_retries")]
    pub transport_retries: u32,

    /// Base delay between fetch retries (milliseconds, jittered)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Cap on the exponential backoff multiplier applied after failures
    #[serde(default = "default_max_backoff_multiplier")]
    pub max_backoff_multiplier: u32,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: default_max_concurrent_runs(),
            tick_interval_secs: default_tick_interval_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            attempt_deadline_secs: default_attempt_deadline_secs(),
            transport_retries: default_transport_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_backoff_multiplier: default_max_backoff_multiplier(),
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the harvester
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the harvester
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the harvester
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for harvester-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

/// Language model service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LlmConfig {
    /// Base URL of the Ollama-compatible service
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// Model name passed to the service
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum characters of page text sent per request
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout_secs(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// One `[[source]]` descriptor
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SourceEntry {
    /// Stable identity used as the dedup and state key
    pub id: String,

    /// Human-readable publisher name
    pub name: String,

    /// Page to harvest
    pub url: String,

    /// Declared page shape; classified heuristically when absent
    #[serde(default)]
    pub page_shape: Option<PageShape>,

    /// Minimum time between attempts
    #[serde(default = "default_min_interval_minutes")]
    pub min_interval_minutes: u64,

    #[serde(default = "default_true")]
    pub active: bool,

    #[serde(default)]
    pub selectors: SelectorHints,
}

/// Optional CSS selectors and header aliases for one source
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SelectorHints {
    pub table_selector: Option<String>,
    pub list_selector: Option<String>,
    pub item_selector: Option<String>,
    pub content_selector: Option<String>,

    /// Header text (case-insensitive) to canonical field name
    #[serde(default)]
    pub header_mapping: HashMap<String, String>,
}

fn default_max_concurrent_runs() -> u32 {
    5
}

fn default_tick_interval_secs() -> u64 {
    60
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_attempt_deadline_secs() -> u64 {
    120
}

fn default_transport_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_max_backoff_multiplier() -> u32 {
    8
}

fn default_llm_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_llm_model() -> String {
    "llama3".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_max_input_chars() -> usize {
    12_000
}

fn default_min_interval_minutes() -> u64 {
    1440
}

fn default_true() -> bool {
    true
}
