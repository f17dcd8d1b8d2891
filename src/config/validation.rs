use crate::config::types::{
    Config, HarvesterConfig, LlmConfig, SelectorHints, SourceEntry, UserAgentConfig,
    MAX_DURATION_SECS, MAX_INTERVAL_MINUTES,
};
use crate::ConfigError;
use scraper::Selector;
use std::collections::HashSet;
use url::Url;

/// Canonical field names accepted as `header-mapping` targets
const CANONICAL_FIELDS: [&str; 6] = ["title", "reference", "location", "category", "start", "end"];

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_harvester_config(&config.harvester)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_llm_config(&config.llm)?;

    if config.output.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    validate_sources(&config.sources)?;
    Ok(())
}

/// Validates scheduling and retry policy
fn validate_harvester_config(config: &HarvesterConfig) -> Result<(), ConfigError> {
    if config.max_concurrent_runs < 1 || config.max_concurrent_runs > 64 {
        return Err(ConfigError::Validation(format!(
            "max_concurrent_runs must be between 1 and 64, got {}",
            config.max_concurrent_runs
        )));
    }

    check_duration_secs("tick_interval_secs", config.tick_interval_secs)?;
    check_duration_secs("fetch_timeout_secs", config.fetch_timeout_secs)?;
    check_duration_secs("attempt_deadline_secs", config.attempt_deadline_secs)?;

    if config.attempt_deadline_secs < config.fetch_timeout_secs {
        return Err(ConfigError::Validation(format!(
            "attempt_deadline_secs ({}) must be >= fetch_timeout_secs ({})",
            config.attempt_deadline_secs, config.fetch_timeout_secs
        )));
    }

    if config.transport_retries > 5 {
        return Err(ConfigError::Validation(format!(
            "transport_retries must be <= 5, got {}",
            config.transport_retries
        )));
    }

    if config.max_backoff_multiplier < 1 || config.max_backoff_multiplier > 64 {
        return Err(ConfigError::Validation(format!(
            "max_backoff_multiplier must be between 1 and 64, got {}",
            config.max_backoff_multiplier
        )));
    }

    Ok(())
}

fn check_duration_secs(name: &str, value: u64) -> Result<(), ConfigError> {
    if value < 1 || value > MAX_DURATION_SECS {
        return Err(ConfigError::Validation(format!(
            "{} must be between 1 and {}, got {}",
            name, MAX_DURATION_SECS, value
        )));
    }
    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    if !config.contact_email.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            config.contact_email
        )));
    }

    Ok(())
}

fn validate_llm_config(config: &LlmConfig) -> Result<(), ConfigError> {
    validate_http_url(&config.endpoint, "llm endpoint")?;

    if config.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm model cannot be empty".to_string()));
    }

    check_duration_secs("llm timeout_secs", config.timeout_secs)?;

    if config.max_input_chars < 100 {
        return Err(ConfigError::Validation(format!(
            "max_input_chars must be >= 100, got {}",
            config.max_input_chars
        )));
    }

    Ok(())
}

/// Validates the ordered source list
fn validate_sources(sources: &[SourceEntry]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for source in sources {
        if source.id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "source id cannot be empty".to_string(),
            ));
        }

        if !seen.insert(source.id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate source id '{}'",
                source.id
            )));
        }

        validate_http_url(&source.url, &format!("source '{}'", source.id))?;

        if source.min_interval_minutes < 1 || source.min_interval_minutes > MAX_INTERVAL_MINUTES {
            return Err(ConfigError::Validation(format!(
                "source '{}': min_interval_minutes must be between 1 and {}, got {}",
                source.id, MAX_INTERVAL_MINUTES, source.min_interval_minutes
            )));
        }

        validate_selectors(&source.id, &source.selectors)?;
    }

    Ok(())
}

fn validate_selectors(source_id: &str, hints: &SelectorHints) -> Result<(), ConfigError> {
    let selectors = [
        &hints.table_selector,
        &hints.list_selector,
        &hints.item_selector,
        &hints.content_selector,
    ];

    for selector in selectors.into_iter().flatten() {
        if Selector::parse(selector).is_err() {
            return Err(ConfigError::InvalidSelector(format!(
                "source '{}': '{}'",
                source_id, selector
            )));
        }
    }

    for (header, field) in &hints.header_mapping {
        if !CANONICAL_FIELDS.contains(&field.as_str()) {
            return Err(ConfigError::Validation(format!(
                "source '{}': header '{}' maps to unknown field '{}'",
                source_id, header, field
            )));
        }
    }

    Ok(())
}

fn validate_http_url(raw: &str, what: &str) -> Result<(), ConfigError> {
    let url = Url::parse(raw)
        .map_err(|e| ConfigError::InvalidUrl(format!("{}: '{}': {}", what, raw, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "{}: '{}' must use http or https",
            what, raw
        )));
    }

    Ok(())
}
