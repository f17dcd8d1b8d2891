use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Unvalidated notice produced by an extractor
///
/// Only records that pass validation and deduplication are persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CandidateRecord {
    /// Required; records without a title are dropped by the validator
    pub title: Option<String>,
    pub location: Option<String>,
    pub category: Option<String>,
    pub valid_from: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
    pub body: Option<String>,

    /// Fields the extractors cannot normalize generically
    ///
    /// Well-known keys: `reference`, `link`.
    pub extras: BTreeMap<String, Value>,
}

impl CandidateRecord {
    pub fn with_title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// Inserts a string extra, ignoring blank values
    pub fn set_extra(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        if !value.trim().is_empty() {
            self.extras.insert(key.to_string(), Value::String(value));
        }
    }
}
