//! Language-model fallback extraction
//!
//! The model is a black box behind [`LlmService`]: normalized page text and a
//! task description go in, text that should contain JSON comes out. Anything
//! that cannot be read as notice records is treated as an empty result.

use crate::config::SelectorHints;
use crate::extract::dates::parse_date;
use crate::extract::text::{strip_boilerplate, truncate_chars, visible_text};
use crate::extract::{CandidateRecord, ExtractError, Extractor};
use crate::harvest::FetchedPage;
use crate::state::PageShape;
use async_trait::async_trait;
use scraper::Html;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Pages with less visible text than this skip the model call
pub const MIN_TEXT_CHARS: usize = 50;

/// Raw responses are cut to this length in diagnostics
const RAW_LOG_CHARS: usize = 500;

pub const TASK_INSTRUCTION: &str = "Analyze the following text and extract every tender, \
notification or empanelment opportunity it announces. Respond with JSON of the form \
{\"notifications\": [...]} using the listed fields; use null for any field that is not present.";

/// Fields requested from the model
pub const EXPECTED_FIELDS: [&str; 7] = [
    "title",
    "tender_id",
    "location",
    "category",
    "start_date",
    "end_date",
    "description",
];

/// Failure of the external model service
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("LLM service unreachable: {0}")]
    Transport(String),

    #[error("LLM request timed out")]
    Timeout,

    #[error("LLM service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode LLM service response: {0}")]
    Decode(String),
}

/// One extraction request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmRequest {
    pub text: String,
    pub instruction: String,
    pub fields: Vec<String>,
}

impl LlmRequest {
    pub fn for_notices(text: String) -> Self {
        Self {
            text,
            instruction: TASK_INSTRUCTION.to_string(),
            fields: EXPECTED_FIELDS.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// External text-to-structured-data service
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Returns the model's raw text answer
    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError>;
}

/// Extractor that delegates to a language model
pub struct LlmExtractor {
    service: Arc<dyn LlmService>,
    max_input_chars: usize,
}

impl LlmExtractor {
    pub fn new(service: Arc<dyn LlmService>, max_input_chars: usize) -> Self {
        Self {
            service,
            max_input_chars,
        }
    }
}

#[async_trait]
impl Extractor for LlmExtractor {
    fn shape(&self) -> PageShape {
        PageShape::Unstructured
    }

    async fn extract(
        &self,
        page: &FetchedPage,
        hints: &SelectorHints,
    ) -> Result<Vec<CandidateRecord>, ExtractError> {
        let text = prepare_text(&page.body, hints.content_selector.as_deref(), self.max_input_chars);
        if text.chars().count() < MIN_TEXT_CHARS {
            debug!(url = %page.final_url, "Too little text for LLM extraction");
            return Ok(Vec::new());
        }

        let raw = self.service.complete(&LlmRequest::for_notices(text)).await?;

        match parse_llm_response(&raw) {
            Some(records) => Ok(records),
            None => {
                warn!(
                    url = %page.final_url,
                    raw = %truncate_chars(&raw, RAW_LOG_CHARS),
                    "Discarding unparseable LLM response"
                );
                Ok(Vec::new())
            }
        }
    }
}

/// Normalized page text sent to the model
pub fn prepare_text(body: &str, content_selector: Option<&str>, max_chars: usize) -> String {
    let document = Html::parse_document(body);
    let text = strip_boilerplate(&visible_text(&document, content_selector));
    truncate_chars(&text, max_chars).to_string()
}

/// Reads notice records from a model answer
///
/// Accepts JSON inside Markdown code fences or embedded in prose, shaped as
/// `{"notifications": [...]}`, `{"records": [...]}`, a single record object
/// or a bare array. Returns None when no JSON of those shapes is present.
pub fn parse_llm_response(raw: &str) -> Option<Vec<CandidateRecord>> {
    let value = find_json(raw)?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut object) => {
            let listed = ["notifications", "records", "notices", "tenders"]
                .iter()
                .find_map(|key| object.remove(*key));
            match listed {
                Some(Value::Array(items)) => items,
                Some(_) => return None,
                None if object.contains_key("title") => vec![Value::Object(object)],
                None => return None,
            }
        }
        _ => return None,
    };

    Some(
        items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(fields) => Some(record_from_object(fields)),
                _ => None,
            })
            .collect(),
    )
}

fn find_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    if let Some(fenced) = fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str(fenced) {
            return Some(value);
        }
    }

    // Widest span between an opening and closing bracket of the same kind
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                    return Some(value);
                }
            }
        }
    }

    None
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    // Skip an optional language tag on the fence line
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

fn record_from_object(mut fields: Map<String, Value>) -> CandidateRecord {
    let mut take = |keys: &[&str]| -> Option<String> {
        keys.iter()
            .filter_map(|key| fields.remove(*key))
            .find_map(|value| value_to_string(&value))
    };

    let title = take(&["title", "tender_name", "name", "subject"]);
    let location = take(&["location", "place"]);
    let category = take(&["category", "type"]);
    let valid_from = take(&["start_date", "start", "valid_from", "publish_date"])
        .and_then(|s| parse_date(&s));
    let valid_until = take(&["end_date", "end", "valid_until", "closing_date", "due_date"])
        .and_then(|s| parse_date(&s));
    let body = take(&["description", "body", "summary"]);
    let reference = take(&["tender_id", "reference", "reference_no"]);

    let mut record = CandidateRecord {
        title,
        location,
        category,
        valid_from,
        valid_until,
        body,
        ..CandidateRecord::default()
    };
    if let Some(reference) = reference {
        record.set_extra("reference", reference);
    }
    for (key, value) in fields {
        if !value.is_null() {
            record.extras.insert(key, value);
        }
    }

    record
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
