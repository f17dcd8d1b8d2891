//! Extraction strategies
//!
//! Three extractors share one capability, [`Extractor`]: a structural
//! affinity score used for classification, and `extract`, which turns a page
//! into candidate records. Structured extractors signal weakness by returning
//! nothing; only infrastructure failures surface as errors.

pub mod dates;
pub mod fields;
pub mod list;
pub mod llm;
pub mod ollama;
pub mod strategy;
pub mod table;
pub mod text;
mod types;

pub use list::ListExtractor;
pub use llm::{LlmError, LlmExtractor, LlmRequest, LlmService};
pub use ollama::OllamaClient;
pub use strategy::StrategySelector;
pub use table::TableExtractor;
pub use types::CandidateRecord;

use crate::config::SelectorHints;
use crate::harvest::FetchedPage;
use crate::state::{PageShape, RunStatus};
use async_trait::async_trait;
use scraper::Html;
use std::sync::Arc;
use thiserror::Error;

/// Infrastructure failure during extraction
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    #[error("LLM extraction failed: {0}")]
    Llm(#[from] LlmError),
}

impl ExtractError {
    pub fn run_status(&self) -> RunStatus {
        match self {
            Self::Llm(LlmError::Timeout) => RunStatus::Timeout,
            Self::Llm(_) => RunStatus::TransportError,
        }
    }
}

/// One extraction strategy
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Shape this extractor handles
    fn shape(&self) -> PageShape;

    /// How strongly the page shows this extractor's structure
    ///
    /// Measured in repeating rows or items; zero for strategies that do not
    /// depend on structure.
    fn affinity(&self, _document: &Html, _hints: &SelectorHints) -> usize {
        0
    }

    /// Turns a page into candidate records
    ///
    /// An empty result is a soft failure, not an error.
    async fn extract(
        &self,
        page: &FetchedPage,
        hints: &SelectorHints,
    ) -> Result<Vec<CandidateRecord>, ExtractError>;
}

/// The three extractors, addressed by shape
pub struct ExtractorSet {
    table: TableExtractor,
    list: ListExtractor,
    llm: LlmExtractor,
}

impl ExtractorSet {
    pub fn new(llm: Arc<dyn LlmService>, max_input_chars: usize) -> Self {
        Self {
            table: TableExtractor,
            list: ListExtractor,
            llm: LlmExtractor::new(llm, max_input_chars),
        }
    }

    pub fn for_shape(&self, shape: PageShape) -> &dyn Extractor {
        match shape {
            PageShape::Table => &self.table,
            PageShape::List => &self.list,
            PageShape::Unstructured => &self.llm,
        }
    }

    /// Structured extractors in tie-break order
    pub fn structured(&self) -> [&dyn Extractor; 2] {
        [&self.table, &self.list]
    }
}
