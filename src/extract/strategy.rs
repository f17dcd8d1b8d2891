use crate::config::SelectorHints;
use crate::extract::ExtractorSet;
use crate::state::PageShape;
use scraper::Html;

/// Rows or items a structure needs before it counts as repeating
pub const DEFAULT_MIN_REPEATS: usize = 3;

/// Rule-based page classification
///
/// The label is advisory. Extraction still falls back to the language model
/// when the chosen strategy yields nothing.
#[derive(Debug, Clone, Copy)]
pub struct StrategySelector {
    min_repeats: usize,
}

impl StrategySelector {
    pub fn new(min_repeats: usize) -> Self {
        Self {
            min_repeats: min_repeats.max(1),
        }
    }

    /// Picks the structured shape with the highest affinity, if any reaches
    /// the repeat threshold; everything else is `Unstructured`
    ///
    /// Ties go to the table extractor.
    pub fn classify(
        &self,
        content: &str,
        hints: &SelectorHints,
        extractors: &ExtractorSet,
    ) -> PageShape {
        let document = Html::parse_document(content);

        let mut best = (PageShape::Unstructured, 0);
        for extractor in extractors.structured() {
            let affinity = extractor.affinity(&document, hints);
            if affinity >= self.min_repeats && affinity > best.1 {
                best = (extractor.shape(), affinity);
            }
        }

        best.0
    }
}

impl Default for StrategySelector {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_REPEATS)
    }
}
