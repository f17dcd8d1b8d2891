//! Extractor for notices published as repeating list items or cards

use crate::config::SelectorHints;
use crate::extract::dates::date_window;
use crate::extract::fields::{element_category, find_category, find_location, find_reference};
use crate::extract::text::element_text;
use crate::extract::{CandidateRecord, ExtractError, Extractor};
use crate::harvest::FetchedPage;
use crate::state::PageShape;
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use url::Url;

const DEFAULT_CONTAINERS: &str =
    "ul, ol, .notifications-list, .tenders-list, .notice-list, .list, .notices, .news";
const DEFAULT_ITEMS: &str = "li, .item, .notification, .notice, .card";

/// Items shorter than this are menu entries, not notices
const MIN_ITEM_CHARS: usize = 20;

/// Longest title taken from an item's full text
const MAX_TITLE_CHARS: usize = 300;

/// Page chrome that never holds notice lists
const CHROME_ELEMENTS: [&str; 3] = ["nav", "header", "footer"];

/// Deterministic list extractor
#[derive(Debug, Clone, Default)]
pub struct ListExtractor;

struct Selectors {
    container: Selector,
    item: Selector,
    title: Selector,
    link: Selector,
}

impl Selectors {
    fn new(hints: &SelectorHints) -> Option<Self> {
        Some(Self {
            container: Selector::parse(hints.list_selector.as_deref().unwrap_or(DEFAULT_CONTAINERS))
                .ok()?,
            item: Selector::parse(hints.item_selector.as_deref().unwrap_or(DEFAULT_ITEMS)).ok()?,
            title: Selector::parse("a, h3, h4, h5, .title, strong").ok()?,
            link: Selector::parse("a[href]").ok()?,
        })
    }
}

impl ListExtractor {
    /// Parses records out of a page body
    pub fn extract_from_html(
        &self,
        body: &str,
        base_url: &str,
        hints: &SelectorHints,
    ) -> Vec<CandidateRecord> {
        let Some(selectors) = Selectors::new(hints) else {
            return Vec::new();
        };
        let document = Html::parse_document(body);
        let base = Url::parse(base_url).ok();

        best_items(&document, &selectors)
            .into_iter()
            .map(|item| record_from_item(item, &selectors, base.as_ref()))
            .collect()
    }
}

#[async_trait]
impl Extractor for ListExtractor {
    fn shape(&self) -> PageShape {
        PageShape::List
    }

    /// Qualifying items in the richest container
    fn affinity(&self, document: &Html, hints: &SelectorHints) -> usize {
        match Selectors::new(hints) {
            Some(selectors) => best_items(document, &selectors).len(),
            None => 0,
        }
    }

    async fn extract(
        &self,
        page: &FetchedPage,
        hints: &SelectorHints,
    ) -> Result<Vec<CandidateRecord>, ExtractError> {
        Ok(self.extract_from_html(&page.body, &page.final_url, hints))
    }
}

/// Items of the container holding the most qualifying items
fn best_items<'a>(document: &'a Html, selectors: &Selectors) -> Vec<ElementRef<'a>> {
    document
        .select(&selectors.container)
        .filter(|container| !inside_chrome(*container))
        .map(|container| {
            container
                .select(&selectors.item)
                .filter(|item| element_text(*item).chars().count() >= MIN_ITEM_CHARS)
                .collect::<Vec<_>>()
        })
        .max_by_key(|items| items.len())
        .unwrap_or_default()
}

fn inside_chrome(element: ElementRef<'_>) -> bool {
    element.ancestors().any(|ancestor| {
        ancestor
            .value()
            .as_element()
            .map_or(false, |e| CHROME_ELEMENTS.contains(&e.name()))
    })
}

fn record_from_item(
    item: ElementRef<'_>,
    selectors: &Selectors,
    base: Option<&Url>,
) -> CandidateRecord {
    let text = element_text(item);

    let title = item
        .select(&selectors.title)
        .map(element_text)
        .find(|title| !title.is_empty())
        .unwrap_or_else(|| text.chars().take(MAX_TITLE_CHARS).collect());

    let (valid_from, valid_until) = date_window(&text);

    let mut record = CandidateRecord {
        location: find_location(&text),
        category: element_category(item).or_else(|| find_category(&text)),
        valid_from,
        valid_until,
        ..CandidateRecord::default()
    };

    if let Some(reference) = find_reference(&text) {
        record.set_extra("reference", reference);
    }

    let href = item
        .select(&selectors.link)
        .next()
        .and_then(|link| link.value().attr("href"));
    if let Some(href) = href {
        let link = match base {
            Some(base) => base.join(href).map(|url| url.to_string()).ok(),
            None => Some(href.to_string()),
        };
        if let Some(link) = link {
            record.set_extra("link", link);
        }
    }

    if text != title {
        record.body = Some(text);
    }
    record.title = Some(title);

    record
}
