//! Text normalization helpers shared by the extractors

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Elements whose text never reaches the language model
const SKIPPED_ELEMENTS: [&str; 7] = [
    "script", "style", "noscript", "nav", "footer", "template", "svg",
];

/// Main-content containers tried when no content selector is configured
const DEFAULT_CONTENT_SELECTOR: &str = "main, #content, .content, article";

static BOILERPLATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:©|\(c\)|copyright)\s*(?:©\s*)?(?:\d{4}(?:\s*-\s*\d{4})?)?[^.|]{0,80}?(?:all rights reserved\.?|\.|$)|all rights reserved\.?|privacy policy|terms (?:of use|and conditions)",
    )
    .expect("valid boilerplate regex")
});

/// Collapses all whitespace runs to single spaces and trims
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lower-cased, whitespace-collapsed form used for comparisons and keys
pub fn normalize_key(text: &str) -> String {
    collapse_whitespace(&text.to_lowercase())
}

/// Collapsed text content of one element
pub fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

/// Visible text of a document, restricted to its main content
///
/// # Arguments
///
/// * `document` - Parsed page
/// * `content_selector` - Optional CSS selector for the main content area
pub fn visible_text(document: &Html, content_selector: Option<&str>) -> String {
    let root = content_selector
        .and_then(|s| select_first(document, s))
        .or_else(|| select_first(document, DEFAULT_CONTENT_SELECTOR))
        .or_else(|| select_first(document, "body"))
        .unwrap_or_else(|| document.root_element());

    let mut parts = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };

        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .map_or(false, |e| SKIPPED_ELEMENTS.contains(&e.name()))
        });
        if !hidden {
            parts.push(&**text);
        }
    }

    collapse_whitespace(&parts.join(" "))
}

/// Removes copyright lines and legal link text
pub fn strip_boilerplate(text: &str) -> String {
    collapse_whitespace(&BOILERPLATE_RE.replace_all(text, " "))
}

/// Truncates to at most `max_chars` characters on a char boundary
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn select_first<'a>(document: &'a Html, selector: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(selector).ok()?;
    document.select(&selector).next()
}
