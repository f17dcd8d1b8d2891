//! Field heuristics for free-form notice text

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Selector};

/// Categories recognised by keyword, in priority order
const CATEGORY_KEYWORDS: [&str; 20] = [
    "Construction",
    "Civil Work",
    "Electrical",
    "Mechanical",
    "IT Services",
    "Consultancy",
    "Supply",
    "Maintenance",
    "Security",
    "Catering",
    "Transportation",
    "Housekeeping",
    "Medical",
    "Legal",
    "Financial",
    "Engineering",
    "Procurement",
    "Installation",
    "AMC",
    "Software",
];

static REFERENCE_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\b(?:tender|rfp|rfq|eoi|nit|ref(?:erence)?)\s*(?:no|number|id|ref)?\.?\s*[:#.]?\s*([A-Z0-9][A-Z0-9_/.-]{2,})",
        r"\b([A-Z]{2,}\d{2,}/[A-Z0-9/-]+)\b",
        r"\b(\d{4}/[A-Z0-9/-]+)\b",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid reference regex"))
    .collect()
});

static LOCATION_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\b(?i:location|place of work|place)\s*[:\-]\s*([A-Z][A-Za-z]+(?:\s[A-Z][A-Za-z]+){0,2})",
        r"\b([A-Z][a-z]+(?:\s[A-Z][a-z]+)?\s(?:District|City|State|Region|Town))\b",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid location regex"))
    .collect()
});

/// Finds a tender or reference number
///
/// Candidates without a digit are ignored, so "Tender for supply" does not
/// yield `for`.
pub fn find_reference(text: &str) -> Option<String> {
    REFERENCE_RES.iter().find_map(|re| {
        re.captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim_end_matches(['.', '-', '/']).to_string())
            .find(|candidate| candidate.chars().any(|c| c.is_ascii_digit()))
    })
}

/// Finds a place name from labels or `... District/City/State/Region` phrases
pub fn find_location(text: &str) -> Option<String> {
    LOCATION_RES.iter().find_map(|re| {
        re.captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|location| location.len() > 3)
    })
}

/// Matches the category keyword list against free text
pub fn find_category(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .find(|keyword| lower.contains(&keyword.to_lowercase()))
        .map(|keyword| keyword.to_string())
}

/// Category from a `.category`, `.type` or `.tag` child, or a class suffix
///
/// A class such as `civil-work-category` becomes `Civil Work`.
pub fn element_category(element: ElementRef<'_>) -> Option<String> {
    if let Ok(selector) = Selector::parse(".category, .type, .tag") {
        if let Some(child) = element.select(&selector).next() {
            let text = super::text::element_text(child);
            if !text.is_empty() {
                return Some(text);
            }
        }
    }

    element.value().classes().find_map(|class| {
        let lower = class.to_ascii_lowercase();
        let stem = lower
            .strip_suffix("category")
            .or_else(|| lower.strip_suffix("type"))?
            .trim_end_matches(['-', '_']);
        if stem.is_empty() {
            return None;
        }
        Some(title_case(&stem.replace(['-', '_'], " ")))
    })
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
