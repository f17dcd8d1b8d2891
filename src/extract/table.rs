//! Extractor for notices laid out as HTML tables
//!
//! The header row is mapped onto canonical fields through the source's
//! `header-mapping` and a built-in alias list. A table without a title
//! column has no anchor and yields nothing, which triggers the fallback.

use crate::config::SelectorHints;
use crate::extract::dates::parse_date;
use crate::extract::text::{element_text, normalize_key};
use crate::extract::{CandidateRecord, ExtractError, Extractor};
use crate::harvest::FetchedPage;
use crate::state::PageShape;
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use url::Url;

/// Canonical column meaning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Title,
    Reference,
    Location,
    Category,
    Start,
    End,
}

impl Field {
    /// Parses a `header-mapping` target name
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "title" => Some(Self::Title),
            "reference" => Some(Self::Reference),
            "location" => Some(Self::Location),
            "category" => Some(Self::Category),
            "start" => Some(Self::Start),
            "end" => Some(Self::End),
            _ => None,
        }
    }
}

/// Whole-header aliases
const EXACT_ALIASES: &[(&str, Field)] = &[
    ("title", Field::Title),
    ("description", Field::Title),
    ("tender name", Field::Title),
    ("tender title", Field::Title),
    ("name of work", Field::Title),
    ("name of the work", Field::Title),
    ("subject", Field::Title),
    ("particulars", Field::Title),
    ("tender id", Field::Reference),
    ("tender no", Field::Reference),
    ("tender number", Field::Reference),
    ("reference", Field::Reference),
    ("reference no", Field::Reference),
    ("ref no", Field::Reference),
    ("nit no", Field::Reference),
    ("location", Field::Location),
    ("place", Field::Location),
    ("category", Field::Category),
    ("type", Field::Category),
    ("start date", Field::Start),
    ("publish date", Field::Start),
    ("published on", Field::Start),
    ("end date", Field::End),
    ("closing date", Field::End),
    ("last date", Field::End),
    ("due date", Field::End),
];

/// Substring aliases, tried in order after the exact list
const CONTAINS_ALIASES: &[(&str, Field)] = &[
    ("closing", Field::End),
    ("last date", Field::End),
    ("due date", Field::End),
    ("end date", Field::End),
    ("submission", Field::End),
    ("publish", Field::Start),
    ("start date", Field::Start),
    ("issue date", Field::Start),
    ("tender no", Field::Reference),
    ("tender id", Field::Reference),
    ("ref", Field::Reference),
    ("name of work", Field::Title),
    ("description", Field::Title),
    ("title", Field::Title),
    ("subject", Field::Title),
    ("location", Field::Location),
    ("category", Field::Category),
];

/// Maps a header cell to a canonical field
///
/// Custom mappings win over the built-in aliases. Headers are compared
/// case-insensitively with trailing punctuation removed.
pub fn classify_header(header: &str, mapping: &HashMap<String, String>) -> Option<Field> {
    let normalized = clean_header(header);
    if normalized.is_empty() {
        return None;
    }

    if let Some(field) = mapping
        .iter()
        .find(|(key, _)| clean_header(key) == normalized)
        .and_then(|(_, target)| Field::from_name(target))
    {
        return Some(field);
    }

    EXACT_ALIASES
        .iter()
        .find(|(alias, _)| *alias == normalized)
        .or_else(|| {
            CONTAINS_ALIASES
                .iter()
                .find(|(alias, _)| normalized.contains(alias))
        })
        .map(|(_, field)| *field)
}

fn clean_header(header: &str) -> String {
    normalize_key(header)
        .trim_end_matches([':', '.', '*'])
        .trim()
        .replace('.', "")
}

/// Deterministic table extractor
#[derive(Debug, Clone, Default)]
pub struct TableExtractor;

struct Selectors {
    table: Selector,
    row: Selector,
    cell: Selector,
    header_cell: Selector,
    link: Selector,
}

impl Selectors {
    fn new(hints: &SelectorHints) -> Option<Self> {
        Some(Self {
            table: Selector::parse(hints.table_selector.as_deref().unwrap_or("table")).ok()?,
            row: Selector::parse("tr").ok()?,
            cell: Selector::parse("th, td").ok()?,
            header_cell: Selector::parse("th").ok()?,
            link: Selector::parse("a[href]").ok()?,
        })
    }
}

/// A table whose header carries a title column
struct AnchoredTable<'a> {
    headers: Vec<String>,
    columns: Vec<Option<Field>>,
    rows: Vec<ElementRef<'a>>,
}

impl TableExtractor {
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

        let best = document
            .select(&selectors.table)
            .filter_map(|table| anchor_table(table, &selectors, &hints.header_mapping))
            .max_by_key(|table| table.rows.len());

        let Some(table) = best else {
            return Vec::new();
        };

        table
            .rows
            .iter()
            .map(|row| record_from_row(*row, &table, &selectors, base.as_ref()))
            .collect()
    }
}

#[async_trait]
impl Extractor for TableExtractor {
    fn shape(&self) -> PageShape {
        PageShape::Table
    }

    /// Data rows (two or more cells) of the largest matching table
    fn affinity(&self, document: &Html, hints: &SelectorHints) -> usize {
        let Some(selectors) = Selectors::new(hints) else {
            return 0;
        };

        document
            .select(&selectors.table)
            .map(|table| {
                table
                    .select(&selectors.row)
                    .filter(|row| row.select(&selectors.cell).count() >= 2)
                    .count()
                    .saturating_sub(1)
            })
            .max()
            .unwrap_or(0)
    }

    async fn extract(
        &self,
        page: &FetchedPage,
        hints: &SelectorHints,
    ) -> Result<Vec<CandidateRecord>, ExtractError> {
        Ok(self.extract_from_html(&page.body, &page.final_url, hints))
    }
}

fn anchor_table<'a>(
    table: ElementRef<'a>,
    selectors: &Selectors,
    mapping: &HashMap<String, String>,
) -> Option<AnchoredTable<'a>> {
    let rows: Vec<ElementRef<'a>> = table.select(&selectors.row).collect();
    let header_idx = rows
        .iter()
        .position(|row| row.select(&selectors.header_cell).next().is_some())
        .unwrap_or(0);
    let header_row = rows.get(header_idx)?;

    let headers: Vec<String> = header_row.select(&selectors.cell).map(element_text).collect();
    let columns: Vec<Option<Field>> = headers
        .iter()
        .map(|header| classify_header(header, mapping))
        .collect();

    if !columns.contains(&Some(Field::Title)) {
        return None;
    }

    let rows = rows
        .into_iter()
        .skip(header_idx + 1)
        .filter(|row| {
            let cells: Vec<String> = row.select(&selectors.cell).map(element_text).collect();
            // Single-cell rows spanning a wide table are section captions
            let is_caption = cells.len() < 2 && headers.len() >= 2;
            !is_caption && cells.iter().any(|cell| !cell.is_empty())
        })
        .collect();

    Some(AnchoredTable {
        headers,
        columns,
        rows,
    })
}

fn record_from_row(
    row: ElementRef<'_>,
    table: &AnchoredTable<'_>,
    selectors: &Selectors,
    base: Option<&Url>,
) -> CandidateRecord {
    let mut record = CandidateRecord::default();

    for (idx, cell) in row.select(&selectors.cell).enumerate() {
        let text = element_text(cell);
        if text.is_empty() {
            continue;
        }

        match table.columns.get(idx).copied().flatten() {
            Some(Field::Title) => {
                if record.title.is_none() {
                    record.title = Some(text);
                    if let Some(link) = first_link(cell, selectors, base) {
                        record.set_extra("link", link);
                    }
                }
            }
            Some(Field::Reference) => record.set_extra("reference", text),
            Some(Field::Location) => {
                record.location.get_or_insert(text);
            }
            Some(Field::Category) => {
                record.category.get_or_insert(text);
            }
            Some(Field::Start) => record.valid_from = record.valid_from.or(parse_date(&text)),
            Some(Field::End) => record.valid_until = record.valid_until.or(parse_date(&text)),
            None => {
                let key = table
                    .headers
                    .get(idx)
                    .filter(|header| !header.is_empty())
                    .cloned()
                    .unwrap_or_else(|| format!("column_{}", idx + 1));
                record.set_extra(&key, text);
            }
        }
    }

    record
}

fn first_link(cell: ElementRef<'_>, selectors: &Selectors, base: Option<&Url>) -> Option<String> {
    let href = cell.select(&selectors.link).next()?.value().attr("href")?;
    match base {
        Some(base) => base.join(href).ok().map(|url| url.to_string()),
        None => Some(href.to_string()),
    }
}
