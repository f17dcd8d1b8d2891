//! Date parsing for notice pages
//!
//! Procurement portals mix day-first numeric dates, ISO dates and spelled-out
//! month names, often in the same table.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Exact formats tried against a whole cell value
const FORMATS: [&str; 9] = [
    "%d-%m-%Y", "%d/%m/%Y", "%d.%m.%Y", "%Y-%m-%d", "%Y/%m/%d", "%d %b %Y", "%d %B %Y",
    "%d-%b-%Y", "%b %d, %Y",
];

static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        \b(?:
            (?P<d1>\d{1,2})[./-](?P<m1>\d{1,2})[./-](?P<y1>\d{4})
          | (?P<y2>\d{4})[./-](?P<m2>\d{1,2})[./-](?P<d2>\d{1,2})
          | (?P<d3>\d{1,2})(?:st|nd|rd|th)?[\s-]+
            (?P<mon>jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?,?[\s-]+
            (?P<y3>\d{4})
        )\b",
    )
    .expect("valid date regex")
});

/// A deadline keyword shortly before a date
static DEADLINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:closing|closes|due|deadline|last\s+date|submission|expiry|expires|till|until|ends?)\b[^0-9]{0,30}$",
    )
    .expect("valid deadline regex")
});

static ORDINAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)\b").expect("valid ordinal regex"));

/// Parses a single date value such as a table cell
///
/// Falls back to the first date found anywhere in the value, so cells like
/// `"15-03-2024 05:00 PM"` still parse.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    let cleaned = ORDINAL_RE.replace_all(trimmed, "$1");
    for format in FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(&cleaned, format) {
            return Some(date);
        }
    }

    find_dates(trimmed).into_iter().next()
}

/// Finds every recognisable date in free text, in order of appearance
pub fn find_dates(text: &str) -> Vec<NaiveDate> {
    DATE_RE
        .captures_iter(text)
        .filter_map(|caps| date_from_captures(&caps))
        .collect()
}

/// Derives a validity window from free text
///
/// The earliest date is the start; the latest is the end when more than one
/// distinct date is present. A lone date introduced by a deadline keyword
/// ("closing", "due", "last date") is the end instead.
pub fn date_window(text: &str) -> (Option<NaiveDate>, Option<NaiveDate>) {
    let dated: Vec<(usize, NaiveDate)> = DATE_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let offset = caps.get(0)?.start();
            date_from_captures(&caps).map(|date| (offset, date))
        })
        .collect();

    let start = dated.iter().map(|(_, date)| *date).min();
    let end = dated
        .iter()
        .map(|(_, date)| *date)
        .max()
        .filter(|end| Some(*end) != start);

    if end.is_none() && dated.iter().all(|(_, date)| Some(*date) == start) {
        if let Some((offset, date)) = dated.first() {
            if DEADLINE_RE.is_match(&text[..*offset]) {
                return (None, Some(*date));
            }
        }
    }

    (start, end)
}

fn date_from_captures(caps: &Captures<'_>) -> Option<NaiveDate> {
    let num = |name: &str| caps.name(name).and_then(|m| m.as_str().parse::<u32>().ok());

    if let (Some(d), Some(m), Some(y)) = (num("d1"), num("m1"), num("y1")) {
        return NaiveDate::from_ymd_opt(y as i32, m, d);
    }
    if let (Some(y), Some(m), Some(d)) = (num("y2"), num("m2"), num("d2")) {
        return NaiveDate::from_ymd_opt(y as i32, m, d);
    }

    let month = caps.name("mon").and_then(|m| month_number(m.as_str()))?;
    let (d, y) = (num("d3")?, num("y3")?);
    NaiveDate::from_ymd_opt(y as i32, month, d)
}

fn month_number(name: &str) -> Option<u32> {
    let month = match name.to_ascii_lowercase().as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}
