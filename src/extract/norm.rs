//! Field normalization: raw page text into typed values.

use chrono::{Datelike, NaiveDate};

/// Accepted date input formats, tried in order. First match wins.
pub const DATE_FORMATS: &[&str] = &[
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%Y-%m-%d",
    "%m/%d/%y",
    "%B %d, %Y",
    "%b %d, %Y",
];

/// Parse a currency string into a dollar amount rounded to cents.
///
/// Strips everything but digits and the decimal point, requires at least one
/// digit, and interprets the remainder as a base-10 decimal. An empty result
/// after stripping is `None` — never coerced to zero.
pub fn parse_currency(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    let value: f64 = cleaned.parse().ok()?;
    Some((value * 100.0).round() / 100.0)
}

/// Parse a date string against [`DATE_FORMATS`], emitting an ISO calendar
/// date on the first match.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    // chrono's %Y accepts two-digit years, which would shadow the %y format
    // and turn "01/05/26" into year 26; reject implausible years so the
    // next format gets its turn.
    DATE_FORMATS.iter().find_map(|fmt| {
        NaiveDate::parse_from_str(trimmed, fmt)
            .ok()
            .filter(|d| d.year() >= 1900)
    })
}
