//! Parse-rule application over a page snapshot.
//!
//! All functions here are synchronous: the `scraper` crate's DOM types are
//! not `Send`, so the extractor snapshots the page (visible text + HTML)
//! once and walks the snapshot without holding DOM handles across awaits.

use crate::extract::norm::{parse_currency, parse_date};
use crate::strategy::{ParseRule, PatternKind};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;

static CURRENCY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$[\d,]+(?:\.\d{1,2})?").unwrap());
static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b").unwrap());

/// Immutable capture of a rendered page.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    /// Visible text, line-oriented (`innerText` semantics).
    pub text: String,
    /// Full page HTML.
    pub html: String,
}

impl PageSnapshot {
    pub fn new(text: String, html: String) -> Self {
        Self { text, html }
    }
}

/// Apply rules in order; the first rule yielding a non-empty value wins.
pub fn apply_rules(snapshot: &PageSnapshot, rules: &[ParseRule]) -> Option<String> {
    rules.iter().find_map(|rule| match rule {
        ParseRule::LabelLine { label } => label_line(&snapshot.text, label),
        ParseRule::CellPair { label } => cell_pair(&snapshot.html, label),
        ParseRule::Pattern {
            scope,
            pattern,
            min,
            max,
        } => pattern_scan(snapshot, scope.as_deref(), *pattern, *min, *max),
    })
}

/// Normalize label text for comparison: lowercase, collapsed whitespace,
/// trailing colon stripped.
fn norm_label(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(':')
        .trim_end()
        .to_lowercase()
}

/// ASCII-case-insensitive substring search returning a byte offset into the
/// haystack. Case folding via `to_lowercase` can change byte lengths (e.g.
/// `İ`), so offsets must come from the original string; a match on ASCII
/// needle bytes always starts and ends on a char boundary.
fn find_ascii_ci(haystack: &str, needle: &str) -> Option<usize> {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() || h.len() < n.len() {
        return None;
    }
    (0..=h.len() - n.len()).find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}

/// Label-anchored line scan: read the value after the label on the same
/// line, or from the following non-empty line when the label stands alone.
fn label_line(text: &str, label: &str) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();

    for (i, line) in lines.iter().enumerate() {
        let Some(pos) = find_ascii_ci(line, label) else {
            continue;
        };
        let after = line[pos + label.len()..]
            .trim_start_matches(':')
            .trim();
        if !after.is_empty() {
            return Some(after.to_string());
        }
        // Value wrapped onto the next line.
        if let Some(next) = lines[i + 1..].iter().find(|l| !l.trim().is_empty()) {
            return Some(next.trim().to_string());
        }
    }
    None
}

/// Label/value cell-pair scan: find a cell whose text equals the label, read
/// the next sibling cell.
fn cell_pair(html: &str, label: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("td, th, dt").ok()?;
    let wanted = norm_label(label);

    for cell in document.select(&selector) {
        let text = cell.text().collect::<String>();
        if norm_label(&text) != wanted {
            continue;
        }
        let Some(sibling) = cell.next_siblings().filter_map(ElementRef::wrap).next() else {
            continue;
        };
        let value = sibling.text().collect::<String>().trim().to_string();
        if !value.is_empty() {
            return Some(value);
        }
    }
    None
}

/// Pattern scan: first currency/date match in the (optionally CSS-scoped)
/// section that passes type validation and the plausibility bounds.
fn pattern_scan(
    snapshot: &PageSnapshot,
    scope: Option<&str>,
    kind: PatternKind,
    min: Option<f64>,
    max: Option<f64>,
) -> Option<String> {
    let scoped_text;
    let haystack: &str = match scope {
        Some(css) => {
            scoped_text = scope_text(&snapshot.html, css)?;
            &scoped_text
        }
        None => &snapshot.text,
    };

    match kind {
        PatternKind::Currency => CURRENCY_RE
            .find_iter(haystack)
            .map(|m| m.as_str())
            .find(|candidate| {
                parse_currency(candidate).is_some_and(|v| {
                    min.is_none_or(|lo| v >= lo) && max.is_none_or(|hi| v <= hi)
                })
            })
            .map(|s| s.to_string()),
        PatternKind::Date => DATE_RE
            .find_iter(haystack)
            .map(|m| m.as_str())
            .find(|candidate| parse_date(candidate).is_some())
            .map(|s| s.to_string()),
    }
}

/// Concatenated text of every element matching the scope selector.
fn scope_text(html: &str, css: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(css).ok()?;
    let mut out = String::new();
    for el in document.select(&selector) {
        for chunk in el.text() {
            let trimmed = chunk.trim();
            if !trimmed.is_empty() {
                out.push_str(trimmed);
                out.push('\n');
            }
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(text: &str, html: &str) -> PageSnapshot {
        PageSnapshot::new(text.to_string(), html.to_string())
    }

    #[test]
    fn label_line_reads_inline_value() {
        let text = "Parcel 214-05-025A\nTotal Billed: $8,314.00\nStatus: UNPAID";
        assert_eq!(
            label_line(text, "Total Billed:"),
            Some("$8,314.00".to_string())
        );
    }

    #[test]
    fn label_line_reads_following_line() {
        let text = "Parcel 214-05-025A\nTotal Billed:\n$8,314.00\nStatus: UNPAID";
        assert_eq!(
            label_line(text, "Total Billed:"),
            Some("$8,314.00".to_string())
        );
    }

    #[test]
    fn label_line_same_value_inline_or_wrapped() {
        // Rule behavior must not depend on the site's line wrapping.
        let inline = "Total Billed: $8,314.00";
        let wrapped = "Total Billed:\n$8,314.00";
        assert_eq!(
            label_line(inline, "Total Billed:"),
            label_line(wrapped, "Total Billed:")
        );
    }

    #[test]
    fn label_line_survives_multibyte_text_around_label() {
        // Case folding changes byte lengths for some characters; offsets
        // must stay valid in the original line.
        assert_eq!(
            label_line("İTotal Billed:€100", "Total Billed:"),
            Some("€100".to_string())
        );
        assert_eq!(
            label_line("Montañas TOTAL BILLED: $8,314.00", "Total Billed:"),
            Some("$8,314.00".to_string())
        );
    }

    #[test]
    fn cell_pair_reads_next_sibling() {
        let html = "<table><tr>\
                    <td>Total Amount Due</td><td>$1,481.96</td>\
                    </tr><tr>\
                    <td>Owner Name</td><td>BCS MONTGOMERY LLC</td>\
                    </tr></table>";
        assert_eq!(
            cell_pair(html, "Total Amount Due"),
            Some("$1,481.96".to_string())
        );
        assert_eq!(
            cell_pair(html, "Owner Name"),
            Some("BCS MONTGOMERY LLC".to_string())
        );
        assert_eq!(cell_pair(html, "Assessed Value"), None);
    }

    #[test]
    fn cell_pair_label_match_ignores_case_and_colon() {
        let html = "<table><tr><td> total billed : </td><td>$8,314.00</td></tr></table>";
        assert_eq!(cell_pair(html, "Total Billed"), Some("$8,314.00".to_string()));
    }

    #[test]
    fn pattern_scan_respects_plausibility_bounds() {
        // Assessed value ($547,940) must be skipped in favor of the tax.
        let snap = snapshot(
            "Total Assessed Value $547,940.00\nTotal Billed $8,314.00",
            "",
        );
        let got = pattern_scan(&snap, None, PatternKind::Currency, Some(100.0), Some(50_000.0));
        assert_eq!(got, Some("$8,314.00".to_string()));
    }

    #[test]
    fn pattern_scan_scoped_to_section() {
        let snap = snapshot(
            "",
            "<div class='header'>$999,999.00</div>\
             <table><tr><td>$1,481.96</td></tr></table>",
        );
        let got = pattern_scan(&snap, Some("table"), PatternKind::Currency, None, None);
        assert_eq!(got, Some("$1,481.96".to_string()));
    }

    #[test]
    fn pattern_scan_finds_first_valid_date() {
        let snap = snapshot("Bill 2026-001 due 01/31/2026 if unpaid", "");
        let got = pattern_scan(&snap, None, PatternKind::Date, None, None);
        assert_eq!(got, Some("01/31/2026".to_string()));
    }

    #[test]
    fn rules_try_in_order_first_match_wins() {
        let snap = snapshot(
            "Total Billed: $8,314.00",
            "<table><tr><td>Total Billed</td><td>$9,999.00</td></tr></table>",
        );
        let rules = vec![
            ParseRule::LabelLine {
                label: "Total Billed:".into(),
            },
            ParseRule::CellPair {
                label: "Total Billed".into(),
            },
        ];
        assert_eq!(apply_rules(&snap, &rules), Some("$8,314.00".to_string()));
    }
}
