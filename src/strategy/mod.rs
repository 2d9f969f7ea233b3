//! Declarative per-jurisdiction strategy descriptors and their registry.
//!
//! A strategy describes how to navigate one jurisdiction's tax-lookup site
//! and how to parse its result page. Descriptors are data, not code: the
//! built-in set is embedded at compile time from `strategies.json`, and an
//! external JSON file can be loaded at run time so new jurisdictions are
//! onboarded without touching the driver.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::classify::RetryPolicy;
use crate::model::{PropertyRecord, TargetField};

/// Built-in descriptor set, embedded so there is no runtime file I/O for the
/// stock jurisdictions.
const STRATEGIES_JSON: &str = include_str!("strategies.json");

/// How a session reaches the page: a full browser, or a plain HTTP GET for
/// sites that render server-side and need no form interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    #[default]
    Browser,
    Http,
}

/// Error splitting a parcel number against a field template.
#[derive(Debug, Error, PartialEq)]
#[error("parcel {parcel:?} does not fit a {expected}-field template (got {got} segments)")]
pub struct TemplateMismatch {
    pub parcel: String,
    pub expected: usize,
    pub got: usize,
}

/// Rule for decomposing a parcel/account number into ordered form inputs.
///
/// Example: `"214-05-025A"` under a 4-field hyphen template with trailing
/// letter isolation yields `["214", "05", "025", "A"]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldTemplate {
    /// Segment delimiter in the parcel number.
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Number of input fields the form expects.
    pub fields: usize,
    /// When the parcel has one segment fewer than `fields` and the final
    /// segment carries a trailing letter suffix (e.g. `025A`), peel the
    /// suffix into its own field.
    #[serde(default)]
    pub isolate_trailing_alpha: bool,
}

fn default_delimiter() -> char {
    '-'
}

impl FieldTemplate {
    /// Split a parcel number into exactly `self.fields` input values.
    pub fn split(&self, parcel: &str) -> Result<Vec<String>, TemplateMismatch> {
        let mut parts: Vec<String> = parcel
            .split(self.delimiter)
            .map(|s| s.trim().to_string())
            .collect();

        if self.isolate_trailing_alpha && parts.len() + 1 == self.fields {
            if let Some(last) = parts.pop() {
                let split_at = last
                    .rfind(|c: char| c.is_ascii_digit())
                    .map(|i| i + 1)
                    .unwrap_or(0);
                let (item, suffix) = last.split_at(split_at);
                if !item.is_empty() && !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_alphabetic()) {
                    parts.push(item.to_string());
                    parts.push(suffix.to_string());
                } else {
                    // No usable suffix; the site takes an empty split field.
                    parts.push(last);
                    parts.push(String::new());
                }
            }
        }

        if parts.len() != self.fields {
            return Err(TemplateMismatch {
                parcel: parcel.to_string(),
                expected: self.fields,
                got: parts.len(),
            });
        }
        Ok(parts)
    }
}

/// How a form search is submitted once the inputs are filled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Submit {
    /// Click an element matched by CSS selector.
    Click { selector: String },
    /// Click the first visible element containing the given text.
    ClickText { text: String },
    /// Submit the form owning the given input.
    Enter { selector: String },
}

/// Site navigation flavor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Navigation {
    /// Multi-step form flow: open the lookup URL, fill the decomposed parcel
    /// number into the ordered inputs, submit, optionally click a result
    /// link, and wait for the page to settle.
    FormSearch {
        template: FieldTemplate,
        /// One CSS selector per template field, in order.
        input_selectors: Vec<String>,
        submit: Submit,
        /// Optional post-submit link to click. `{account}` is replaced with
        /// the record's parcel number (e.g. `a[href*='{account}']`).
        #[serde(default)]
        result_link: Option<String>,
    },
    /// The bill page is addressable directly. `{account}` in the template is
    /// replaced with the parcel number; with no template the record's
    /// lookup URL is opened as-is.
    DirectUrl {
        #[serde(default)]
        url_template: Option<String>,
    },
}

/// Text pattern classes for [`ParseRule::Pattern`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Currency,
    Date,
}

/// One parse rule. Rules are tried in order per target field; the first rule
/// producing a non-empty, well-typed value wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParseRule {
    /// Find a text line containing `label`; read the value after the label on
    /// the same line, or from the following non-empty line.
    LabelLine { label: String },
    /// Find a table/definition cell whose text equals `label`; read the next
    /// sibling cell.
    CellPair { label: String },
    /// Scan an optionally CSS-scoped section for the first pattern match.
    /// For currency, `min`/`max` bound the plausible tax range so assessed
    /// property values are not picked up by mistake.
    Pattern {
        #[serde(default)]
        scope: Option<String>,
        pattern: PatternKind,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
}

/// Ordered rules for one target field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRules {
    pub field: TargetField,
    pub rules: Vec<ParseRule>,
}

/// Complete navigation + parse descriptor for one jurisdiction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JurisdictionStrategy {
    /// Jurisdiction name the registry keys on (matched case-insensitively).
    pub jurisdiction: String,
    /// Domains that identify this jurisdiction when the name alone is
    /// ambiguous (matched against the record's lookup URL).
    #[serde(default)]
    pub domain_hints: Vec<String>,
    #[serde(default)]
    pub transport: Transport,
    pub navigation: Navigation,
    /// Per-operation timeout for driver calls.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Quiescence interval after load, for sites that keep rendering after
    /// network activity stops.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Retry/backoff override; the orchestrator's uniform policy applies
    /// when absent.
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    pub rules: Vec<FieldRules>,
    /// Fields that must parse for the task to count as `Success`.
    #[serde(default = "default_required")]
    pub required: Vec<TargetField>,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_settle_ms() -> u64 {
    2_000
}

fn default_required() -> Vec<TargetField> {
    vec![TargetField::AmountDue]
}

impl JurisdictionStrategy {
    /// Effective retry policy for this jurisdiction.
    pub fn retry_policy(&self, default: RetryPolicy) -> RetryPolicy {
        self.retry.unwrap_or(default)
    }
}

/// Lookup table of jurisdiction strategies.
pub struct StrategyRegistry {
    by_name: HashMap<String, Arc<JurisdictionStrategy>>,
    ordered: Vec<Arc<JurisdictionStrategy>>,
}

impl StrategyRegistry {
    /// Load the embedded built-in descriptor set.
    pub fn builtin() -> Result<Self> {
        Self::from_json(STRATEGIES_JSON).context("built-in strategies.json is invalid")
    }

    /// Parse a descriptor set from JSON (an array of strategies).
    pub fn from_json(json: &str) -> Result<Self> {
        let strategies: Vec<JurisdictionStrategy> =
            serde_json::from_str(json).context("failed to parse strategy descriptors")?;
        let mut by_name = HashMap::new();
        let mut ordered = Vec::new();
        for strategy in strategies {
            let strategy = Arc::new(strategy);
            by_name.insert(strategy.jurisdiction.to_lowercase(), Arc::clone(&strategy));
            ordered.push(strategy);
        }
        Ok(Self { by_name, ordered })
    }

    /// Load a descriptor set from an external JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read strategies file: {}", path.display()))?;
        Self::from_json(&json)
    }

    /// Look up a strategy by jurisdiction name: case-insensitive exact match
    /// first, then substring match (records often carry names like
    /// "Maricopa County, AZ").
    pub fn lookup(&self, jurisdiction: &str) -> Option<Arc<JurisdictionStrategy>> {
        let needle = jurisdiction.to_lowercase();
        if let Some(s) = self.by_name.get(&needle) {
            return Some(Arc::clone(s));
        }
        self.ordered
            .iter()
            .find(|s| needle.contains(&s.jurisdiction.to_lowercase()))
            .cloned()
    }

    /// Resolve the strategy for a record: by jurisdiction name, falling back
    /// to domain hints against the lookup URL.
    pub fn lookup_record(&self, record: &PropertyRecord) -> Option<Arc<JurisdictionStrategy>> {
        if let Some(s) = self.lookup(&record.jurisdiction) {
            return Some(s);
        }
        let host = url::Url::parse(&record.lookup_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))?;
        self.ordered
            .iter()
            .find(|s| s.domain_hints.iter().any(|d| host.ends_with(&d.to_lowercase())))
            .cloned()
    }

    /// All registered strategies, in descriptor order.
    pub fn all(&self) -> &[Arc<JurisdictionStrategy>] {
        &self.ordered
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(jurisdiction: &str, url: &str) -> PropertyRecord {
        PropertyRecord {
            property_id: "p1".into(),
            property_name: String::new(),
            jurisdiction: jurisdiction.into(),
            state: String::new(),
            parcel_number: "214-05-025A".into(),
            lookup_url: url.into(),
        }
    }

    #[test]
    fn template_isolates_trailing_letter() {
        let template = FieldTemplate {
            delimiter: '-',
            fields: 4,
            isolate_trailing_alpha: true,
        };
        assert_eq!(
            template.split("214-05-025A").unwrap(),
            vec!["214", "05", "025", "A"]
        );
    }

    #[test]
    fn template_accepts_already_split_parcel() {
        let template = FieldTemplate {
            delimiter: '-',
            fields: 4,
            isolate_trailing_alpha: true,
        };
        assert_eq!(
            template.split("214-05-025-B").unwrap(),
            vec!["214", "05", "025", "B"]
        );
    }

    #[test]
    fn template_fills_empty_split_field_without_suffix() {
        let template = FieldTemplate {
            delimiter: '-',
            fields: 4,
            isolate_trailing_alpha: true,
        };
        assert_eq!(
            template.split("214-05-025").unwrap(),
            vec!["214", "05", "025", ""]
        );
    }

    #[test]
    fn template_rejects_wrong_segment_count() {
        let template = FieldTemplate {
            delimiter: '-',
            fields: 4,
            isolate_trailing_alpha: false,
        };
        let err = template.split("214-05").unwrap_err();
        assert_eq!(err.expected, 4);
        assert_eq!(err.got, 2);
    }

    #[test]
    fn builtin_registry_loads() {
        let registry = StrategyRegistry::builtin().unwrap();
        assert!(!registry.is_empty());
        assert!(registry.lookup("Maricopa").is_some());
        assert!(registry.lookup("Wayne").is_some());
    }

    #[test]
    fn lookup_is_case_insensitive_and_substring() {
        let registry = StrategyRegistry::builtin().unwrap();
        assert!(registry.lookup("MARICOPA").is_some());
        assert!(registry.lookup("Maricopa County, AZ").is_some());
        assert!(registry.lookup("Atlantis").is_none());
    }

    #[test]
    fn lookup_record_falls_back_to_domain_hint() {
        let registry = StrategyRegistry::builtin().unwrap();
        let rec = record(
            "Unlabeled County",
            "https://treasurer.maricopa.gov/parcel/default.aspx",
        );
        let strategy = registry.lookup_record(&rec).unwrap();
        assert_eq!(strategy.jurisdiction, "Maricopa");
    }

    #[test]
    fn descriptor_defaults_apply() {
        let json = r#"[{
            "jurisdiction": "Testville",
            "navigation": { "kind": "direct_url" },
            "rules": [
                { "field": "amount_due", "rules": [ { "type": "label_line", "label": "Amount Due" } ] }
            ]
        }]"#;
        let registry = StrategyRegistry::from_json(json).unwrap();
        let s = registry.lookup("testville").unwrap();
        assert_eq!(s.transport, Transport::Browser);
        assert_eq!(s.timeout_ms, 30_000);
        assert_eq!(s.settle_ms, 2_000);
        assert_eq!(s.required, vec![TargetField::AmountDue]);
        assert!(s.retry.is_none());
    }
}
