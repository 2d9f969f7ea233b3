//! Failure classification and retry policy.
//!
//! Maps attempt failures onto terminal statuses and decides which faults are
//! worth retrying. Transient faults (timeouts, navigation errors) retry with
//! exponential backoff; structural faults (page layout mismatch, unsupported
//! transport operation) are descriptor problems and fail fast as `Blocked`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::extract::ExtractFailure;
use crate::model::{ExtractedFields, ExtractionStatus, FieldNote, RawFields, TargetField};
use crate::extract::norm::{parse_currency, parse_date};

/// Retry/backoff policy. Delay doubles per attempt: `base * 2^(attempt-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// Backoff before the given retry (attempt numbers start at 1; the delay
    /// precedes attempt `attempt + 1`).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    /// Whether another attempt is allowed after `attempt` attempts.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Map an attempt failure to the status it would terminate with, plus
/// whether the fault is transient (retryable).
pub fn classify_failure(failure: &ExtractFailure) -> (ExtractionStatus, bool) {
    match failure {
        ExtractFailure::Timeout { .. } => (ExtractionStatus::Timeout, true),
        // Navigation faults are usually transient (server hiccup, dropped
        // connection); exhausting retries terminates as Timeout.
        ExtractFailure::Navigation(_) => (ExtractionStatus::Timeout, true),
        ExtractFailure::StructureMismatch(_) => (ExtractionStatus::Blocked, false),
        ExtractFailure::Unsupported(_) => (ExtractionStatus::Blocked, false),
    }
}

/// Normalize raw field text and resolve the terminal status of a completed
/// (navigation-successful) attempt.
///
/// Status resolution:
/// - `Success`: every required field parsed to a typed value.
/// - `NotFound`: no rule matched any field at all.
/// - `ParseError`: some text was captured but a required field is missing or
///   failed type validation. Fields that did parse are retained.
pub fn resolve(
    raw: &RawFields,
    required: &[TargetField],
) -> (ExtractedFields, ExtractionStatus, Vec<FieldNote>) {
    let mut fields = ExtractedFields::default();
    let mut notes = Vec::new();

    for target in [
        TargetField::AmountDue,
        TargetField::PreviousYearTaxes,
        TargetField::TaxDueDate,
        TargetField::PaidBy,
    ] {
        let Some(text) = raw.get(target) else {
            continue;
        };
        match target {
            TargetField::AmountDue | TargetField::PreviousYearTaxes => {
                match parse_currency(text) {
                    Some(value) => {
                        if target == TargetField::AmountDue {
                            fields.amount_due = Some(value);
                        } else {
                            fields.previous_year_taxes = Some(value);
                        }
                    }
                    None => notes.push(FieldNote::new(
                        target,
                        format!("unparseable currency: {text:?}"),
                    )),
                }
            }
            TargetField::TaxDueDate => match parse_date(text) {
                Some(date) => fields.tax_due_date = Some(date),
                None => notes.push(FieldNote::new(target, format!("unparseable date: {text:?}"))),
            },
            TargetField::PaidBy => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    fields.paid_by = Some(trimmed.to_string());
                }
            }
        }
    }

    if raw.is_empty() {
        return (fields, ExtractionStatus::NotFound, notes);
    }

    let missing: Vec<&TargetField> = required
        .iter()
        .filter(|t| !has_value(&fields, **t))
        .collect();
    if missing.is_empty() {
        (fields, ExtractionStatus::Success, notes)
    } else {
        for target in missing {
            if raw.get(*target).is_none() {
                notes.push(FieldNote::new(*target, "required field not found"));
            }
        }
        (fields, ExtractionStatus::ParseError, notes)
    }
}

fn has_value(fields: &ExtractedFields, target: TargetField) -> bool {
    match target {
        TargetField::AmountDue => fields.amount_due.is_some(),
        TargetField::PreviousYearTaxes => fields.previous_year_taxes.is_some(),
        TargetField::TaxDueDate => fields.tax_due_date.is_some(),
        TargetField::PaidBy => fields.paid_by.is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(2_000));
        assert_eq!(policy.backoff(2), Duration::from_millis(4_000));
        assert_eq!(policy.backoff(3), Duration::from_millis(8_000));
    }

    #[test]
    fn retry_budget_is_three_attempts() {
        let policy = RetryPolicy::default();
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
    }

    #[test]
    fn transient_faults_retry_structural_do_not() {
        let (status, retryable) = classify_failure(&ExtractFailure::Timeout { ms: 30_000 });
        assert_eq!(status, ExtractionStatus::Timeout);
        assert!(retryable);

        let (status, retryable) =
            classify_failure(&ExtractFailure::Navigation("connection reset".into()));
        assert_eq!(status, ExtractionStatus::Timeout);
        assert!(retryable);

        let (status, retryable) = classify_failure(&ExtractFailure::StructureMismatch(
            "element not found: #txtParcelNumBook".into(),
        ));
        assert_eq!(status, ExtractionStatus::Blocked);
        assert!(!retryable);

        let (status, retryable) =
            classify_failure(&ExtractFailure::Unsupported("fill over HTTP transport".into()));
        assert_eq!(status, ExtractionStatus::Blocked);
        assert!(!retryable);
    }

    #[test]
    fn all_required_parsed_is_success() {
        let mut raw = RawFields::default();
        raw.set(TargetField::AmountDue, "$8,314.00".into());
        raw.set(TargetField::TaxDueDate, "01/05/2026".into());
        let (fields, status, notes) = resolve(&raw, &[TargetField::AmountDue]);
        assert_eq!(status, ExtractionStatus::Success);
        assert_eq!(fields.amount_due, Some(8314.00));
        assert_eq!(fields.tax_due_date, NaiveDate::from_ymd_opt(2026, 1, 5));
        assert!(notes.is_empty());
    }

    #[test]
    fn nothing_matched_is_not_found() {
        let raw = RawFields::default();
        let (fields, status, _) = resolve(&raw, &[TargetField::AmountDue]);
        assert_eq!(status, ExtractionStatus::NotFound);
        assert_eq!(fields, ExtractedFields::default());
    }

    #[test]
    fn unparseable_required_field_is_parse_error_with_note() {
        let mut raw = RawFields::default();
        raw.set(TargetField::AmountDue, "see county website".into());
        let (fields, status, notes) = resolve(&raw, &[TargetField::AmountDue]);
        assert_eq!(status, ExtractionStatus::ParseError);
        assert_eq!(fields.amount_due, None);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].field, TargetField::AmountDue);
    }

    #[test]
    fn partial_parse_retains_good_fields() {
        // Required field missing, but the date parsed; keep it.
        let mut raw = RawFields::default();
        raw.set(TargetField::TaxDueDate, "01/31/2026".into());
        let (fields, status, notes) = resolve(&raw, &[TargetField::AmountDue]);
        assert_eq!(status, ExtractionStatus::ParseError);
        assert_eq!(fields.tax_due_date, NaiveDate::from_ymd_opt(2026, 1, 31));
        assert!(notes
            .iter()
            .any(|n| n.field == TargetField::AmountDue && n.message.contains("not found")));
    }

    #[test]
    fn empty_currency_stays_null_never_zero() {
        let mut raw = RawFields::default();
        raw.set(TargetField::AmountDue, "".into());
        let (fields, status, _) = resolve(&raw, &[TargetField::AmountDue]);
        assert_eq!(fields.amount_due, None);
        assert_eq!(status, ExtractionStatus::ParseError);
    }
}
