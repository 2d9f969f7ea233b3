//! Core data model: input records, task state, and extraction results.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::strategy::JurisdictionStrategy;
use std::sync::Arc;

/// One property as supplied by the external registry export.
///
/// Immutable input to the engine — the engine never writes back to this
/// record, only produces [`ExtractionResult`]s keyed by `property_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyRecord {
    /// Registry identifier, carried through to the result unchanged.
    pub property_id: String,
    /// Display name (e.g. "BCS NC Fund Propco - Tract 4").
    #[serde(default)]
    pub property_name: String,
    /// Jurisdiction name used for strategy lookup (e.g. "Maricopa").
    pub jurisdiction: String,
    /// Two-letter state code.
    #[serde(default)]
    pub state: String,
    /// Parcel or account number as issued by the jurisdiction.
    pub parcel_number: String,
    /// Entry URL for the jurisdiction's tax lookup flow.
    pub lookup_url: String,
}

/// Lifecycle status of an extraction task.
///
/// `Pending → InProgress → {Success, NotFound, ParseError, Timeout, Blocked}`.
/// Terminal states never transition further within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Pending,
    InProgress,
    /// All required fields parsed successfully.
    Success,
    /// Navigation succeeded but no parse rule matched any field.
    NotFound,
    /// At least one field was present but failed type validation.
    /// Partial results are retained for the fields that did parse.
    ParseError,
    /// Navigation or an element wait exceeded its timeout, or a transient
    /// navigation fault exhausted its retries.
    Timeout,
    /// Page structure did not match the strategy (expected container absent,
    /// unsupported operation for the transport, or no strategy registered).
    /// Indicates a descriptor that needs operator attention.
    Blocked,
}

impl ExtractionStatus {
    /// Whether this status will not be further mutated within the run.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExtractionStatus::Pending | ExtractionStatus::InProgress)
    }
}

impl std::fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExtractionStatus::Pending => "pending",
            ExtractionStatus::InProgress => "in_progress",
            ExtractionStatus::Success => "success",
            ExtractionStatus::NotFound => "not_found",
            ExtractionStatus::ParseError => "parse_error",
            ExtractionStatus::Timeout => "timeout",
            ExtractionStatus::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// The target fields the extractor tries to recover from a tax page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetField {
    AmountDue,
    PreviousYearTaxes,
    TaxDueDate,
    PaidBy,
}

impl TargetField {
    pub fn name(&self) -> &'static str {
        match self {
            TargetField::AmountDue => "amount_due",
            TargetField::PreviousYearTaxes => "previous_year_taxes",
            TargetField::TaxDueDate => "tax_due_date",
            TargetField::PaidBy => "paid_by",
        }
    }
}

/// Raw (un-normalized) text captured per field by the parse rules.
///
/// `None` means no rule matched; `Some` holds the matched text exactly as it
/// appeared on the page, before currency/date normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFields {
    pub amount_due: Option<String>,
    pub previous_year_taxes: Option<String>,
    pub tax_due_date: Option<String>,
    pub paid_by: Option<String>,
}

impl RawFields {
    pub fn get(&self, field: TargetField) -> Option<&str> {
        match field {
            TargetField::AmountDue => self.amount_due.as_deref(),
            TargetField::PreviousYearTaxes => self.previous_year_taxes.as_deref(),
            TargetField::TaxDueDate => self.tax_due_date.as_deref(),
            TargetField::PaidBy => self.paid_by.as_deref(),
        }
    }

    pub fn set(&mut self, field: TargetField, value: String) {
        let slot = match field {
            TargetField::AmountDue => &mut self.amount_due,
            TargetField::PreviousYearTaxes => &mut self.previous_year_taxes,
            TargetField::TaxDueDate => &mut self.tax_due_date,
            TargetField::PaidBy => &mut self.paid_by,
        };
        *slot = Some(value);
    }

    /// True when no rule matched any field.
    pub fn is_empty(&self) -> bool {
        self.amount_due.is_none()
            && self.previous_year_taxes.is_none()
            && self.tax_due_date.is_none()
            && self.paid_by.is_none()
    }
}

/// Normalized, typed field values. Currency amounts are rounded to cents;
/// dates are ISO calendar dates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub amount_due: Option<f64>,
    pub previous_year_taxes: Option<f64>,
    pub tax_due_date: Option<NaiveDate>,
    pub paid_by: Option<String>,
}

/// A parse note scoped to a single field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldNote {
    pub field: TargetField,
    pub message: String,
}

impl FieldNote {
    pub fn new(field: TargetField, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Terminal outcome of one extraction task. Written through the result sink
/// exactly once per task; re-runs produce a new result rather than mutating
/// a prior one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub property_id: String,
    pub jurisdiction: String,
    #[serde(flatten)]
    pub fields: ExtractedFields,
    pub extraction_status: ExtractionStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<FieldNote>,
    pub attempts: u32,
    pub last_extraction_timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

/// A unit of work: one property paired with its jurisdiction strategy plus
/// mutable run state. Discarded once a terminal result is recorded.
#[derive(Debug)]
pub struct ExtractionTask {
    pub id: Uuid,
    pub record: PropertyRecord,
    /// Strategy for the record's jurisdiction; `None` means no descriptor is
    /// registered and the task resolves directly to `Blocked`.
    pub strategy: Option<Arc<JurisdictionStrategy>>,
    pub status: ExtractionStatus,
    pub attempts: u32,
}

impl ExtractionTask {
    pub fn new(record: PropertyRecord, strategy: Option<Arc<JurisdictionStrategy>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            record,
            strategy,
            status: ExtractionStatus::Pending,
            attempts: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!ExtractionStatus::Pending.is_terminal());
        assert!(!ExtractionStatus::InProgress.is_terminal());
        assert!(ExtractionStatus::Success.is_terminal());
        assert!(ExtractionStatus::NotFound.is_terminal());
        assert!(ExtractionStatus::ParseError.is_terminal());
        assert!(ExtractionStatus::Timeout.is_terminal());
        assert!(ExtractionStatus::Blocked.is_terminal());
    }

    #[test]
    fn result_roundtrips_through_json() {
        let result = ExtractionResult {
            property_id: "prop-42".into(),
            jurisdiction: "Wayne".into(),
            fields: ExtractedFields {
                amount_due: Some(8314.00),
                previous_year_taxes: Some(7989.12),
                tax_due_date: NaiveDate::from_ymd_opt(2026, 1, 5),
                paid_by: Some("Tenant".into()),
            },
            extraction_status: ExtractionStatus::Success,
            notes: vec![],
            attempts: 1,
            last_extraction_timestamp: Utc::now(),
            duration_ms: 1200,
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"extraction_status\":\"success\""));
        assert!(json.contains("\"amount_due\":8314.0"));

        let parsed: ExtractionResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.fields, result.fields);
        assert_eq!(parsed.extraction_status, ExtractionStatus::Success);
    }

    #[test]
    fn raw_fields_set_and_get() {
        let mut raw = RawFields::default();
        assert!(raw.is_empty());
        raw.set(TargetField::AmountDue, "$8,314.00".into());
        assert_eq!(raw.get(TargetField::AmountDue), Some("$8,314.00"));
        assert!(!raw.is_empty());
    }
}
