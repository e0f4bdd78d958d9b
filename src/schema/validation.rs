//! Post-parse schema validation for extracted records.
//!
//! Applied between parsing a model response and accepting the record. Decides
//! whether the extraction tier router must escalate: missing required fields,
//! out-of-range confidences, and line-math cross-check failures all do.

use super::contract::ContractRecord;
use super::invoice::InvoiceRecord;

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub reason: IssueReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueReason {
    RequiredFieldMissing,
    ConfidenceOutOfRange,
    /// qty × unit_price disagrees with line_total beyond tolerance.
    LineMathMismatch,
}

impl IssueReason {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueReason::RequiredFieldMissing => "required field missing",
            IssueReason::ConfidenceOutOfRange => "confidence out of range",
            IssueReason::LineMathMismatch => "line math mismatch",
        }
    }
}

/// Outcome of validating one record against the current schema.
#[derive(Debug, Clone)]
pub struct RecordValidation {
    pub issues: Vec<ValidationIssue>,
    /// Minimum confidence across required fields. Zero when any is missing.
    pub aggregate_confidence: f32,
}

impl RecordValidation {
    /// True when the record must not be accepted from the cheap tier:
    /// required fields missing, invalid confidences, or failed cross-checks.
    pub fn requires_escalation(&self, confidence_threshold: f32) -> bool {
        !self.issues.is_empty() || self.aggregate_confidence < confidence_threshold
    }

    /// Terminal condition: the record cannot be accepted from any tier.
    /// Low confidence alone is not terminal (the record is accepted with
    /// `needs_review`); structural issues are.
    pub fn is_schema_invalid(&self) -> bool {
        self.issues.iter().any(|i| {
            matches!(
                i.reason,
                IssueReason::RequiredFieldMissing | IssueReason::ConfidenceOutOfRange
            )
        })
    }

    /// Issue summary for error messages, e.g. "vendor: required field missing".
    pub fn describe(&self) -> String {
        self.issues
            .iter()
            .map(|i| format!("{}: {}", i.field, i.reason.as_str()))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Validate a contract record. Required fields: vendor, start_date, end_date.
pub fn validate_contract(record: &ContractRecord) -> RecordValidation {
    let mut issues = Vec::new();
    let mut aggregate: f32 = 1.0;

    for (name, present, confidence, in_range) in [
        (
            "vendor",
            record.vendor.is_present(),
            record.vendor.confidence,
            record.vendor.confidence_in_range(),
        ),
        (
            "start_date",
            record.start_date.is_present(),
            record.start_date.confidence,
            record.start_date.confidence_in_range(),
        ),
        (
            "end_date",
            record.end_date.is_present(),
            record.end_date.confidence,
            record.end_date.confidence_in_range(),
        ),
    ] {
        check_required(name, present, confidence, in_range, &mut issues, &mut aggregate);
    }

    for (idx, term) in record.terms.iter().enumerate() {
        if !term.unit_price.confidence_in_range() {
            issues.push(ValidationIssue {
                field: format!("terms[{idx}].unit_price"),
                reason: IssueReason::ConfidenceOutOfRange,
            });
        }
    }

    RecordValidation {
        issues,
        aggregate_confidence: aggregate,
    }
}

/// Validate an invoice record. Required fields: vendor, invoice_no,
/// invoice_date. Every line with qty, unit price, and total gets the math
/// cross-check.
pub fn validate_invoice(record: &InvoiceRecord, math_tolerance: f64) -> RecordValidation {
    let mut issues = Vec::new();
    let mut aggregate: f32 = 1.0;

    for (name, present, confidence, in_range) in [
        (
            "vendor",
            record.vendor.is_present(),
            record.vendor.confidence,
            record.vendor.confidence_in_range(),
        ),
        (
            "invoice_no",
            record.invoice_no.is_present(),
            record.invoice_no.confidence,
            record.invoice_no.confidence_in_range(),
        ),
        (
            "invoice_date",
            record.invoice_date.is_present(),
            record.invoice_date.confidence,
            record.invoice_date.confidence_in_range(),
        ),
    ] {
        check_required(name, present, confidence, in_range, &mut issues, &mut aggregate);
    }

    for (idx, line) in record.lines.iter().enumerate() {
        if let (Some(expected), Some(stated)) = (line.computed_total(), line.line_total.value) {
            if (expected - stated).abs() > math_tolerance {
                issues.push(ValidationIssue {
                    field: format!("lines[{idx}].line_total"),
                    reason: IssueReason::LineMathMismatch,
                });
            }
        }
    }

    RecordValidation {
        issues,
        aggregate_confidence: aggregate,
    }
}

fn check_required(
    name: &str,
    present: bool,
    confidence: f32,
    in_range: bool,
    issues: &mut Vec<ValidationIssue>,
    aggregate: &mut f32,
) {
    if !present {
        issues.push(ValidationIssue {
            field: name.to_string(),
            reason: IssueReason::RequiredFieldMissing,
        });
        *aggregate = 0.0;
        return;
    }
    if !in_range {
        issues.push(ValidationIssue {
            field: name.to_string(),
            reason: IssueReason::ConfidenceOutOfRange,
        });
        *aggregate = 0.0;
        return;
    }
    *aggregate = aggregate.min(confidence);
}
