//! Matches, flags, and the versioned reconciliation result.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How an invoice line was paired with a contract term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    /// Exact (case-insensitive) item-code equality.
    Code,
    /// Description similarity above threshold.
    Description,
    /// Same unit, price within the tolerance band.
    UnitPrice,
}

/// One invoice-line ↔ contract-term pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub invoice_line_index: usize,
    pub contract_term_index: usize,
    pub method: MatchMethod,
    pub confidence: f32,
}

/// Policy and consistency findings. Flags are data, not errors: a run that
/// surfaces many of them is still a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagType {
    VendorMismatch,
    OutOfContractPeriod,
    DuplicateInvoice,
    UnmatchedLine,
    LineTotalMismatch,
    OverpayPerUnit,
    QuantityVariance,
    ServiceDateViolation,
    CapExceeded,
    /// Review tier was unreachable; the result is deterministic-only.
    ReviewUnavailable,
    /// Raised by the review stage; advisory, never math-backed.
    Advisory,
}

impl FlagType {
    /// Math-derived flags are computed from extracted numbers alone. The
    /// review stage may annotate them but can never delete or downgrade them.
    pub fn is_math_derived(self) -> bool {
        matches!(
            self,
            FlagType::LineTotalMismatch
                | FlagType::OverpayPerUnit
                | FlagType::CapExceeded
                | FlagType::DuplicateInvoice
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Service-period window cited as evidence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceDates {
    pub invoice_start: Option<NaiveDate>,
    pub invoice_end: Option<NaiveDate>,
    pub contract_start: Option<NaiveDate>,
    pub contract_end: Option<NaiveDate>,
}

/// Structured evidence backing a flag: the exact numbers and clause the
/// finding rests on. Only the relevant fields are populated per flag type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlagEvidence {
    pub invoice_line_index: Option<usize>,
    pub contract_term_index: Option<usize>,
    pub contract_price: Option<f64>,
    pub invoice_price: Option<f64>,
    pub delta: Option<f64>,
    pub cumulative_total: Option<f64>,
    pub cap_total: Option<f64>,
    pub clause_reference: Option<String>,
    pub service_dates: Option<ServiceDates>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    pub flag_type: FlagType,
    pub severity: Severity,
    pub summary: String,
    pub evidence: FlagEvidence,
    /// Rationale appended by the review stage, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_note: Option<String>,
}

impl Flag {
    pub fn new(flag_type: FlagType, severity: Severity, summary: impl Into<String>) -> Self {
        Self {
            flag_type,
            severity,
            summary: summary.into(),
            evidence: FlagEvidence::default(),
            review_note: None,
        }
    }

    pub fn with_evidence(mut self, evidence: FlagEvidence) -> Self {
        self.evidence = evidence;
        self
    }
}

/// How far the pipeline got before the result was persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    /// Deterministic pass only; no review was required.
    Deterministic,
    /// Review stage ran and augmented the result.
    Reviewed,
    /// Review was required but did not complete (timeout, cancel, failure).
    Partial,
}

impl ResultStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultStatus::Deterministic => "deterministic",
            ResultStatus::Reviewed => "reviewed",
            ResultStatus::Partial => "partial",
        }
    }
}

/// The persisted outcome of one reconciliation run. Immutable once stored;
/// re-running the same pair inserts a new version and keeps prior ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub invoice_id: Uuid,
    pub version: u32,
    pub status: ResultStatus,
    pub matches: Vec<Match>,
    pub flags: Vec<Flag>,
    pub created_at: DateTime<Utc>,
}

impl ReconciliationResult {
    /// Total matched spend: sum of stated line totals over matched lines.
    pub fn matched_total(&self, line_totals: &[Option<f64>]) -> f64 {
        self.matches
            .iter()
            .filter_map(|m| line_totals.get(m.invoice_line_index).copied().flatten())
            .sum()
    }
}
