//! Contract records as produced by the extraction tiers.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::field::ExtractedField;

/// How contract prices are allowed to move over time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationKind {
    /// Fixed percentage increase per contract anniversary.
    FixedPct,
    /// Indexed to CPI; the exact rate is not in the contract text.
    Cpi,
    #[default]
    None,
}

/// Price escalation clause: type plus the stated annual percentage, when the
/// contract gives one (e.g. 3.0 means 3% per year).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceEscalation {
    pub kind: EscalationKind,
    pub amount_pct: Option<f64>,
}

impl PriceEscalation {
    pub fn none() -> Self {
        Self {
            kind: EscalationKind::None,
            amount_pct: None,
        }
    }

    /// The allowance applied when checking invoiced prices against contract
    /// prices: the stated fixed percentage as a fraction, else zero.
    pub fn overpay_allowance(&self) -> f64 {
        match self.kind {
            EscalationKind::FixedPct => self.amount_pct.unwrap_or(0.0) / 100.0,
            _ => 0.0,
        }
    }
}

/// One priced line of the contract's service schedule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractTerm {
    pub item_code: ExtractedField<String>,
    pub item_desc: ExtractedField<String>,
    pub unit: ExtractedField<String>,
    pub unit_price: ExtractedField<f64>,
    pub min_qty: ExtractedField<f64>,
    pub max_qty: ExtractedField<f64>,
    pub effective_start: ExtractedField<NaiveDate>,
    pub effective_end: ExtractedField<NaiveDate>,
}

impl ContractTerm {
    /// Whether this term's effective window contains the given date.
    /// A missing bound does not exclude the date (extraction gaps must not
    /// silently disable a term).
    pub fn active_on(&self, date: NaiveDate) -> bool {
        let after_start = self.effective_start.value.map_or(true, |s| s <= date);
        let before_end = self.effective_end.value.map_or(true, |e| date <= e);
        after_start && before_end
    }
}

/// Record lifecycle. Records are never hard-deleted; retirement is a status
/// transition recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Active,
    Archived,
}

/// A structured contract, as extracted from document text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractRecord {
    pub id: Uuid,
    pub vendor: ExtractedField<String>,
    pub service_category: ExtractedField<String>,
    pub start_date: ExtractedField<NaiveDate>,
    pub end_date: ExtractedField<NaiveDate>,
    pub auto_renew: ExtractedField<bool>,
    pub renewal_notice_days: ExtractedField<u32>,
    pub price_escalation: ExtractedField<PriceEscalation>,
    pub cap_total: ExtractedField<f64>,
    pub allowed_fees: ExtractedField<Vec<String>>,
    /// Ordered service schedule. Order matters for match tie-breaking.
    pub terms: Vec<ContractTerm>,
    pub status: RecordStatus,
    /// Set when aggregate extraction confidence stayed below threshold even
    /// after escalation to the expensive tier.
    pub needs_review: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContractRecord {
    /// The escalation allowance for overpay checks (fraction, not percent).
    pub fn escalation_allowance(&self) -> f64 {
        self.price_escalation
            .as_ref()
            .map_or(0.0, PriceEscalation::overpay_allowance)
    }
}
