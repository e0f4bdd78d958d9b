//! Invoice records as produced by the extraction tiers.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::contract::RecordStatus;
use super::field::ExtractedField;

/// One billed line of an invoice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub item_code: ExtractedField<String>,
    pub item_desc: ExtractedField<String>,
    pub unit: ExtractedField<String>,
    pub qty: ExtractedField<f64>,
    pub unit_price: ExtractedField<f64>,
    pub line_total: ExtractedField<f64>,
    pub service_period_start: ExtractedField<NaiveDate>,
    pub service_period_end: ExtractedField<NaiveDate>,
}

impl InvoiceLine {
    /// qty × unit_price when both are present.
    pub fn computed_total(&self) -> Option<f64> {
        match (self.qty.value, self.unit_price.value) {
            (Some(q), Some(p)) => Some(q * p),
            _ => None,
        }
    }
}

/// A structured invoice, as extracted from document text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub id: Uuid,
    pub vendor: ExtractedField<String>,
    pub invoice_no: ExtractedField<String>,
    pub invoice_date: ExtractedField<NaiveDate>,
    pub due_date: ExtractedField<NaiveDate>,
    /// Ordered as billed. Matching walks lines in this order.
    pub lines: Vec<InvoiceLine>,
    pub status: RecordStatus,
    pub needs_review: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InvoiceRecord {
    /// Natural deduplication key: normalized vendor + invoice number.
    /// `None` if either half is missing.
    pub fn natural_key(&self) -> Option<String> {
        let vendor = self.vendor.as_ref()?;
        let number = self.invoice_no.as_ref()?;
        Some(format!(
            "{}::{}",
            vendor.trim().to_lowercase(),
            number.trim().to_lowercase()
        ))
    }

    /// Sum of stated line totals (absent totals contribute nothing).
    pub fn stated_total(&self) -> f64 {
        self.lines
            .iter()
            .filter_map(|l| l.line_total.value)
            .sum()
    }
}
