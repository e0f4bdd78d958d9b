//! Review-stage payload and merge rules.
//!
//! The expensive tier sees a structured summary of the draft and may only
//! ADD: notes on existing flags and extra advisory findings. It can never
//! remove a flag, change a severity, or touch the matches. The merge here
//! enforces that shape regardless of what the model returns.

use serde::{Deserialize, Serialize};

use super::engine::DraftResult;
use crate::schema::{ContractRecord, Flag, FlagType, InvoiceRecord, Severity};

/// Compact summary sent to the review tier. Only the fields a reviewer
/// needs: raw extraction confidences stay out of the payload.
#[derive(Debug, Serialize)]
pub struct ReviewPayload<'a> {
    pub contract_vendor: Option<&'a str>,
    pub invoice_vendor: Option<&'a str>,
    pub invoice_no: Option<&'a str>,
    pub contract_terms: Vec<TermSummary<'a>>,
    pub invoice_lines: Vec<LineSummary<'a>>,
    pub matches: &'a [crate::schema::Match],
    pub flags: &'a [Flag],
}

#[derive(Debug, Serialize)]
pub struct TermSummary<'a> {
    pub index: usize,
    pub item_code: Option<&'a str>,
    pub item_desc: Option<&'a str>,
    pub unit: Option<&'a str>,
    pub unit_price: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct LineSummary<'a> {
    pub index: usize,
    pub item_code: Option<&'a str>,
    pub item_desc: Option<&'a str>,
    pub unit: Option<&'a str>,
    pub qty: Option<f64>,
    pub unit_price: Option<f64>,
    pub line_total: Option<f64>,
}

impl<'a> ReviewPayload<'a> {
    pub fn new(
        contract: &'a ContractRecord,
        invoice: &'a InvoiceRecord,
        draft: &'a DraftResult,
    ) -> Self {
        Self {
            contract_vendor: contract.vendor.as_ref().map(String::as_str),
            invoice_vendor: invoice.vendor.as_ref().map(String::as_str),
            invoice_no: invoice.invoice_no.as_ref().map(String::as_str),
            contract_terms: contract
                .terms
                .iter()
                .enumerate()
                .map(|(index, t)| TermSummary {
                    index,
                    item_code: t.item_code.as_ref().map(String::as_str),
                    item_desc: t.item_desc.as_ref().map(String::as_str),
                    unit: t.unit.as_ref().map(String::as_str),
                    unit_price: t.unit_price.value,
                })
                .collect(),
            invoice_lines: invoice
                .lines
                .iter()
                .enumerate()
                .map(|(index, l)| LineSummary {
                    index,
                    item_code: l.item_code.as_ref().map(String::as_str),
                    item_desc: l.item_desc.as_ref().map(String::as_str),
                    unit: l.unit.as_ref().map(String::as_str),
                    qty: l.qty.value,
                    unit_price: l.unit_price.value,
                    line_total: l.line_total.value,
                })
                .collect(),
            matches: &draft.matches,
            flags: &draft.flags,
        }
    }
}

/// What the review tier is allowed to contribute.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewAugmentation {
    /// Rationale for existing flags, addressed by draft flag index.
    #[serde(default)]
    pub flag_notes: Vec<FlagNote>,
    /// Extra findings the deterministic rules cannot see.
    #[serde(default)]
    pub advisory_flags: Vec<AdvisoryFinding>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlagNote {
    pub flag_index: usize,
    pub note: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdvisoryFinding {
    pub summary: String,
    #[serde(default)]
    pub severity: Option<Severity>,
}

/// Merge the augmentation into the draft flags. Additive only: notes attach
/// to flags that exist, advisory findings append as `Advisory`, and anything
/// out of range or malformed is dropped.
pub fn apply_review(mut flags: Vec<Flag>, augmentation: &ReviewAugmentation) -> Vec<Flag> {
    for note in &augmentation.flag_notes {
        if let Some(flag) = flags.get_mut(note.flag_index) {
            let trimmed = note.note.trim();
            if !trimmed.is_empty() {
                flag.review_note = Some(trimmed.to_string());
            }
        }
    }

    for finding in &augmentation.advisory_flags {
        let summary = finding.summary.trim();
        if summary.is_empty() {
            continue;
        }
        // advisory findings never carry Error weight
        let severity = finding
            .severity
            .unwrap_or(Severity::Info)
            .min(Severity::Warning);
        flags.push(Flag::new(FlagType::Advisory, severity, summary));
    }

    flags
}
