//! Next-payment preview.
//!
//! A read-only forecast of what the next invoice against a contract should
//! look like: nothing here touches the store or the model tiers. Quantities
//! come from billing history when available, prices from the contract
//! schedule with escalation applied per elapsed anniversary.

use chrono::{Days, NaiveDate};
use serde::Serialize;
use uuid::Uuid;

use crate::config::ReconConfig;
use crate::schema::contract::EscalationKind;
use crate::schema::{ContractRecord, InvoiceRecord};

const PREVIEW_PERIOD_DAYS: u64 = 30;

/// One forecast line, mirroring a contract term.
#[derive(Debug, Clone, Serialize)]
pub struct PreviewLine {
    pub contract_term_index: usize,
    pub item_code: Option<String>,
    pub item_desc: Option<String>,
    pub expected_qty: f64,
    pub expected_unit_price: f64,
    pub expected_total: f64,
}

/// Forecast of the next billing period. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentPreview {
    pub contract_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub lines: Vec<PreviewLine>,
    pub subtotal: f64,
    pub tax: f64,
    pub total: f64,
    /// Plain-language notes on every guess the forecast had to make.
    pub assumptions: Vec<String>,
}

/// Build the preview for `as_of`: one line per contract term whose effective
/// window contains that date.
pub fn generate_preview(
    contract: &ContractRecord,
    invoice_history: &[InvoiceRecord],
    as_of: NaiveDate,
    cfg: &ReconConfig,
) -> PaymentPreview {
    let mut lines = Vec::new();
    let mut assumptions = Vec::new();

    let elapsed_years = contract
        .start_date
        .value
        .and_then(|start| as_of.years_since(start))
        .unwrap_or(0);
    let escalation_factor = escalation_factor(contract, elapsed_years, cfg, &mut assumptions);

    for (term_index, term) in contract.terms.iter().enumerate() {
        if !term.active_on(as_of) {
            continue;
        }
        let Some(base_price) = term.unit_price.value else {
            continue;
        };

        let label = term
            .item_code
            .as_ref()
            .or(term.item_desc.as_ref())
            .cloned()
            .unwrap_or_else(|| format!("term {}", term_index + 1));

        let qty = match last_observed_qty(term.item_code.as_ref(), invoice_history) {
            Some(observed) => {
                assumptions.push(format!(
                    "Quantity for {label} taken from the most recent invoice ({observed})"
                ));
                observed
            }
            None => match term.min_qty.value {
                Some(min) => {
                    assumptions.push(format!(
                        "No billing history for {label}; quantity assumed at contract minimum ({min})"
                    ));
                    min
                }
                None => {
                    assumptions.push(format!(
                        "No billing history or minimum for {label}; quantity assumed 1"
                    ));
                    1.0
                }
            },
        };

        let price = base_price * escalation_factor;
        lines.push(PreviewLine {
            contract_term_index: term_index,
            item_code: term.item_code.as_ref().cloned(),
            item_desc: term.item_desc.as_ref().cloned(),
            expected_qty: qty,
            expected_unit_price: price,
            expected_total: qty * price,
        });
    }

    let subtotal: f64 = lines.iter().map(|l| l.expected_total).sum();
    let tax = subtotal * cfg.tax_rate;
    assumptions.push(format!("Tax estimated at {:.1}%", cfg.tax_rate * 100.0));

    PaymentPreview {
        contract_id: contract.id,
        period_start: as_of,
        period_end: as_of
            .checked_add_days(Days::new(PREVIEW_PERIOD_DAYS))
            .unwrap_or(as_of),
        lines,
        subtotal,
        tax,
        total: subtotal + tax,
        assumptions,
    }
}

/// Compounded escalation multiplier for the elapsed anniversaries.
fn escalation_factor(
    contract: &ContractRecord,
    elapsed_years: u32,
    cfg: &ReconConfig,
    assumptions: &mut Vec<String>,
) -> f64 {
    if elapsed_years == 0 {
        return 1.0;
    }
    let Some(escalation) = contract.price_escalation.value.as_ref() else {
        return 1.0;
    };
    match escalation.kind {
        EscalationKind::FixedPct => {
            let pct = escalation.amount_pct.unwrap_or(0.0);
            assumptions.push(format!(
                "Prices escalated {pct}% per year over {elapsed_years} elapsed year(s)"
            ));
            (1.0 + pct / 100.0).powi(elapsed_years as i32)
        }
        EscalationKind::Cpi => {
            let pct = cfg.cpi_assumption * 100.0;
            assumptions.push(format!(
                "CPI escalation assumed at {pct:.1}% per year over {elapsed_years} elapsed year(s)"
            ));
            (1.0 + cfg.cpi_assumption).powi(elapsed_years as i32)
        }
        EscalationKind::None => 1.0,
    }
}

/// Most recent billed quantity for a term, matched by item code. History is
/// scanned in the order given; the caller passes it oldest first.
fn last_observed_qty(term_code: Option<&String>, history: &[InvoiceRecord]) -> Option<f64> {
    let code = term_code?.trim();
    if code.is_empty() {
        return None;
    }
    let mut last = None;
    for invoice in history {
        for line in &invoice.lines {
            let matches_code = line
                .item_code
                .as_ref()
                .is_some_and(|c| c.trim().eq_ignore_ascii_case(code));
            if matches_code {
                if let Some(qty) = line.qty.value {
                    last = Some(qty);
                }
            }
        }
    }
    last
}
