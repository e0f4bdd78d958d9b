//! Fixed per-match validation rules.
//!
//! Each rule is a pure function from (line, term, indices, config) to an
//! optional flag. The engine runs them in a fixed order for every accepted
//! match; rule order is part of the deterministic output contract.

use crate::config::ReconConfig;
use crate::schema::{
    ContractTerm, Flag, FlagEvidence, FlagType, InvoiceLine, ServiceDates, Severity,
};

/// Human-readable pointer to the contract provision a flag rests on.
pub fn clause_reference(term: &ContractTerm, term_index: usize) -> String {
    match term.item_code.as_ref() {
        Some(code) => format!("schedule item {} ({code})", term_index + 1),
        None => format!("schedule item {}", term_index + 1),
    }
}

/// qty × unit_price must agree with the stated line total to the cent.
pub fn check_line_math(
    line: &InvoiceLine,
    line_index: usize,
    cfg: &ReconConfig,
) -> Option<Flag> {
    let expected = line.computed_total()?;
    let stated = line.line_total.value?;
    let delta = expected - stated;
    if delta.abs() <= cfg.math_tolerance {
        return None;
    }
    Some(
        Flag::new(
            FlagType::LineTotalMismatch,
            Severity::Error,
            format!(
                "Line {}: qty × unit price is ${expected:.2} but stated total is ${stated:.2}",
                line_index + 1
            ),
        )
        .with_evidence(FlagEvidence {
            invoice_line_index: Some(line_index),
            invoice_price: Some(stated),
            delta: Some(delta),
            ..Default::default()
        }),
    )
}

/// Invoiced unit price may not exceed the contract price beyond the
/// contract's own escalation allowance.
pub fn check_overpay(
    line: &InvoiceLine,
    term: &ContractTerm,
    line_index: usize,
    term_index: usize,
    escalation_allowance: f64,
) -> Option<Flag> {
    let invoice_price = line.unit_price.value?;
    let contract_price = term.unit_price.value?;
    let ceiling = contract_price * (1.0 + escalation_allowance);
    if invoice_price <= ceiling {
        return None;
    }
    let delta = invoice_price - contract_price;
    Some(
        Flag::new(
            FlagType::OverpayPerUnit,
            Severity::Error,
            format!(
                "Unit price ${invoice_price:.2} exceeds contract price ${contract_price:.2}"
            ),
        )
        .with_evidence(FlagEvidence {
            invoice_line_index: Some(line_index),
            contract_term_index: Some(term_index),
            contract_price: Some(contract_price),
            invoice_price: Some(invoice_price),
            delta: Some(delta),
            clause_reference: Some(clause_reference(term, term_index)),
            ..Default::default()
        }),
    )
}

/// Billed quantity must sit inside the term's [min_qty, max_qty] band.
pub fn check_quantity_bounds(
    line: &InvoiceLine,
    term: &ContractTerm,
    line_index: usize,
    term_index: usize,
) -> Option<Flag> {
    let qty = line.qty.value?;
    let below_min = term.min_qty.value.is_some_and(|min| qty < min);
    let above_max = term.max_qty.value.is_some_and(|max| qty > max);
    if !below_min && !above_max {
        return None;
    }
    let bound = if above_max {
        format!("maximum {}", term.max_qty.value.unwrap_or_default())
    } else {
        format!("minimum {}", term.min_qty.value.unwrap_or_default())
    };
    Some(
        Flag::new(
            FlagType::QuantityVariance,
            Severity::Warning,
            format!("Line {}: quantity {qty} is outside the allowed {bound}", line_index + 1),
        )
        .with_evidence(FlagEvidence {
            invoice_line_index: Some(line_index),
            contract_term_index: Some(term_index),
            clause_reference: Some(clause_reference(term, term_index)),
            ..Default::default()
        }),
    )
}

/// The billed service period must fall within the term's effective window.
/// Missing endpoints do not trigger the rule.
pub fn check_service_dates(
    line: &InvoiceLine,
    term: &ContractTerm,
    line_index: usize,
    term_index: usize,
) -> Option<Flag> {
    let window_start = term.effective_start.value;
    let window_end = term.effective_end.value;
    if window_start.is_none() && window_end.is_none() {
        return None;
    }

    let outside = |d: chrono::NaiveDate| {
        window_start.is_some_and(|s| d < s) || window_end.is_some_and(|e| d > e)
    };
    let start_out = line.service_period_start.value.is_some_and(outside);
    let end_out = line.service_period_end.value.is_some_and(outside);
    if !start_out && !end_out {
        return None;
    }

    Some(
        Flag::new(
            FlagType::ServiceDateViolation,
            Severity::Warning,
            format!(
                "Line {}: service period is outside the term's effective window",
                line_index + 1
            ),
        )
        .with_evidence(FlagEvidence {
            invoice_line_index: Some(line_index),
            contract_term_index: Some(term_index),
            clause_reference: Some(clause_reference(term, term_index)),
            service_dates: Some(ServiceDates {
                invoice_start: line.service_period_start.value,
                invoice_end: line.service_period_end.value,
                contract_start: window_start,
                contract_end: window_end,
            }),
            ..Default::default()
        }),
    )
}
