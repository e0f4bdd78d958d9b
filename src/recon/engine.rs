//! Deterministic matching engine.
//!
//! A pure function over (ContractRecord, InvoiceRecord, MatchContext): no
//! store access, no wall clock, no randomness. Anything historical the rules
//! need — duplicate detection, cumulative spend against the cap, vendor
//! aliases — arrives pre-resolved in the context, so identical inputs always
//! produce identical matches and flags.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use super::rules;
use super::similarity::{description_similarity, normalize_vendor};
use crate::config::ReconConfig;
use crate::schema::{
    ContractRecord, Flag, FlagEvidence, FlagType, InvoiceRecord, Match, MatchMethod, Severity,
};

/// History and lookup data resolved by the pipeline before matching.
#[derive(Debug, Clone, Default)]
pub struct MatchContext {
    /// Set when `(vendor, invoice_no)` was already reconciled: the id of the
    /// earlier invoice record.
    pub duplicate_of: Option<Uuid>,
    /// Total already reconciled against this contract across prior invoices.
    /// Baseline for the running cap check.
    pub prior_spend: f64,
    /// Vendor aliases, normalized form on both sides.
    pub vendor_aliases: HashMap<String, HashSet<String>>,
}

impl MatchContext {
    fn vendors_alias_of_each_other(&self, a: &str, b: &str) -> bool {
        let hit = |canonical: &str, candidate: &str| {
            self.vendor_aliases
                .get(canonical)
                .is_some_and(|aliases| aliases.contains(candidate))
        };
        hit(a, b) || hit(b, a)
    }
}

/// Output of the deterministic pass, before review and persistence.
#[derive(Debug, Clone)]
pub struct DraftResult {
    pub matches: Vec<Match>,
    pub flags: Vec<Flag>,
}

impl DraftResult {
    /// Whether the review stage is warranted: any flag at all, or any match
    /// the engine was not confident about.
    pub fn needs_review(&self, confidence_threshold: f32) -> bool {
        !self.flags.is_empty()
            || self
                .matches
                .iter()
                .any(|m| m.confidence < confidence_threshold)
    }
}

/// Run the deterministic pass: vendor/period/duplicate checks, greedy
/// one-to-one line matching, then the fixed rule set per accepted match.
pub fn reconcile(
    contract: &ContractRecord,
    invoice: &InvoiceRecord,
    ctx: &MatchContext,
    cfg: &ReconConfig,
) -> DraftResult {
    let mut flags = Vec::new();

    check_vendor(contract, invoice, ctx, &mut flags);
    check_period(contract, invoice, &mut flags);

    // Duplicate billing short-circuits line matching: the lines were already
    // reconciled under the earlier submission and must not consume terms twice.
    if let Some(earlier) = ctx.duplicate_of {
        let vendor = invoice.vendor.as_ref().map(String::as_str).unwrap_or("?");
        let number = invoice.invoice_no.as_ref().map(String::as_str).unwrap_or("?");
        flags.push(
            Flag::new(
                FlagType::DuplicateInvoice,
                Severity::Error,
                format!("Invoice {number} from {vendor} was already reconciled"),
            )
            .with_evidence(FlagEvidence {
                clause_reference: Some(format!("prior invoice record {earlier}")),
                ..Default::default()
            }),
        );
        return DraftResult {
            matches: vec![],
            flags,
        };
    }

    let matches = match_lines(contract, invoice, cfg, &mut flags);
    validate_matches(contract, invoice, &matches, ctx, cfg, &mut flags);

    DraftResult { matches, flags }
}

fn check_vendor(
    contract: &ContractRecord,
    invoice: &InvoiceRecord,
    ctx: &MatchContext,
    flags: &mut Vec<Flag>,
) {
    let (Some(contract_vendor), Some(invoice_vendor)) =
        (contract.vendor.as_ref(), invoice.vendor.as_ref())
    else {
        return; // missing vendor is an extraction problem, not a mismatch
    };

    let c = normalize_vendor(contract_vendor);
    let i = normalize_vendor(invoice_vendor);
    if c == i || ctx.vendors_alias_of_each_other(&c, &i) {
        return;
    }

    flags.push(Flag::new(
        FlagType::VendorMismatch,
        Severity::Error,
        format!("Invoice vendor '{invoice_vendor}' does not match contract vendor '{contract_vendor}'"),
    ));
}

fn check_period(contract: &ContractRecord, invoice: &InvoiceRecord, flags: &mut Vec<Flag>) {
    let (Some(date), Some(start), Some(end)) = (
        invoice.invoice_date.value,
        contract.start_date.value,
        contract.end_date.value,
    ) else {
        return; // missing dates do not fail this rule
    };

    if date < start || date > end {
        flags.push(
            Flag::new(
                FlagType::OutOfContractPeriod,
                Severity::Error,
                format!("Invoice date {date} is outside the contract period {start} – {end}"),
            )
            .with_evidence(FlagEvidence {
                service_dates: Some(crate::schema::ServiceDates {
                    invoice_start: Some(date),
                    invoice_end: None,
                    contract_start: Some(start),
                    contract_end: Some(end),
                }),
                ..Default::default()
            }),
        );
    }
}

/// Greedy one-to-one assignment in invoice-line order. Each contract term is
/// consumable at most once. Priority: exact code, then description
/// similarity, then unit/price tolerance.
fn match_lines(
    contract: &ContractRecord,
    invoice: &InvoiceRecord,
    cfg: &ReconConfig,
    flags: &mut Vec<Flag>,
) -> Vec<Match> {
    let mut matches = Vec::new();
    let mut consumed: HashSet<usize> = HashSet::new();

    for (line_index, line) in invoice.lines.iter().enumerate() {
        let found = find_by_code(contract, line, &consumed)
            .or_else(|| find_by_description(contract, line, &consumed, cfg))
            .or_else(|| find_by_unit_price(contract, line, &consumed, cfg));

        match found {
            Some((term_index, method, confidence)) => {
                consumed.insert(term_index);
                matches.push(Match {
                    invoice_line_index: line_index,
                    contract_term_index: term_index,
                    method,
                    confidence,
                });
            }
            None => {
                let desc = line.item_desc.as_ref().map(String::as_str).unwrap_or("?");
                flags.push(
                    Flag::new(
                        FlagType::UnmatchedLine,
                        Severity::Warning,
                        format!("Line {}: '{desc}' has no matching contract term", line_index + 1),
                    )
                    .with_evidence(FlagEvidence {
                        invoice_line_index: Some(line_index),
                        ..Default::default()
                    }),
                );
            }
        }
    }

    matches
}

fn find_by_code(
    contract: &ContractRecord,
    line: &crate::schema::InvoiceLine,
    consumed: &HashSet<usize>,
) -> Option<(usize, MatchMethod, f32)> {
    let code = line.item_code.as_ref()?.trim();
    if code.is_empty() {
        return None;
    }
    for (term_index, term) in contract.terms.iter().enumerate() {
        if consumed.contains(&term_index) {
            continue;
        }
        let Some(term_code) = term.item_code.as_ref() else {
            continue;
        };
        if term_code.trim().eq_ignore_ascii_case(code) {
            return Some((term_index, MatchMethod::Code, 1.0));
        }
    }
    None
}

fn find_by_description(
    contract: &ContractRecord,
    line: &crate::schema::InvoiceLine,
    consumed: &HashSet<usize>,
    cfg: &ReconConfig,
) -> Option<(usize, MatchMethod, f32)> {
    let desc = line.item_desc.as_ref()?;
    let mut best: Option<(usize, f32)> = None;

    for (term_index, term) in contract.terms.iter().enumerate() {
        if consumed.contains(&term_index) {
            continue;
        }
        let Some(term_desc) = term.item_desc.as_ref() else {
            continue;
        };
        let score = description_similarity(desc, term_desc);
        // strict > keeps ties on the lowest term index
        if score >= cfg.similarity_threshold && best.map_or(true, |(_, b)| score > b) {
            best = Some((term_index, score));
        }
    }

    best.map(|(term_index, score)| (term_index, MatchMethod::Description, score))
}

fn find_by_unit_price(
    contract: &ContractRecord,
    line: &crate::schema::InvoiceLine,
    consumed: &HashSet<usize>,
    cfg: &ReconConfig,
) -> Option<(usize, MatchMethod, f32)> {
    let unit = line.unit.as_ref()?;
    let price = line.unit_price.value?;
    let mut best: Option<(usize, f64)> = None;

    for (term_index, term) in contract.terms.iter().enumerate() {
        if consumed.contains(&term_index) {
            continue;
        }
        let (Some(term_unit), Some(term_price)) = (term.unit.as_ref(), term.unit_price.value)
        else {
            continue;
        };
        if term_price <= 0.0 || !term_unit.trim().eq_ignore_ascii_case(unit.trim()) {
            continue;
        }
        let relative_delta = (price - term_price).abs() / term_price;
        if relative_delta <= cfg.price_tolerance && best.map_or(true, |(_, b)| relative_delta < b) {
            best = Some((term_index, relative_delta));
        }
    }

    best.map(|(term_index, delta)| {
        (term_index, MatchMethod::UnitPrice, (1.0 - delta) as f32)
    })
}

/// Fixed rule set per accepted match, plus the running cap check across the
/// whole invoice (prior spend baseline comes from the context).
fn validate_matches(
    contract: &ContractRecord,
    invoice: &InvoiceRecord,
    matches: &[Match],
    ctx: &MatchContext,
    cfg: &ReconConfig,
    flags: &mut Vec<Flag>,
) {
    let allowance = contract.escalation_allowance();
    let cap = contract.cap_total.value;
    let mut cumulative = ctx.prior_spend;
    let mut cap_flagged = false;

    for m in matches {
        let line = &invoice.lines[m.invoice_line_index];
        let term = &contract.terms[m.contract_term_index];

        flags.extend(rules::check_line_math(line, m.invoice_line_index, cfg));
        flags.extend(rules::check_overpay(
            line,
            term,
            m.invoice_line_index,
            m.contract_term_index,
            allowance,
        ));
        flags.extend(rules::check_quantity_bounds(
            line,
            term,
            m.invoice_line_index,
            m.contract_term_index,
        ));
        flags.extend(rules::check_service_dates(
            line,
            term,
            m.invoice_line_index,
            m.contract_term_index,
        ));

        if let Some(amount) = line.line_total.value.or_else(|| line.computed_total()) {
            cumulative += amount;
            if let Some(cap_total) = cap {
                if !cap_flagged && cumulative > cap_total {
                    cap_flagged = true;
                    flags.push(
                        Flag::new(
                            FlagType::CapExceeded,
                            Severity::Error,
                            format!(
                                "Cumulative spend ${cumulative:.2} exceeds the contract cap ${cap_total:.2}"
                            ),
                        )
                        .with_evidence(FlagEvidence {
                            invoice_line_index: Some(m.invoice_line_index),
                            cumulative_total: Some(cumulative),
                            cap_total: Some(cap_total),
                            delta: Some(cumulative - cap_total),
                            clause_reference: Some("contract spend cap".to_string()),
                            ..Default::default()
                        }),
                    );
                }
            }
        }
    }
}
