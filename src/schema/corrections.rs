//! Reviewer corrections.
//!
//! A correction addresses one extracted field by name ("vendor",
//! "terms.0.unit_price") and replaces its value. Corrected fields carry
//! confidence 1.0: a human said so. A null value clears the field.

use serde::de::DeserializeOwned;
use thiserror::Error;

use super::field::ExtractedField;
use super::{ContractRecord, InvoiceRecord};

#[derive(Error, Debug)]
pub enum CorrectionError {
    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("index out of range in '{0}'")]
    IndexOutOfRange(String),

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

fn set<T: DeserializeOwned>(
    target: &mut ExtractedField<T>,
    field: &str,
    value: &serde_json::Value,
) -> Result<(), CorrectionError> {
    if value.is_null() {
        *target = ExtractedField::absent();
        return Ok(());
    }
    let parsed: T =
        serde_json::from_value(value.clone()).map_err(|e| CorrectionError::InvalidValue {
            field: field.to_string(),
            reason: e.to_string(),
        })?;
    *target = ExtractedField::corrected(parsed);
    Ok(())
}

/// Split "terms.3.unit_price" into (index, tail).
fn indexed<'a>(path: &'a str, field: &str) -> Result<(usize, &'a str), CorrectionError> {
    let mut parts = path.splitn(2, '.');
    let index = parts
        .next()
        .and_then(|p| p.parse::<usize>().ok())
        .ok_or_else(|| CorrectionError::UnknownField(field.to_string()))?;
    let tail = parts
        .next()
        .ok_or_else(|| CorrectionError::UnknownField(field.to_string()))?;
    Ok((index, tail))
}

pub fn apply_contract_correction(
    record: &mut ContractRecord,
    field: &str,
    value: &serde_json::Value,
) -> Result<(), CorrectionError> {
    match field {
        "vendor" => set(&mut record.vendor, field, value),
        "service_category" => set(&mut record.service_category, field, value),
        "start_date" => set(&mut record.start_date, field, value),
        "end_date" => set(&mut record.end_date, field, value),
        "auto_renew" => set(&mut record.auto_renew, field, value),
        "renewal_notice_days" => set(&mut record.renewal_notice_days, field, value),
        "price_escalation" => set(&mut record.price_escalation, field, value),
        "cap_total" => set(&mut record.cap_total, field, value),
        "allowed_fees" => set(&mut record.allowed_fees, field, value),
        _ => {
            let rest = field
                .strip_prefix("terms.")
                .ok_or_else(|| CorrectionError::UnknownField(field.to_string()))?;
            let (index, tail) = indexed(rest, field)?;
            let term = record
                .terms
                .get_mut(index)
                .ok_or_else(|| CorrectionError::IndexOutOfRange(field.to_string()))?;
            match tail {
                "item_code" => set(&mut term.item_code, field, value),
                "item_desc" => set(&mut term.item_desc, field, value),
                "unit" => set(&mut term.unit, field, value),
                "unit_price" => set(&mut term.unit_price, field, value),
                "min_qty" => set(&mut term.min_qty, field, value),
                "max_qty" => set(&mut term.max_qty, field, value),
                "effective_start" => set(&mut term.effective_start, field, value),
                "effective_end" => set(&mut term.effective_end, field, value),
                _ => Err(CorrectionError::UnknownField(field.to_string())),
            }
        }
    }
}

pub fn apply_invoice_correction(
    record: &mut InvoiceRecord,
    field: &str,
    value: &serde_json::Value,
) -> Result<(), CorrectionError> {
    match field {
        "vendor" => set(&mut record.vendor, field, value),
        "invoice_no" => set(&mut record.invoice_no, field, value),
        "invoice_date" => set(&mut record.invoice_date, field, value),
        "due_date" => set(&mut record.due_date, field, value),
        _ => {
            let rest = field
                .strip_prefix("lines.")
                .ok_or_else(|| CorrectionError::UnknownField(field.to_string()))?;
            let (index, tail) = indexed(rest, field)?;
            let line = record
                .lines
                .get_mut(index)
                .ok_or_else(|| CorrectionError::IndexOutOfRange(field.to_string()))?;
            match tail {
                "item_code" => set(&mut line.item_code, field, value),
                "item_desc" => set(&mut line.item_desc, field, value),
                "unit" => set(&mut line.unit, field, value),
                "qty" => set(&mut line.qty, field, value),
                "unit_price" => set(&mut line.unit_price, field, value),
                "line_total" => set(&mut line.line_total, field, value),
                "service_period_start" => set(&mut line.service_period_start, field, value),
                "service_period_end" => set(&mut line.service_period_end, field, value),
                _ => Err(CorrectionError::UnknownField(field.to_string())),
            }
        }
    }
}
