//! Model response parsing: fence stripping, wire DTOs, and conversion into
//! typed records.
//!
//! Wire shapes mirror the prompt schemas exactly. Dates arrive as strings
//! and are converted here; an unparseable date becomes an absent field
//! rather than a parse failure, so one bad date cannot sink a whole record.

use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use uuid::Uuid;

use super::ExtractionError;
use crate::recon::ReviewAugmentation;
use crate::schema::contract::{PriceEscalation, RecordStatus};
use crate::schema::{ContractRecord, ContractTerm, ExtractedField, InvoiceLine, InvoiceRecord};

/// Strip a markdown code fence if the model wrapped its JSON in one.
/// Tolerates ```json and bare ``` fences, with or without trailing text.
pub fn strip_code_fences(response: &str) -> &str {
    let trimmed = response.trim();
    for opener in ["```json", "```"] {
        if let Some(start) = trimmed.find(opener) {
            let body = &trimmed[start + opener.len()..];
            if let Some(end) = body.find("```") {
                return body[..end].trim();
            }
            return body.trim();
        }
    }
    trimmed
}

/// One extracted field on the wire: nullable value plus stated confidence.
/// A missing confidence counts as zero, which routes the record toward
/// escalation instead of silently trusting it.
#[derive(Debug, Deserialize)]
pub struct FieldDto<T> {
    #[serde(default)]
    pub value: Option<T>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl<T> Default for FieldDto<T> {
    fn default() -> Self {
        Self {
            value: None,
            confidence: None,
        }
    }
}

impl<T> FieldDto<T> {
    fn into_field(self) -> ExtractedField<T> {
        match self.value {
            Some(v) => ExtractedField::new(v, self.confidence.unwrap_or(0.0)),
            None => ExtractedField::absent(),
        }
    }
}

/// Date fields travel as ISO strings.
type DateDto = FieldDto<String>;

fn into_date_field(dto: DateDto) -> ExtractedField<NaiveDate> {
    let confidence = dto.confidence.unwrap_or(0.0);
    match dto.value.as_deref().map(str::parse::<NaiveDate>) {
        Some(Ok(date)) => ExtractedField::new(date, confidence),
        _ => ExtractedField::absent(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct ContractDto {
    #[serde(default)]
    vendor: FieldDto<String>,
    #[serde(default)]
    service_category: FieldDto<String>,
    #[serde(default)]
    start_date: DateDto,
    #[serde(default)]
    end_date: DateDto,
    #[serde(default)]
    auto_renew: FieldDto<bool>,
    #[serde(default)]
    renewal_notice_days: FieldDto<u32>,
    #[serde(default)]
    price_escalation: FieldDto<PriceEscalation>,
    #[serde(default)]
    cap_total: FieldDto<f64>,
    #[serde(default)]
    allowed_fees: FieldDto<Vec<String>>,
    #[serde(default)]
    terms: Vec<ContractTermDto>,
}

#[derive(Debug, Default, Deserialize)]
struct ContractTermDto {
    #[serde(default)]
    item_code: FieldDto<String>,
    #[serde(default)]
    item_desc: FieldDto<String>,
    #[serde(default)]
    unit: FieldDto<String>,
    #[serde(default)]
    unit_price: FieldDto<f64>,
    #[serde(default)]
    min_qty: FieldDto<f64>,
    #[serde(default)]
    max_qty: FieldDto<f64>,
    #[serde(default)]
    effective_start: DateDto,
    #[serde(default)]
    effective_end: DateDto,
}

#[derive(Debug, Default, Deserialize)]
struct InvoiceDto {
    #[serde(default)]
    vendor: FieldDto<String>,
    #[serde(default)]
    invoice_no: FieldDto<String>,
    #[serde(default)]
    invoice_date: DateDto,
    #[serde(default)]
    due_date: DateDto,
    #[serde(default)]
    lines: Vec<InvoiceLineDto>,
}

#[derive(Debug, Default, Deserialize)]
struct InvoiceLineDto {
    #[serde(default)]
    item_code: FieldDto<String>,
    #[serde(default)]
    item_desc: FieldDto<String>,
    #[serde(default)]
    unit: FieldDto<String>,
    #[serde(default)]
    qty: FieldDto<f64>,
    #[serde(default)]
    unit_price: FieldDto<f64>,
    #[serde(default)]
    line_total: FieldDto<f64>,
    #[serde(default)]
    service_period_start: DateDto,
    #[serde(default)]
    service_period_end: DateDto,
}

/// Parse a contract extraction response into a fresh record.
pub fn parse_contract_response(response: &str) -> Result<ContractRecord, ExtractionError> {
    let dto: ContractDto = serde_json::from_str(strip_code_fences(response))
        .map_err(|e| ExtractionError::JsonParsing(e.to_string()))?;

    let now = Utc::now();
    Ok(ContractRecord {
        id: Uuid::new_v4(),
        vendor: dto.vendor.into_field(),
        service_category: dto.service_category.into_field(),
        start_date: into_date_field(dto.start_date),
        end_date: into_date_field(dto.end_date),
        auto_renew: dto.auto_renew.into_field(),
        renewal_notice_days: dto.renewal_notice_days.into_field(),
        price_escalation: dto.price_escalation.into_field(),
        cap_total: dto.cap_total.into_field(),
        allowed_fees: dto.allowed_fees.into_field(),
        terms: dto.terms.into_iter().map(into_term).collect(),
        status: RecordStatus::Active,
        needs_review: false,
        created_at: now,
        updated_at: now,
    })
}

fn into_term(dto: ContractTermDto) -> ContractTerm {
    ContractTerm {
        item_code: dto.item_code.into_field(),
        item_desc: dto.item_desc.into_field(),
        unit: dto.unit.into_field(),
        unit_price: dto.unit_price.into_field(),
        min_qty: dto.min_qty.into_field(),
        max_qty: dto.max_qty.into_field(),
        effective_start: into_date_field(dto.effective_start),
        effective_end: into_date_field(dto.effective_end),
    }
}

/// Parse an invoice extraction response into a fresh record.
pub fn parse_invoice_response(response: &str) -> Result<InvoiceRecord, ExtractionError> {
    let dto: InvoiceDto = serde_json::from_str(strip_code_fences(response))
        .map_err(|e| ExtractionError::JsonParsing(e.to_string()))?;

    let now = Utc::now();
    Ok(InvoiceRecord {
        id: Uuid::new_v4(),
        vendor: dto.vendor.into_field(),
        invoice_no: dto.invoice_no.into_field(),
        invoice_date: into_date_field(dto.invoice_date),
        due_date: into_date_field(dto.due_date),
        lines: dto.lines.into_iter().map(into_line).collect(),
        status: RecordStatus::Active,
        needs_review: false,
        created_at: now,
        updated_at: now,
    })
}

fn into_line(dto: InvoiceLineDto) -> InvoiceLine {
    InvoiceLine {
        item_code: dto.item_code.into_field(),
        item_desc: dto.item_desc.into_field(),
        unit: dto.unit.into_field(),
        qty: dto.qty.into_field(),
        unit_price: dto.unit_price.into_field(),
        line_total: dto.line_total.into_field(),
        service_period_start: into_date_field(dto.service_period_start),
        service_period_end: into_date_field(dto.service_period_end),
    }
}

/// Parse a review-tier response into an augmentation.
pub fn parse_review_response(response: &str) -> Result<ReviewAugmentation, ExtractionError> {
    serde_json::from_str(strip_code_fences(response))
        .map_err(|e| ExtractionError::JsonParsing(e.to_string()))
}
