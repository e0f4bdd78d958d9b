//! Confidence-gated tier routing.
//!
//! Every document goes to the cheap tier first. The result is parsed and
//! validated; anything below the confidence bar or failing a schema check
//! escalates ONCE to the expensive tier. A record that is still
//! schema-invalid after escalation is a terminal failure and nothing is
//! persisted. A record that merely stays under the confidence bar is
//! accepted with `needs_review` set.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use super::client::ModelClient;
use super::parser::{parse_contract_response, parse_invoice_response, parse_review_response};
use super::{prompt, ExtractionError};
use crate::cache::{cache_key, ResponseCache};
use crate::config::{ModelConfig, ReconConfig};
use crate::recon::{ReviewAugmentation, ReviewPayload};
use crate::schema::{validate_contract, validate_invoice, ContractRecord, InvoiceRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Contract,
    Invoice,
}

/// How a raw model response stands against the current schema.
enum Judgement {
    /// Parses, valid, confident.
    Accept,
    /// Parses and structurally valid, but under the confidence bar.
    LowConfidence,
    /// Structural problems (missing required field, bad confidence range).
    Invalid(String),
    Unparseable(ExtractionError),
}

impl Judgement {
    fn from(validation: &crate::schema::RecordValidation, threshold: f32) -> Self {
        if validation.is_schema_invalid() {
            Judgement::Invalid(validation.describe())
        } else if validation.requires_escalation(threshold) {
            Judgement::LowConfidence
        } else {
            Judgement::Accept
        }
    }
}

pub struct TierRouter {
    client: Arc<dyn ModelClient>,
    cache: Arc<ResponseCache>,
    model: ModelConfig,
    recon: ReconConfig,
}

impl TierRouter {
    pub fn new(
        client: Arc<dyn ModelClient>,
        cache: Arc<ResponseCache>,
        model: ModelConfig,
        recon: ReconConfig,
    ) -> Self {
        Self {
            client,
            cache,
            model,
            recon,
        }
    }

    pub fn extract_contract(&self, text: &str) -> Result<ContractRecord, ExtractionError> {
        let threshold = self.recon.confidence_threshold;
        let response = self.extract_raw(
            text,
            prompt::CONTRACT_SYSTEM_PROMPT,
            &prompt::build_contract_prompt(text),
            |response| match parse_contract_response(response) {
                Ok(record) => Judgement::from(&validate_contract(&record), threshold),
                Err(e) => Judgement::Unparseable(e),
            },
        )?;
        let mut record = parse_contract_response(&response)?;
        record.needs_review = validate_contract(&record).requires_escalation(threshold);
        Ok(record)
    }

    pub fn extract_invoice(&self, text: &str) -> Result<InvoiceRecord, ExtractionError> {
        let threshold = self.recon.confidence_threshold;
        let math_tolerance = self.recon.math_tolerance;
        let response = self.extract_raw(
            text,
            prompt::INVOICE_SYSTEM_PROMPT,
            &prompt::build_invoice_prompt(text),
            |response| match parse_invoice_response(response) {
                Ok(record) => {
                    Judgement::from(&validate_invoice(&record, math_tolerance), threshold)
                }
                Err(e) => Judgement::Unparseable(e),
            },
        )?;
        let mut record = parse_invoice_response(&response)?;
        record.needs_review =
            validate_invoice(&record, math_tolerance).requires_escalation(threshold);
        Ok(record)
    }

    /// Review runs on the expensive tier only and is never cached: its
    /// input embeds record ids that are unique per run anyway.
    pub fn review(&self, payload: &ReviewPayload<'_>) -> Result<ReviewAugmentation, ExtractionError> {
        let payload_json = serde_json::to_string(payload)
            .map_err(|e| ExtractionError::JsonParsing(e.to_string()))?;
        self.review_json(&payload_json)
    }

    /// Review from a pre-serialized payload, for callers that hand the call
    /// off to a blocking worker.
    pub fn review_json(&self, payload_json: &str) -> Result<ReviewAugmentation, ExtractionError> {
        let response = self.call_with_retries(
            &self.model.expensive_model,
            prompt::REVIEW_SYSTEM_PROMPT,
            &prompt::build_review_prompt(payload_json),
        )?;
        parse_review_response(&response)
    }

    /// Cache check, single-flight, cheap call, conditional escalation.
    fn extract_raw(
        &self,
        text: &str,
        system: &str,
        user: &str,
        judge: impl Fn(&str) -> Judgement,
    ) -> Result<String, ExtractionError> {
        let key = cache_key(
            &normalize_for_key(text),
            &self.model.cheap_model,
            &self.model.expensive_model,
        );

        let gate = self.cache.flight_lock(&key);
        let _in_flight = match gate.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(cached) = self.cache.get(&key) {
            // a cached payload must still pass the current schema
            match judge(&cached) {
                Judgement::Accept | Judgement::LowConfidence => {
                    debug!("extraction cache hit");
                    return Ok(cached);
                }
                _ => debug!("cached payload invalid under current schema, re-extracting"),
            }
        }

        let cheap = self.call_with_retries(&self.model.cheap_model, system, user)?;
        if let Judgement::Accept = judge(&cheap) {
            self.cache.put(&key, &cheap);
            return Ok(cheap);
        }

        // anything short of clean acceptance gets one shot at the big model
        info!(model = %self.model.expensive_model, "escalating extraction");
        let expensive = self.call_with_retries(&self.model.expensive_model, system, user)?;
        match judge(&expensive) {
            Judgement::Accept | Judgement::LowConfidence => {
                self.cache.put(&key, &expensive);
                Ok(expensive)
            }
            Judgement::Invalid(issues) => Err(ExtractionError::SchemaValidation(issues)),
            Judgement::Unparseable(e) => Err(e),
        }
    }

    fn call_with_retries(
        &self,
        model: &str,
        system: &str,
        user: &str,
    ) -> Result<String, ExtractionError> {
        let attempts = self.model.max_retries.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let backoff = 250u64 * (1 << (attempt - 1).min(4));
                let jitter = rand::thread_rng().gen_range(0..100);
                std::thread::sleep(Duration::from_millis(backoff + jitter));
            }
            match self.client.complete(model, system, user) {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    warn!(model, attempt, "model call failed, retrying: {e}");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(ExtractionError::EmptyResponse))
    }
}

/// Collapse whitespace so trivial formatting differences share a cache key.
fn normalize_for_key(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
