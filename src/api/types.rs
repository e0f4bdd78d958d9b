//! Shared API state and request/response shapes.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::ResponseCache;
use crate::config::AppConfig;
use crate::db::Store;
use crate::extraction::{DocumentKind, TierRouter};
use crate::pipeline::PipelineRunner;
use crate::schema::ResultStatus;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct ApiContext {
    pub store: Store,
    pub router: Arc<TierRouter>,
    pub runner: Arc<PipelineRunner>,
    pub cache: Arc<ResponseCache>,
    pub config: Arc<AppConfig>,
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub document_text: String,
    pub document_kind: DocumentKind,
    #[serde(default = "default_actor")]
    pub actor: String,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub id: Uuid,
    pub document_kind: DocumentKind,
    pub needs_review: bool,
    /// The full extracted record with per-field confidences.
    pub record: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct ReconcileRequest {
    pub contract_id: Uuid,
    pub invoice_id: Uuid,
    #[serde(default = "default_actor")]
    pub actor: String,
}

#[derive(Debug, Serialize)]
pub struct ReconcileResponse {
    pub result_id: Uuid,
    pub version: u32,
    pub status: ResultStatus,
}

#[derive(Debug, Deserialize)]
pub struct CorrectionRequest {
    /// Field path, e.g. "vendor" or "terms.0.unit_price".
    pub field: String,
    pub value: serde_json::Value,
    #[serde(default = "default_actor")]
    pub actor: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub include_archived: bool,
}

#[derive(Debug, Deserialize)]
pub struct ExpiringQuery {
    #[serde(default = "default_expiring_days")]
    pub days: u64,
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct ArchiveRequest {
    #[serde(default = "default_actor")]
    pub actor: String,
}

fn default_actor() -> String {
    "api".to_string()
}

fn default_expiring_days() -> u64 {
    30
}
