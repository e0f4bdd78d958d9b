//! HTTP surface.
//!
//! Returns a composable `Router` that can be mounted on any axum server.
//! Handlers stay thin: extraction goes through the tier router on a blocking
//! thread, reconciliation goes through the pipeline runner, and everything
//! else is a direct repository call.
//!
//! NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use tokio::task::spawn_blocking;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::{
    ApiContext, ArchiveRequest, CorrectionRequest, ExpiringQuery, IngestRequest, IngestResponse,
    ListQuery, PreviewQuery, ReconcileRequest, ReconcileResponse,
};
use crate::audit::{AuditAction, AuditEvent, AuditFilter};
use crate::cache::CacheStats;
use crate::config::SCHEMA_VERSION;
use crate::db::DatabaseError;
use crate::extraction::DocumentKind;
use crate::recon::{generate_preview, PaymentPreview};
use crate::schema::{
    apply_contract_correction, apply_invoice_correction, ContractRecord, InvoiceRecord,
    ReconciliationResult,
};

/// Build the API router over shared state.
pub fn api_router(ctx: ApiContext) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/documents", post(ingest_document))
        .route("/api/contracts", get(list_contracts))
        .route("/api/contracts/expiring", get(expiring_contracts))
        .route("/api/contracts/:id", get(get_contract))
        .route("/api/contracts/:id/corrections", post(correct_contract))
        .route("/api/contracts/:id/archive", post(archive_contract))
        .route("/api/contracts/:id/next-payment", get(next_payment))
        .route("/api/invoices", get(list_invoices))
        .route("/api/invoices/:id", get(get_invoice))
        .route("/api/invoices/:id/corrections", post(correct_invoice))
        .route("/api/invoices/:id/archive", post(archive_invoice))
        .route("/api/reconcile", post(reconcile_pair))
        .route("/api/results/:id", get(get_result))
        .route("/api/audit", get(query_audit))
        .route("/api/cache/stats", get(cache_stats))
        .route("/api/cache/purge", post(purge_cache))
        .with_state(ctx)
}

#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    schema_version: u32,
}

/// `GET /health` — liveness probe.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        schema_version: SCHEMA_VERSION,
    })
}

/// `POST /api/documents` — extract a document and persist the record.
///
/// Extraction runs blocking HTTP against the model tiers, so it is moved off
/// the async runtime. A document the expensive tier still cannot shape into a
/// valid record is rejected with 422 and nothing is persisted.
async fn ingest_document(
    State(ctx): State<ApiContext>,
    Json(req): Json<IngestRequest>,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let router = Arc::clone(&ctx.router);
    let text = req.document_text.clone();

    let response = match req.document_kind {
        DocumentKind::Contract => {
            let record = spawn_blocking(move || router.extract_contract(&text))
                .await
                .map_err(|e| ApiError::Internal(e.to_string()))??;
            ctx.store.insert_contract(&record, &req.actor)?;
            IngestResponse {
                id: record.id,
                document_kind: req.document_kind,
                needs_review: record.needs_review,
                record: serde_json::to_value(&record)
                    .map_err(|e| ApiError::Internal(e.to_string()))?,
            }
        }
        DocumentKind::Invoice => {
            let record = spawn_blocking(move || router.extract_invoice(&text))
                .await
                .map_err(|e| ApiError::Internal(e.to_string()))??;
            ctx.store.insert_invoice(&record, &req.actor)?;
            IngestResponse {
                id: record.id,
                document_kind: req.document_kind,
                needs_review: record.needs_review,
                record: serde_json::to_value(&record)
                    .map_err(|e| ApiError::Internal(e.to_string()))?,
            }
        }
    };

    Ok((StatusCode::CREATED, Json(response)))
}

/// `POST /api/reconcile` — run the pipeline for one contract/invoice pair.
async fn reconcile_pair(
    State(ctx): State<ApiContext>,
    Json(req): Json<ReconcileRequest>,
) -> Result<Json<ReconcileResponse>, ApiError> {
    let result = ctx
        .runner
        .reconcile_pair(req.contract_id, req.invoice_id, &req.actor)
        .await?;
    Ok(Json(ReconcileResponse {
        result_id: result.id,
        version: result.version,
        status: result.status,
    }))
}

/// `GET /api/results/:id` — one persisted reconciliation result.
async fn get_result(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReconciliationResult>, ApiError> {
    let result = ctx
        .store
        .get_result(id)?
        .ok_or_else(|| ApiError::NotFound(format!("result {id}")))?;
    Ok(Json(result))
}

// ─── contracts ───

async fn list_contracts(
    State(ctx): State<ApiContext>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<ContractRecord>>, ApiError> {
    Ok(Json(ctx.store.list_contracts(q.include_archived)?))
}

/// `GET /api/contracts/expiring` — active contracts ending within the window.
async fn expiring_contracts(
    State(ctx): State<ApiContext>,
    Query(q): Query<ExpiringQuery>,
) -> Result<Json<Vec<ContractRecord>>, ApiError> {
    let as_of = q.as_of.unwrap_or_else(|| Utc::now().date_naive());
    Ok(Json(ctx.store.expiring_contracts(as_of, q.days)?))
}

async fn get_contract(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<ContractRecord>, ApiError> {
    let record = ctx
        .store
        .get_contract(id)?
        .ok_or_else(|| ApiError::NotFound(format!("contract {id}")))?;
    Ok(Json(record))
}

/// `POST /api/contracts/:id/corrections` — apply one reviewer correction.
///
/// The corrected field is pinned to confidence 1.0; the diff lands in the
/// audit trail. An unknown field path rejects the whole request.
async fn correct_contract(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<CorrectionRequest>,
) -> Result<Json<ContractRecord>, ApiError> {
    let updated = ctx
        .store
        .update_contract(id, &req.actor, AuditAction::Corrected, |record| {
            apply_contract_correction(record, &req.field, &req.value).map_err(DatabaseError::from)
        })?;
    Ok(Json(updated))
}

async fn archive_contract(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<ArchiveRequest>,
) -> Result<Json<ContractRecord>, ApiError> {
    Ok(Json(ctx.store.archive_contract(id, &req.actor)?))
}

/// `GET /api/contracts/:id/next-payment` — forecast the next invoice.
///
/// Quantities come from the reconciled invoice history where available;
/// every guess is spelled out in `assumptions`.
async fn next_payment(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
    Query(q): Query<PreviewQuery>,
) -> Result<Json<PaymentPreview>, ApiError> {
    let contract = ctx
        .store
        .get_contract(id)?
        .ok_or_else(|| ApiError::NotFound(format!("contract {id}")))?;
    let history = ctx.store.reconciled_invoices(id)?;
    let as_of = q.as_of.unwrap_or_else(|| Utc::now().date_naive());
    Ok(Json(generate_preview(
        &contract,
        &history,
        as_of,
        &ctx.config.recon,
    )))
}

// ─── invoices ───

async fn list_invoices(
    State(ctx): State<ApiContext>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<InvoiceRecord>>, ApiError> {
    Ok(Json(ctx.store.list_invoices(q.include_archived)?))
}

async fn get_invoice(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<InvoiceRecord>, ApiError> {
    let record = ctx
        .store
        .get_invoice(id)?
        .ok_or_else(|| ApiError::NotFound(format!("invoice {id}")))?;
    Ok(Json(record))
}

async fn correct_invoice(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<CorrectionRequest>,
) -> Result<Json<InvoiceRecord>, ApiError> {
    let updated = ctx
        .store
        .update_invoice(id, &req.actor, AuditAction::Corrected, |record| {
            apply_invoice_correction(record, &req.field, &req.value).map_err(DatabaseError::from)
        })?;
    Ok(Json(updated))
}

async fn archive_invoice(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<ArchiveRequest>,
) -> Result<Json<InvoiceRecord>, ApiError> {
    Ok(Json(ctx.store.archive_invoice(id, &req.actor)?))
}

// ─── audit and cache ───

/// `GET /api/audit` — query the append-only audit trail.
async fn query_audit(
    State(ctx): State<ApiContext>,
    Query(filter): Query<AuditFilter>,
) -> Result<Json<Vec<AuditEvent>>, ApiError> {
    Ok(Json(ctx.store.query_audit(&filter)?))
}

async fn cache_stats(State(ctx): State<ApiContext>) -> Json<CacheStats> {
    Json(ctx.cache.stats())
}

#[derive(serde::Serialize)]
struct PurgeResponse {
    purged: usize,
}

async fn purge_cache(State(ctx): State<ApiContext>) -> Json<PurgeResponse> {
    Json(PurgeResponse {
        purged: ctx.cache.purge_expired(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::cache::ResponseCache;
    use crate::config::{
        AppConfig, DatabaseConfig, ModelConfig, ReconConfig, ServerConfig,
    };
    use crate::db::{open_memory_database, Store};
    use crate::extraction::{ExtractionError, ModelClient, TierRouter};
    use crate::pipeline::PipelineRunner;
    use crate::schema::{ContractTerm, ExtractedField, InvoiceLine, RecordStatus};

    struct StubClient {
        responses: Mutex<Vec<Result<String, ExtractionError>>>,
        calls: AtomicUsize,
    }

    impl StubClient {
        fn new(responses: Vec<Result<String, ExtractionError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl ModelClient for StubClient {
        fn complete(
            &self,
            _model: &str,
            _system: &str,
            _user: &str,
        ) -> Result<String, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(ExtractionError::EmptyResponse);
            }
            responses.remove(0)
        }
    }

    fn test_config() -> AppConfig {
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            database: DatabaseConfig {
                path: ":memory:".to_string(),
            },
            model: ModelConfig {
                max_retries: 1,
                timeout_secs: 5,
                ..Default::default()
            },
            recon: ReconConfig::default(),
            cache_ttl_secs: 3600,
            max_concurrent_runs: 4,
            lease_ttl_secs: 60,
        }
    }

    fn app(responses: Vec<Result<String, ExtractionError>>) -> (Router, Store) {
        let conn = Arc::new(Mutex::new(open_memory_database().unwrap()));
        let store = Store::new(Arc::clone(&conn));
        let cache = Arc::new(ResponseCache::new(conn, 3600));
        let config = test_config();
        let router = Arc::new(TierRouter::new(
            Arc::new(StubClient::new(responses)),
            Arc::clone(&cache),
            config.model.clone(),
            config.recon.clone(),
        ));
        let runner = Arc::new(PipelineRunner::new(
            store.clone(),
            Arc::clone(&router),
            config.clone(),
        ));
        let ctx = ApiContext {
            store: store.clone(),
            router,
            runner,
            cache,
            config: Arc::new(config),
        };
        (api_router(ctx), store)
    }

    fn contract(vendor: &str, end_date: &str) -> ContractRecord {
        ContractRecord {
            id: Uuid::new_v4(),
            vendor: ExtractedField::new(vendor.to_string(), 0.95),
            service_category: ExtractedField::absent(),
            start_date: ExtractedField::new("2025-01-01".parse().unwrap(), 0.9),
            end_date: ExtractedField::new(end_date.parse().unwrap(), 0.9),
            auto_renew: ExtractedField::absent(),
            renewal_notice_days: ExtractedField::absent(),
            price_escalation: ExtractedField::absent(),
            cap_total: ExtractedField::absent(),
            allowed_fees: ExtractedField::absent(),
            terms: vec![ContractTerm {
                item_code: ExtractedField::new("SRV-001".to_string(), 0.9),
                item_desc: ExtractedField::new("Managed support".to_string(), 0.9),
                unit: ExtractedField::new("month".to_string(), 0.9),
                unit_price: ExtractedField::new(1000.0, 0.9),
                ..Default::default()
            }],
            status: RecordStatus::Active,
            needs_review: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn invoice(vendor: &str, number: &str) -> InvoiceRecord {
        InvoiceRecord {
            id: Uuid::new_v4(),
            vendor: ExtractedField::new(vendor.to_string(), 0.95),
            invoice_no: ExtractedField::new(number.to_string(), 0.9),
            invoice_date: ExtractedField::new("2025-03-01".parse().unwrap(), 0.9),
            due_date: ExtractedField::absent(),
            lines: vec![InvoiceLine {
                item_code: ExtractedField::new("SRV-001".to_string(), 0.9),
                item_desc: ExtractedField::new("Support".to_string(), 0.9),
                unit: ExtractedField::new("month".to_string(), 0.9),
                qty: ExtractedField::new(1.0, 0.9),
                unit_price: ExtractedField::new(1000.0, 0.9),
                line_total: ExtractedField::new(1000.0, 0.9),
                ..Default::default()
            }],
            status: RecordStatus::Active,
            needs_review: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn confident_invoice_response() -> String {
        r#"{
            "vendor": {"value": "Acme Corp", "confidence": 0.95},
            "invoice_no": {"value": "INV-1", "confidence": 0.95},
            "invoice_date": {"value": "2025-03-01", "confidence": 0.95},
            "lines": []
        }"#
        .to_string()
    }

    #[tokio::test]
    async fn health_reports_schema_version() {
        let (app, _) = app(vec![]);
        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["schema_version"], SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn ingest_persists_extracted_invoice() {
        let (app, store) = app(vec![Ok(confident_invoice_response())]);
        let response = app
            .oneshot(post_json(
                "/api/documents",
                serde_json::json!({
                    "document_text": "Invoice INV-1 from Acme Corp",
                    "document_kind": "invoice"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = body_json(response).await;
        assert_eq!(body["document_kind"], "invoice");
        assert_eq!(body["needs_review"], false);

        let id: Uuid = body["id"].as_str().unwrap().parse().unwrap();
        let persisted = store.get_invoice(id).unwrap().unwrap();
        assert_eq!(persisted.vendor.value.as_deref(), Some("Acme Corp"));
    }

    #[tokio::test]
    async fn unextractable_document_is_rejected_without_persisting() {
        // Both tiers return a record missing its required fields.
        let invalid = r#"{"vendor": {"value": null, "confidence": 0.0}, "lines": []}"#;
        let (app, store) = app(vec![Ok(invalid.to_string()), Ok(invalid.to_string())]);
        let response = app
            .oneshot(post_json(
                "/api/documents",
                serde_json::json!({
                    "document_text": "unreadable scan",
                    "document_kind": "invoice"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(store.list_invoices(true).unwrap().is_empty());
    }

    #[tokio::test]
    async fn reconcile_returns_persisted_result() {
        let (app, store) = app(vec![]);
        let c = contract("Acme Corp", "2025-12-31");
        let i = invoice("Acme Corp", "INV-1");
        store.insert_contract(&c, "test").unwrap();
        store.insert_invoice(&i, "test").unwrap();

        let response = app
            .oneshot(post_json(
                "/api/reconcile",
                serde_json::json!({"contract_id": c.id, "invoice_id": i.id}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["version"], 1);
        assert_eq!(body["status"], "deterministic");

        let result_id: Uuid = body["result_id"].as_str().unwrap().parse().unwrap();
        assert!(store.get_result(result_id).unwrap().is_some());
    }

    #[tokio::test]
    async fn reconcile_of_unknown_pair_is_not_found() {
        let (app, _) = app(vec![]);
        let response = app
            .oneshot(post_json(
                "/api/reconcile",
                serde_json::json!({
                    "contract_id": Uuid::new_v4(),
                    "invoice_id": Uuid::new_v4()
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn correction_pins_field_and_returns_record() {
        let (app, store) = app(vec![]);
        let c = contract("Acme Crop", "2025-12-31");
        store.insert_contract(&c, "test").unwrap();

        let response = app
            .oneshot(post_json(
                &format!("/api/contracts/{}/corrections", c.id),
                serde_json::json!({
                    "field": "vendor",
                    "value": "Acme Corp",
                    "actor": "reviewer"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["vendor"]["value"], "Acme Corp");
        assert_eq!(body["vendor"]["confidence"], 1.0);
    }

    #[tokio::test]
    async fn unknown_correction_field_is_bad_request() {
        let (app, store) = app(vec![]);
        let c = contract("Acme Corp", "2025-12-31");
        store.insert_contract(&c, "test").unwrap();

        let response = app
            .oneshot(post_json(
                &format!("/api/contracts/{}/corrections", c.id),
                serde_json::json!({"field": "nonsense", "value": 1}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // The rejected correction must not leave an audit event behind.
        let events = store
            .query_audit(&AuditFilter {
                entity_type: Some(crate::audit::EntityType::Contract),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(events.len(), 1); // creation only
    }

    #[tokio::test]
    async fn archive_hides_contract_from_active_listing() {
        let (app, store) = app(vec![]);
        let c = contract("Acme Corp", "2025-12-31");
        store.insert_contract(&c, "test").unwrap();

        let response = app
            .clone()
            .oneshot(post_json(
                &format!("/api/contracts/{}/archive", c.id),
                serde_json::json!({"actor": "admin"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let active = body_json(app.clone().oneshot(get("/api/contracts")).await.unwrap()).await;
        assert_eq!(active.as_array().unwrap().len(), 0);

        let all = body_json(
            app.oneshot(get("/api/contracts?include_archived=true"))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(all.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn expiring_window_filters_contracts() {
        let (app, store) = app(vec![]);
        store
            .insert_contract(&contract("Soon Corp", "2025-06-15"), "test")
            .unwrap();
        store
            .insert_contract(&contract("Later Corp", "2026-06-15"), "test")
            .unwrap();

        let body = body_json(
            app.oneshot(get("/api/contracts/expiring?days=30&as_of=2025-06-01"))
                .await
                .unwrap(),
        )
        .await;
        let vendors: Vec<_> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["vendor"]["value"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(vendors, vec!["Soon Corp"]);
    }

    #[tokio::test]
    async fn next_payment_preview_prices_contract_terms() {
        let (app, store) = app(vec![]);
        let c = contract("Acme Corp", "2025-12-31");
        store.insert_contract(&c, "test").unwrap();

        let response = app
            .oneshot(get(&format!(
                "/api/contracts/{}/next-payment?as_of=2025-06-01",
                c.id
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // One term at 1000, no history, first contract year, 10% tax.
        let body = body_json(response).await;
        assert_eq!(body["subtotal"], 1000.0);
        assert_eq!(body["total"], 1100.0);
        assert!(!body["assumptions"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_result_is_not_found() {
        let (app, _) = app(vec![]);
        let response = app
            .oneshot(get(&format!("/api/results/{}", Uuid::new_v4())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn audit_endpoint_filters_by_actor() {
        let (app, store) = app(vec![]);
        store
            .insert_contract(&contract("Acme Corp", "2025-12-31"), "ingest")
            .unwrap();
        store
            .insert_invoice(&invoice("Acme Corp", "INV-1"), "other")
            .unwrap();

        let body = body_json(
            app.oneshot(get("/api/audit?actor=ingest")).await.unwrap(),
        )
        .await;
        let events = body.as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["actor"], "ingest");
        assert_eq!(events[0]["entity_type"], "contract");
    }

    #[tokio::test]
    async fn cache_stats_expose_counters() {
        let (app, _) = app(vec![]);
        let body = body_json(app.oneshot(get("/api/cache/stats")).await.unwrap()).await;
        assert_eq!(body["hits"], 0);
        assert_eq!(body["misses"], 0);
    }
}
