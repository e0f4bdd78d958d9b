//! The reconciliation run orchestrator.
//!
//! One run per (contract, invoice) pair at a time, enforced by a durable
//! lease row. Deterministic matching happens inline; the review tier runs on
//! a blocking worker under a timeout. Whatever happens to the review, a
//! result row is persisted — at worst `Partial` with a `review_unavailable`
//! flag.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::spawn_blocking;
use tracing::{info, warn};
use uuid::Uuid;

use super::PipelineError;
use crate::config::AppConfig;
use crate::db::Store;
use crate::extraction::TierRouter;
use crate::recon::{apply_review, reconcile, DraftResult, MatchContext, ReviewPayload};
use crate::schema::{
    ContractRecord, Flag, FlagType, InvoiceRecord, ReconciliationResult, ResultStatus, Severity,
};

pub struct PipelineRunner {
    store: Store,
    router: Arc<TierRouter>,
    config: AppConfig,
    workers: Semaphore,
    cancelled: Arc<AtomicBool>,
    vendor_aliases: HashMap<String, HashSet<String>>,
}

impl PipelineRunner {
    pub fn new(store: Store, router: Arc<TierRouter>, config: AppConfig) -> Self {
        let workers = Semaphore::new(config.max_concurrent_runs);
        Self {
            store,
            router,
            config,
            workers,
            cancelled: Arc::new(AtomicBool::new(false)),
            vendor_aliases: HashMap::new(),
        }
    }

    /// Known alternate vendor names, normalized on both sides.
    pub fn with_vendor_aliases(mut self, aliases: HashMap<String, HashSet<String>>) -> Self {
        self.vendor_aliases = aliases;
        self
    }

    /// Flag checked before the review stage. Runs already persisting are
    /// unaffected; pending reviews are skipped and persisted as `Partial`.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Run reconciliation for one pair. Returns the persisted result, or a
    /// conflict if the pair is already leased.
    pub async fn reconcile_pair(
        &self,
        contract_id: Uuid,
        invoice_id: Uuid,
        actor: &str,
    ) -> Result<ReconciliationResult, PipelineError> {
        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|_| PipelineError::Shutdown)?;

        if !self
            .store
            .acquire_lease(contract_id, invoice_id, self.config.lease_ttl_secs)?
        {
            return Err(PipelineError::RunInFlight {
                contract_id,
                invoice_id,
            });
        }

        let outcome = self.run_leased(contract_id, invoice_id, actor).await;

        if let Err(e) = self.store.release_lease(contract_id, invoice_id) {
            warn!("lease release failed for {contract_id}/{invoice_id}: {e}");
        }
        outcome
    }

    async fn run_leased(
        &self,
        contract_id: Uuid,
        invoice_id: Uuid,
        actor: &str,
    ) -> Result<ReconciliationResult, PipelineError> {
        let contract = self
            .store
            .get_contract(contract_id)?
            .ok_or(PipelineError::NotFound {
                entity: "contract",
                id: contract_id,
            })?;
        let invoice = self
            .store
            .get_invoice(invoice_id)?
            .ok_or(PipelineError::NotFound {
                entity: "invoice",
                id: invoice_id,
            })?;

        let ctx = self.build_context(&invoice, contract_id)?;
        let draft = reconcile(&contract, &invoice, &ctx, &self.config.recon);

        let version = self.store.next_result_version(contract_id, invoice_id)?;

        if !draft.needs_review(self.config.recon.confidence_threshold) {
            let result = build_result(
                contract_id,
                invoice_id,
                version,
                ResultStatus::Deterministic,
                draft.matches,
                draft.flags,
            );
            self.store.insert_result(&result, actor)?;
            return Ok(result);
        }

        if self.cancelled.load(Ordering::SeqCst) {
            info!("run cancelled before review for {contract_id}/{invoice_id}");
            return self.persist_partial(contract_id, invoice_id, version, draft, actor);
        }

        match self.run_review(&contract, &invoice, &draft).await {
            Some(augmentation) => {
                // the deterministic result is persisted first, then the
                // reviewed result as the next version; both are immutable
                let deterministic = build_result(
                    contract_id,
                    invoice_id,
                    version,
                    ResultStatus::Deterministic,
                    draft.matches.clone(),
                    draft.flags.clone(),
                );
                self.store.insert_result(&deterministic, actor)?;

                let reviewed = build_result(
                    contract_id,
                    invoice_id,
                    version + 1,
                    ResultStatus::Reviewed,
                    draft.matches,
                    apply_review(draft.flags, &augmentation),
                );
                self.store.insert_result(&reviewed, actor)?;
                Ok(reviewed)
            }
            None => self.persist_partial(contract_id, invoice_id, version, draft, actor),
        }
    }

    /// Review under a timeout on a blocking worker. `None` means the review
    /// tier could not contribute (timeout, transport failure, junk output).
    async fn run_review(
        &self,
        contract: &ContractRecord,
        invoice: &InvoiceRecord,
        draft: &DraftResult,
    ) -> Option<crate::recon::ReviewAugmentation> {
        let payload = ReviewPayload::new(contract, invoice, draft);
        let payload_json = match serde_json::to_string(&payload) {
            Ok(json) => json,
            Err(e) => {
                warn!("review payload serialization failed: {e}");
                return None;
            }
        };

        let router = Arc::clone(&self.router);
        let deadline = Duration::from_secs(self.config.model.timeout_secs);
        let call = spawn_blocking(move || router.review_json(&payload_json));

        match tokio::time::timeout(deadline, call).await {
            Ok(Ok(Ok(augmentation))) => Some(augmentation),
            Ok(Ok(Err(e))) => {
                warn!("review tier failed: {e}");
                None
            }
            Ok(Err(join_error)) => {
                warn!("review task panicked: {join_error}");
                None
            }
            Err(_) => {
                warn!("review tier timed out after {deadline:?}");
                None
            }
        }
    }

    fn persist_partial(
        &self,
        contract_id: Uuid,
        invoice_id: Uuid,
        version: u32,
        draft: DraftResult,
        actor: &str,
    ) -> Result<ReconciliationResult, PipelineError> {
        let mut flags = draft.flags;
        flags.push(Flag::new(
            FlagType::ReviewUnavailable,
            Severity::Info,
            "Review stage did not complete; deterministic findings only",
        ));
        let result = build_result(
            contract_id,
            invoice_id,
            version,
            ResultStatus::Partial,
            draft.matches,
            flags,
        );
        self.store.insert_result(&result, actor)?;
        Ok(result)
    }

    fn build_context(
        &self,
        invoice: &InvoiceRecord,
        contract_id: Uuid,
    ) -> Result<MatchContext, PipelineError> {
        let duplicate_of = match invoice.natural_key() {
            Some(key) => self.store.find_duplicate_invoice(&key, invoice.id)?,
            None => None,
        };
        let prior_spend = self.store.prior_spend(contract_id, invoice.id)?;
        Ok(MatchContext {
            duplicate_of,
            prior_spend,
            vendor_aliases: self.vendor_aliases.clone(),
        })
    }
}

fn build_result(
    contract_id: Uuid,
    invoice_id: Uuid,
    version: u32,
    status: ResultStatus,
    matches: Vec<crate::schema::Match>,
    flags: Vec<Flag>,
) -> ReconciliationResult {
    ReconciliationResult {
        id: Uuid::new_v4(),
        contract_id,
        invoice_id,
        version,
        status,
        matches,
        flags,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResponseCache;
    use crate::config::{AppConfig, DatabaseConfig, ModelConfig, ReconConfig, ServerConfig};
    use crate::db::open_memory_database;
    use crate::extraction::{ExtractionError, ModelClient};
    use crate::schema::contract::RecordStatus;
    use crate::schema::{ContractTerm, ExtractedField, InvoiceLine};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    struct CannedReviewer {
        response: Result<String, ()>,
        calls: AtomicUsize,
    }

    impl ModelClient for CannedReviewer {
        fn complete(&self, _: &str, _: &str, _: &str) -> Result<String, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.response {
                Ok(body) => Ok(body.clone()),
                Err(()) => Err(ExtractionError::Connection("stub".into())),
            }
        }
    }

    /// Holds the review call on the blocking worker long enough for the
    /// runner's deadline to fire.
    struct SlowReviewer;

    impl ModelClient for SlowReviewer {
        fn complete(&self, _: &str, _: &str, _: &str) -> Result<String, ExtractionError> {
            std::thread::sleep(Duration::from_millis(200));
            Ok("{}".to_string())
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

    fn runner_with(reviewer: CannedReviewer) -> (PipelineRunner, Store) {
        runner_with_timeout(reviewer, 5)
    }

    fn runner_with_timeout(
        reviewer: impl ModelClient + 'static,
        timeout_secs: u64,
    ) -> (PipelineRunner, Store) {
        let conn = Arc::new(Mutex::new(open_memory_database().unwrap()));
        let store = Store::new(Arc::clone(&conn));
        let cache = Arc::new(ResponseCache::new(conn, 3600));
        let mut config = test_config();
        config.model.timeout_secs = timeout_secs;
        let router = Arc::new(TierRouter::new(
            Arc::new(reviewer),
            cache,
            config.model.clone(),
            config.recon.clone(),
        ));
        (
            PipelineRunner::new(store.clone(), router, config),
            store,
        )
    }

    fn clean_contract() -> ContractRecord {
        ContractRecord {
            id: Uuid::new_v4(),
            vendor: ExtractedField::new("Acme Corp".to_string(), 0.95),
            service_category: ExtractedField::absent(),
            start_date: ExtractedField::new("2025-01-01".parse().unwrap(), 0.9),
            end_date: ExtractedField::new("2025-12-31".parse().unwrap(), 0.9),
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

    fn invoice_with_price(number: &str, unit_price: f64) -> InvoiceRecord {
        InvoiceRecord {
            id: Uuid::new_v4(),
            vendor: ExtractedField::new("Acme Corp".to_string(), 0.95),
            invoice_no: ExtractedField::new(number.to_string(), 0.9),
            invoice_date: ExtractedField::new("2025-03-01".parse().unwrap(), 0.9),
            due_date: ExtractedField::absent(),
            lines: vec![InvoiceLine {
                item_code: ExtractedField::new("SRV-001".to_string(), 0.9),
                item_desc: ExtractedField::new("Support".to_string(), 0.9),
                unit: ExtractedField::new("month".to_string(), 0.9),
                qty: ExtractedField::new(1.0, 0.9),
                unit_price: ExtractedField::new(unit_price, 0.9),
                line_total: ExtractedField::new(unit_price, 0.9),
                ..Default::default()
            }],
            status: RecordStatus::Active,
            needs_review: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn seed(store: &Store, contract: &ContractRecord, invoice: &InvoiceRecord) {
        store.insert_contract(contract, "test").unwrap();
        store.insert_invoice(invoice, "test").unwrap();
    }

    #[tokio::test]
    async fn clean_pair_persists_deterministic_without_review() {
        let reviewer = CannedReviewer {
            response: Ok("{}".to_string()),
            calls: AtomicUsize::new(0),
        };
        let (runner, store) = runner_with(reviewer);
        let contract = clean_contract();
        let invoice = invoice_with_price("INV-1", 1000.0);
        seed(&store, &contract, &invoice);

        let result = runner
            .reconcile_pair(contract.id, invoice.id, "test")
            .await
            .unwrap();

        assert_eq!(result.status, ResultStatus::Deterministic);
        assert_eq!(result.version, 1);
        assert_eq!(result.matches.len(), 1);
        assert!(result.flags.is_empty());
    }

    #[tokio::test]
    async fn flagged_pair_gets_reviewed_at_next_version() {
        let reviewer = CannedReviewer {
            response: Ok(
                r#"{"flag_notes": [{"flag_index": 0, "note": "price exceeds schedule"}]}"#
                    .to_string(),
            ),
            calls: AtomicUsize::new(0),
        };
        let (runner, store) = runner_with(reviewer);
        let contract = clean_contract();
        let invoice = invoice_with_price("INV-1", 1100.0);
        seed(&store, &contract, &invoice);

        let result = runner
            .reconcile_pair(contract.id, invoice.id, "test")
            .await
            .unwrap();

        assert_eq!(result.status, ResultStatus::Reviewed);
        assert_eq!(result.version, 2);
        assert_eq!(
            result.flags[0].review_note.as_deref(),
            Some("price exceeds schedule")
        );

        // both versions persisted, deterministic first
        let v1 = store.latest_result(contract.id, invoice.id).unwrap().unwrap();
        assert_eq!(v1.version, 2);
        assert_eq!(store.next_result_version(contract.id, invoice.id).unwrap(), 3);
    }

    #[tokio::test]
    async fn review_failure_persists_partial() {
        let reviewer = CannedReviewer {
            response: Err(()),
            calls: AtomicUsize::new(0),
        };
        let (runner, store) = runner_with(reviewer);
        let contract = clean_contract();
        let invoice = invoice_with_price("INV-1", 1100.0);
        seed(&store, &contract, &invoice);

        let result = runner
            .reconcile_pair(contract.id, invoice.id, "test")
            .await
            .unwrap();

        assert_eq!(result.status, ResultStatus::Partial);
        assert!(result
            .flags
            .iter()
            .any(|f| f.flag_type == FlagType::ReviewUnavailable));
        // the overpay flag survives untouched
        assert!(result
            .flags
            .iter()
            .any(|f| f.flag_type == FlagType::OverpayPerUnit));
    }

    #[tokio::test]
    async fn review_timeout_persists_partial() {
        let (runner, store) = runner_with_timeout(SlowReviewer, 0);
        let contract = clean_contract();
        let invoice = invoice_with_price("INV-1", 1100.0);
        seed(&store, &contract, &invoice);

        let result = runner
            .reconcile_pair(contract.id, invoice.id, "test")
            .await
            .unwrap();

        assert_eq!(result.status, ResultStatus::Partial);
        assert_eq!(result.version, 1);
        assert!(result
            .flags
            .iter()
            .any(|f| f.flag_type == FlagType::ReviewUnavailable));
    }

    #[tokio::test]
    async fn cancellation_skips_review() {
        let reviewer = CannedReviewer {
            response: Ok("{}".to_string()),
            calls: AtomicUsize::new(0),
        };
        let (runner, store) = runner_with(reviewer);
        let contract = clean_contract();
        let invoice = invoice_with_price("INV-1", 1100.0);
        seed(&store, &contract, &invoice);

        runner.cancel_flag().store(true, Ordering::SeqCst);
        let result = runner
            .reconcile_pair(contract.id, invoice.id, "test")
            .await
            .unwrap();

        assert_eq!(result.status, ResultStatus::Partial);
    }

    #[tokio::test]
    async fn leased_pair_conflicts_instead_of_queuing() {
        let reviewer = CannedReviewer {
            response: Ok("{}".to_string()),
            calls: AtomicUsize::new(0),
        };
        let (runner, store) = runner_with(reviewer);
        let contract = clean_contract();
        let invoice = invoice_with_price("INV-1", 1000.0);
        seed(&store, &contract, &invoice);

        // hold the lease as if another run were active
        assert!(store.acquire_lease(contract.id, invoice.id, 60).unwrap());

        let err = runner
            .reconcile_pair(contract.id, invoice.id, "test")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::RunInFlight { .. }));
    }

    #[tokio::test]
    async fn lease_is_released_after_a_run() {
        let reviewer = CannedReviewer {
            response: Ok("{}".to_string()),
            calls: AtomicUsize::new(0),
        };
        let (runner, store) = runner_with(reviewer);
        let contract = clean_contract();
        let invoice = invoice_with_price("INV-1", 1000.0);
        seed(&store, &contract, &invoice);

        runner.reconcile_pair(contract.id, invoice.id, "test").await.unwrap();
        // a fresh lease can be taken immediately
        assert!(store.acquire_lease(contract.id, invoice.id, 60).unwrap());
    }

    #[tokio::test]
    async fn missing_records_are_not_found() {
        let reviewer = CannedReviewer {
            response: Ok("{}".to_string()),
            calls: AtomicUsize::new(0),
        };
        let (runner, _) = runner_with(reviewer);

        let err = runner
            .reconcile_pair(Uuid::new_v4(), Uuid::new_v4(), "test")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { entity: "contract", .. }));
    }

    #[tokio::test]
    async fn duplicate_flag_requires_reconciled_prior_submission() {
        let reviewer = CannedReviewer {
            // review runs because the duplicate flag triggers it; it adds nothing
            response: Ok("{}".to_string()),
            calls: AtomicUsize::new(0),
        };
        let (runner, store) = runner_with(reviewer);
        let contract = clean_contract();
        let first = invoice_with_price("INV-7", 1000.0);
        let second = invoice_with_price("INV-7", 1000.0);
        seed(&store, &contract, &first);
        store.insert_invoice(&second, "test").unwrap();

        // the first submission reconciles cleanly even though an
        // unreconciled copy of it already sits in the store
        let result = runner
            .reconcile_pair(contract.id, first.id, "test")
            .await
            .unwrap();
        assert!(result.flags.is_empty());
        assert_eq!(result.matches.len(), 1);

        // now the copy is a real duplicate and line matching is skipped
        let result = runner
            .reconcile_pair(contract.id, second.id, "test")
            .await
            .unwrap();
        assert!(result
            .flags
            .iter()
            .any(|f| f.flag_type == FlagType::DuplicateInvoice));
        assert!(result.matches.is_empty());
    }
}
