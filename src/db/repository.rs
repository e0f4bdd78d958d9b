//! Record store over SQLite.
//!
//! Records are stored as JSON payloads with a few denormalized columns for
//! lookups. Every mutation writes its audit event inside the same
//! transaction; a mutation that cannot be audited does not happen.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Days, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use uuid::Uuid;

use super::DatabaseError;
use crate::audit::{AuditAction, AuditEvent, AuditFilter, EntityType};
use crate::schema::contract::RecordStatus;
use crate::schema::{ContractRecord, InvoiceRecord, ReconciliationResult};

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Shared connection handle, for components that run their own SQL
    /// (the response cache).
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)
    }

    // ─── contracts ───

    pub fn insert_contract(
        &self,
        record: &ContractRecord,
        actor: &str,
    ) -> Result<(), DatabaseError> {
        let payload = serde_json::to_string(record)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO contracts (id, vendor, end_date, status, needs_review, payload, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id.to_string(),
                record.vendor.value,
                record.end_date.value.map(|d| d.to_string()),
                status_str(record.status),
                record.needs_review,
                payload,
                record.created_at,
                record.updated_at,
            ],
        )?;
        record_audit(
            &tx,
            EntityType::Contract,
            record.id,
            AuditAction::Created,
            actor,
            None,
            Some(serde_json::to_value(record)?),
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_contract(&self, id: Uuid) -> Result<Option<ContractRecord>, DatabaseError> {
        let conn = self.lock()?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM contracts WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        payload.map(|p| serde_json::from_str(&p)).transpose().map_err(Into::into)
    }

    pub fn list_contracts(&self, include_archived: bool) -> Result<Vec<ContractRecord>, DatabaseError> {
        let conn = self.lock()?;
        let sql = if include_archived {
            "SELECT payload FROM contracts ORDER BY created_at"
        } else {
            "SELECT payload FROM contracts WHERE status = 'active' ORDER BY created_at"
        };
        collect_payloads(&conn, sql)
    }

    /// Active contracts whose end date falls within the next `days` days.
    pub fn expiring_contracts(
        &self,
        as_of: NaiveDate,
        days: u64,
    ) -> Result<Vec<ContractRecord>, DatabaseError> {
        let horizon = as_of.checked_add_days(Days::new(days)).unwrap_or(as_of);
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT payload FROM contracts
             WHERE status = 'active' AND end_date IS NOT NULL
               AND end_date >= ?1 AND end_date <= ?2
             ORDER BY end_date",
        )?;
        let rows = stmt.query_map(params![as_of.to_string(), horizon.to_string()], |row| {
            row.get::<_, String>(0)
        })?;
        let mut records = Vec::new();
        for payload in rows {
            records.push(serde_json::from_str(&payload?)?);
        }
        Ok(records)
    }

    /// Load, mutate, and persist a contract, auditing the before/after diff.
    pub fn update_contract(
        &self,
        id: Uuid,
        actor: &str,
        action: AuditAction,
        mutate: impl FnOnce(&mut ContractRecord) -> Result<(), DatabaseError>,
    ) -> Result<ContractRecord, DatabaseError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let payload: String = tx
            .query_row(
                "SELECT payload FROM contracts WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "contract",
                id: id.to_string(),
            })?;

        let before: ContractRecord = serde_json::from_str(&payload)?;
        let mut after = before.clone();
        mutate(&mut after)?;
        after.updated_at = Utc::now();

        tx.execute(
            "UPDATE contracts SET vendor = ?2, end_date = ?3, status = ?4,
                 needs_review = ?5, payload = ?6, updated_at = ?7
             WHERE id = ?1",
            params![
                id.to_string(),
                after.vendor.value,
                after.end_date.value.map(|d| d.to_string()),
                status_str(after.status),
                after.needs_review,
                serde_json::to_string(&after)?,
                after.updated_at,
            ],
        )?;
        record_audit(
            &tx,
            EntityType::Contract,
            id,
            action,
            actor,
            Some(serde_json::to_value(&before)?),
            Some(serde_json::to_value(&after)?),
        )?;
        tx.commit()?;
        Ok(after)
    }

    pub fn archive_contract(&self, id: Uuid, actor: &str) -> Result<ContractRecord, DatabaseError> {
        self.update_contract(id, actor, AuditAction::Archived, |record| {
            record.status = RecordStatus::Archived;
            Ok(())
        })
    }

    // ─── invoices ───

    pub fn insert_invoice(
        &self,
        record: &InvoiceRecord,
        actor: &str,
    ) -> Result<(), DatabaseError> {
        let payload = serde_json::to_string(record)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO invoices (id, vendor, invoice_no, natural_key, status, needs_review, payload, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id.to_string(),
                record.vendor.value,
                record.invoice_no.value,
                record.natural_key(),
                status_str(record.status),
                record.needs_review,
                payload,
                record.created_at,
                record.updated_at,
            ],
        )?;
        record_audit(
            &tx,
            EntityType::Invoice,
            record.id,
            AuditAction::Created,
            actor,
            None,
            Some(serde_json::to_value(record)?),
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_invoice(&self, id: Uuid) -> Result<Option<InvoiceRecord>, DatabaseError> {
        let conn = self.lock()?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM invoices WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        payload.map(|p| serde_json::from_str(&p)).transpose().map_err(Into::into)
    }

    pub fn list_invoices(&self, include_archived: bool) -> Result<Vec<InvoiceRecord>, DatabaseError> {
        let conn = self.lock()?;
        let sql = if include_archived {
            "SELECT payload FROM invoices ORDER BY created_at"
        } else {
            "SELECT payload FROM invoices WHERE status = 'active' ORDER BY created_at"
        };
        collect_payloads(&conn, sql)
    }

    pub fn update_invoice(
        &self,
        id: Uuid,
        actor: &str,
        action: AuditAction,
        mutate: impl FnOnce(&mut InvoiceRecord) -> Result<(), DatabaseError>,
    ) -> Result<InvoiceRecord, DatabaseError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let payload: String = tx
            .query_row(
                "SELECT payload FROM invoices WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "invoice",
                id: id.to_string(),
            })?;

        let before: InvoiceRecord = serde_json::from_str(&payload)?;
        let mut after = before.clone();
        mutate(&mut after)?;
        after.updated_at = Utc::now();

        tx.execute(
            "UPDATE invoices SET vendor = ?2, invoice_no = ?3, natural_key = ?4,
                 status = ?5, needs_review = ?6, payload = ?7, updated_at = ?8
             WHERE id = ?1",
            params![
                id.to_string(),
                after.vendor.value,
                after.invoice_no.value,
                after.natural_key(),
                status_str(after.status),
                after.needs_review,
                serde_json::to_string(&after)?,
                after.updated_at,
            ],
        )?;
        record_audit(
            &tx,
            EntityType::Invoice,
            id,
            action,
            actor,
            Some(serde_json::to_value(&before)?),
            Some(serde_json::to_value(&after)?),
        )?;
        tx.commit()?;
        Ok(after)
    }

    pub fn archive_invoice(&self, id: Uuid, actor: &str) -> Result<InvoiceRecord, DatabaseError> {
        self.update_invoice(id, actor, AuditAction::Archived, |record| {
            record.status = RecordStatus::Archived;
            Ok(())
        })
    }

    /// The earliest other invoice sharing this natural key that has already
    /// been reconciled. A copy that was merely ingested does not count; the
    /// first submission through the pipeline must reconcile cleanly.
    pub fn find_duplicate_invoice(
        &self,
        natural_key: &str,
        exclude_id: Uuid,
    ) -> Result<Option<Uuid>, DatabaseError> {
        let conn = self.lock()?;
        let id: Option<String> = conn
            .query_row(
                "SELECT i.id FROM invoices i
                 WHERE i.natural_key = ?1 AND i.id != ?2 AND i.status = 'active'
                   AND EXISTS (SELECT 1 FROM reconciliation_results r
                               WHERE r.invoice_id = i.id)
                 ORDER BY i.created_at LIMIT 1",
                params![natural_key, exclude_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.and_then(|s| Uuid::parse_str(&s).ok()))
    }

    /// Total stated spend across other invoices already reconciled against
    /// this contract. Baseline for the cap check.
    pub fn prior_spend(
        &self,
        contract_id: Uuid,
        exclude_invoice_id: Uuid,
    ) -> Result<f64, DatabaseError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT i.payload FROM invoices i
             JOIN reconciliation_results r ON r.invoice_id = i.id
             WHERE r.contract_id = ?1 AND i.id != ?2",
        )?;
        let rows = stmt.query_map(
            params![contract_id.to_string(), exclude_invoice_id.to_string()],
            |row| row.get::<_, String>(0),
        )?;
        let mut total = 0.0;
        for payload in rows {
            let invoice: InvoiceRecord = serde_json::from_str(&payload?)?;
            total += invoice.stated_total();
        }
        Ok(total)
    }

    /// Invoices with at least one result against this contract, oldest
    /// first. Billing history for the next-payment preview.
    pub fn reconciled_invoices(&self, contract_id: Uuid) -> Result<Vec<InvoiceRecord>, DatabaseError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT i.payload FROM invoices i
             JOIN reconciliation_results r ON r.invoice_id = i.id
             WHERE r.contract_id = ?1
             ORDER BY i.created_at",
        )?;
        let rows = stmt.query_map(params![contract_id.to_string()], |row| {
            row.get::<_, String>(0)
        })?;
        let mut records = Vec::new();
        for payload in rows {
            records.push(serde_json::from_str(&payload?)?);
        }
        Ok(records)
    }

    // ─── reconciliation results ───

    /// Next version number for the pair (1 for the first run).
    pub fn next_result_version(
        &self,
        contract_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<u32, DatabaseError> {
        let conn = self.lock()?;
        let max: Option<u32> = conn.query_row(
            "SELECT MAX(version) FROM reconciliation_results
             WHERE contract_id = ?1 AND invoice_id = ?2",
            params![contract_id.to_string(), invoice_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(0) + 1)
    }

    /// Insert a result. Results are immutable; re-runs insert new versions.
    pub fn insert_result(
        &self,
        result: &ReconciliationResult,
        actor: &str,
    ) -> Result<(), DatabaseError> {
        let payload = serde_json::to_string(result)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO reconciliation_results (id, contract_id, invoice_id, version, status, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                result.id.to_string(),
                result.contract_id.to_string(),
                result.invoice_id.to_string(),
                result.version,
                result.status.as_str(),
                payload,
                result.created_at,
            ],
        )?;
        record_audit(
            &tx,
            EntityType::ReconciliationResult,
            result.id,
            AuditAction::Reconciled,
            actor,
            None,
            Some(serde_json::to_value(result)?),
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_result(&self, id: Uuid) -> Result<Option<ReconciliationResult>, DatabaseError> {
        let conn = self.lock()?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM reconciliation_results WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        payload.map(|p| serde_json::from_str(&p)).transpose().map_err(Into::into)
    }

    pub fn latest_result(
        &self,
        contract_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<ReconciliationResult>, DatabaseError> {
        let conn = self.lock()?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM reconciliation_results
                 WHERE contract_id = ?1 AND invoice_id = ?2
                 ORDER BY version DESC LIMIT 1",
                params![contract_id.to_string(), invoice_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        payload.map(|p| serde_json::from_str(&p)).transpose().map_err(Into::into)
    }

    // ─── leases ───

    /// Try to take the per-pair lease. Returns false if another run holds an
    /// unexpired lease. Expired leases are reaped on the way in.
    pub fn acquire_lease(
        &self,
        contract_id: Uuid,
        invoice_id: Uuid,
        ttl_secs: u64,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now().timestamp();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM reconciliation_leases WHERE expires_at <= ?1",
            params![now],
        )?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO reconciliation_leases (contract_id, invoice_id, acquired_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                contract_id.to_string(),
                invoice_id.to_string(),
                now,
                now + ttl_secs as i64,
            ],
        )?;
        tx.commit()?;
        Ok(inserted == 1)
    }

    pub fn release_lease(&self, contract_id: Uuid, invoice_id: Uuid) -> Result<(), DatabaseError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM reconciliation_leases WHERE contract_id = ?1 AND invoice_id = ?2",
            params![contract_id.to_string(), invoice_id.to_string()],
        )?;
        Ok(())
    }

    // ─── audit ───

    pub fn query_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>, DatabaseError> {
        let mut sql = String::from(
            "SELECT id, entity_type, entity_id, action, actor, before_json, after_json, created_at
             FROM audit_events WHERE 1=1",
        );
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(entity_type) = filter.entity_type {
            sql.push_str(" AND entity_type = ?");
            args.push(Box::new(entity_type.as_str().to_string()));
        }
        if let Some(entity_id) = filter.entity_id {
            sql.push_str(" AND entity_id = ?");
            args.push(Box::new(entity_id.to_string()));
        }
        if let Some(actor) = &filter.actor {
            sql.push_str(" AND actor = ?");
            args.push(Box::new(actor.clone()));
        }
        if let Some(since) = filter.since {
            sql.push_str(" AND created_at >= ?");
            args.push(Box::new(since));
        }
        if let Some(until) = filter.until {
            sql.push_str(" AND created_at <= ?");
            args.push(Box::new(until));
        }
        sql.push_str(" ORDER BY created_at DESC");
        sql.push_str(&format!(" LIMIT {}", filter.limit.unwrap_or(100)));

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let params = rusqlite::params_from_iter(args.iter().map(|a| a.as_ref()));
        let rows = stmt.query_map(params, row_to_audit_event)?;

        let mut events = Vec::new();
        for event in rows {
            events.push(event?);
        }
        Ok(events)
    }
}

fn status_str(status: RecordStatus) -> &'static str {
    match status {
        RecordStatus::Active => "active",
        RecordStatus::Archived => "archived",
    }
}

fn collect_payloads<T: serde::de::DeserializeOwned>(
    conn: &Connection,
    sql: &str,
) -> Result<Vec<T>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut records = Vec::new();
    for payload in rows {
        records.push(serde_json::from_str(&payload?)?);
    }
    Ok(records)
}

fn record_audit(
    tx: &Transaction<'_>,
    entity_type: EntityType,
    entity_id: Uuid,
    action: AuditAction,
    actor: &str,
    before: Option<serde_json::Value>,
    after: Option<serde_json::Value>,
) -> Result<(), DatabaseError> {
    tx.execute(
        "INSERT INTO audit_events (id, entity_type, entity_id, action, actor, before_json, after_json, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            Uuid::new_v4().to_string(),
            entity_type.as_str(),
            entity_id.to_string(),
            action.as_str(),
            actor,
            before.map(|v| v.to_string()),
            after.map(|v| v.to_string()),
            Utc::now(),
        ],
    )?;
    Ok(())
}

fn row_to_audit_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEvent> {
    let id: String = row.get(0)?;
    let entity_type: String = row.get(1)?;
    let entity_id: String = row.get(2)?;
    let action: String = row.get(3)?;
    let actor: String = row.get(4)?;
    let before_json: Option<String> = row.get(5)?;
    let after_json: Option<String> = row.get(6)?;
    let created_at: DateTime<Utc> = row.get(7)?;

    Ok(AuditEvent {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        entity_type: EntityType::parse(&entity_type).unwrap_or(EntityType::Contract),
        entity_id: Uuid::parse_str(&entity_id).unwrap_or_default(),
        action: match action.as_str() {
            "corrected" => AuditAction::Corrected,
            "archived" => AuditAction::Archived,
            "reconciled" => AuditAction::Reconciled,
            _ => AuditAction::Created,
        },
        actor,
        before: before_json.and_then(|s| serde_json::from_str(&s).ok()),
        after: after_json.and_then(|s| serde_json::from_str(&s).ok()),
        created_at,
    })
}
