//! Response cache for model extraction calls.
//!
//! Two layers: the `cache_entries` table is authoritative and survives
//! restarts; a small in-memory map fronts it, holding only entries this
//! process wrote itself. A per-key lock registry gives single-flight
//! semantics: concurrent requests for the same key produce exactly one
//! model invocation.
//!
//! Cache trouble is never fatal. A failed read is a miss, a failed write is
//! a warning, and the caller proceeds with a live model call either way.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::config::SCHEMA_VERSION;

/// Cache key for one extraction call: normalized input text plus the tier
/// pair and schema version, so a model upgrade or schema change never
/// replays stale payloads.
pub fn cache_key(normalized_text: &str, cheap_model: &str, expensive_model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_text.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(cheap_model.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(expensive_model.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(SCHEMA_VERSION.to_le_bytes());
    BASE64.encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
}

struct MemoryEntry {
    payload: String,
    expires_at: i64,
}

pub struct ResponseCache {
    conn: Arc<Mutex<Connection>>,
    memory: Mutex<HashMap<String, MemoryEntry>>,
    flights: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    ttl_secs: i64,
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
}

impl ResponseCache {
    pub fn new(conn: Arc<Mutex<Connection>>, ttl_secs: u64) -> Self {
        Self {
            conn,
            memory: Mutex::new(HashMap::new()),
            flights: Mutex::new(HashMap::new()),
            ttl_secs: ttl_secs as i64,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    /// The per-key lock. Callers hold it across the whole
    /// check-compute-store sequence; the first one in does the model call,
    /// the rest find the entry when their turn comes.
    pub fn flight_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut flights = match self.flights.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        flights
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Look up a payload. Expired entries are evicted and count as misses.
    pub fn get(&self, key: &str) -> Option<String> {
        let now = Utc::now().timestamp();

        if let Ok(mut memory) = self.memory.lock() {
            if let Some(entry) = memory.get(key) {
                if entry.expires_at > now {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.payload.clone());
                }
                memory.remove(key);
                self.expired.fetch_add(1, Ordering::Relaxed);
                self.delete_row(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }

        match self.read_row(key) {
            Some((payload, expires_at)) if expires_at > now => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(payload)
            }
            Some(_) => {
                self.expired.fetch_add(1, Ordering::Relaxed);
                self.delete_row(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a payload under the configured TTL.
    pub fn put(&self, key: &str, payload: &str) {
        let now = Utc::now().timestamp();
        let result = self.conn.lock().map_err(|_| ()).and_then(|conn| {
            conn.execute(
                "INSERT INTO cache_entries (key, payload, created_at, ttl_secs)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                     payload = excluded.payload,
                     created_at = excluded.created_at,
                     ttl_secs = excluded.ttl_secs",
                params![key, payload, now, self.ttl_secs],
            )
            .map_err(|e| warn!("cache write failed: {e}"))
        });

        // the memory front only mirrors entries this process wrote
        if result.is_ok() {
            if let Ok(mut memory) = self.memory.lock() {
                memory.insert(
                    key.to_string(),
                    MemoryEntry {
                        payload: payload.to_string(),
                        expires_at: now + self.ttl_secs,
                    },
                );
            }
        }
    }

    /// Sweep expired rows and idle flight locks. Returns rows deleted.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now().timestamp();

        if let Ok(mut memory) = self.memory.lock() {
            memory.retain(|_, entry| entry.expires_at > now);
        }
        if let Ok(mut flights) = self.flights.lock() {
            flights.retain(|_, lock| Arc::strong_count(lock) > 1);
        }

        match self.conn.lock() {
            Ok(conn) => conn
                .execute(
                    "DELETE FROM cache_entries WHERE created_at + ttl_secs <= ?1",
                    params![now],
                )
                .unwrap_or_else(|e| {
                    warn!("cache purge failed: {e}");
                    0
                }),
            Err(_) => 0,
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }

    fn read_row(&self, key: &str) -> Option<(String, i64)> {
        let conn = self.conn.lock().ok()?;
        conn.query_row(
            "SELECT payload, created_at + ttl_secs FROM cache_entries WHERE key = ?1",
            params![key],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()
        .unwrap_or_else(|e| {
            warn!("cache read failed: {e}");
            None
        })
    }

    fn delete_row(&self, key: &str) {
        if let Ok(conn) = self.conn.lock() {
            if let Err(e) = conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key]) {
                warn!("cache delete failed: {e}");
            }
        }
    }
}
