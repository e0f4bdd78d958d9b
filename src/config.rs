//! Application configuration.
//!
//! Everything tunable lives here and loads from environment variables with
//! documented defaults. The four reconciliation thresholds (confidence,
//! description similarity, price tolerance, math tolerance) are deliberately
//! configuration, not constants: upstream extraction quality varies per
//! deployment and the defaults below are starting points, not policy.

use std::env;

/// Version of the extraction schema. Part of every cache key: bumping it
/// invalidates cached extractions whose shape no longer matches.
pub const SCHEMA_VERSION: u32 = 3;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub model: ModelConfig,
    pub recon: ReconConfig,
    pub cache_ttl_secs: u64,
    /// Maximum reconciliation pipelines running at once.
    pub max_concurrent_runs: usize,
    /// A lease older than this is considered abandoned and may be reclaimed.
    pub lease_ttl_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the SQLite file. ":memory:" is accepted for ad-hoc runs.
    pub path: String,
}

/// Model tier configuration. The cheap tier handles first-pass extraction;
/// the expensive tier handles escalations and reconciliation review.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub base_url: String,
    pub api_key: String,
    pub cheap_model: String,
    pub expensive_model: String,
    /// Per-call HTTP timeout.
    pub timeout_secs: u64,
    /// Retries per model call on transport failure.
    pub max_retries: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            cheap_model: "gpt-4o-mini".to_string(),
            expensive_model: "gpt-4o".to_string(),
            timeout_secs: 60,
            max_retries: 2,
        }
    }
}

/// Thresholds and rates for the deterministic engine and the preview.
#[derive(Debug, Clone)]
pub struct ReconConfig {
    /// Aggregate extraction confidence below this escalates, and a match
    /// below this triggers the review stage. Default 0.7.
    pub confidence_threshold: f32,
    /// Minimum description similarity for a `description` match. Default 0.8.
    pub similarity_threshold: f32,
    /// Relative unit-price band for a `unit_price` match. Default 0.05 (±5%).
    pub price_tolerance: f64,
    /// Absolute tolerance for qty × unit_price vs line_total, in currency
    /// units. Default 0.01 (one cent).
    pub math_tolerance: f64,
    /// Tax rate applied to the next-payment preview subtotal. Default 0.10.
    pub tax_rate: f64,
    /// Annual escalation assumed for CPI-indexed contracts in the preview.
    pub cpi_assumption: f64,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            similarity_threshold: 0.8,
            price_tolerance: 0.05,
            math_tolerance: 0.01,
            tax_rate: 0.10,
            cpi_assumption: 0.03,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults suitable for local development.
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig {
                host: env_or("UNSPEND_HOST", "127.0.0.1"),
                port: env_parsed("UNSPEND_PORT", 8080),
            },
            database: DatabaseConfig {
                path: env_or("UNSPEND_DB_PATH", "unspend.db"),
            },
            model: ModelConfig {
                base_url: env_or("UNSPEND_MODEL_URL", "https://api.openai.com/v1"),
                api_key: env_or("UNSPEND_MODEL_API_KEY", ""),
                cheap_model: env_or("UNSPEND_CHEAP_MODEL", "gpt-4o-mini"),
                expensive_model: env_or("UNSPEND_EXPENSIVE_MODEL", "gpt-4o"),
                timeout_secs: env_parsed("UNSPEND_MODEL_TIMEOUT_SECS", 60),
                max_retries: env_parsed("UNSPEND_MODEL_RETRIES", 2),
            },
            recon: ReconConfig {
                confidence_threshold: env_parsed("UNSPEND_CONFIDENCE_THRESHOLD", 0.7),
                similarity_threshold: env_parsed("UNSPEND_SIMILARITY_THRESHOLD", 0.8),
                price_tolerance: env_parsed("UNSPEND_PRICE_TOLERANCE", 0.05),
                math_tolerance: env_parsed("UNSPEND_MATH_TOLERANCE", 0.01),
                tax_rate: env_parsed("UNSPEND_TAX_RATE", 0.10),
                cpi_assumption: env_parsed("UNSPEND_CPI_ASSUMPTION", 0.03),
            },
            cache_ttl_secs: env_parsed("UNSPEND_CACHE_TTL_SECS", 7 * 24 * 3600),
            max_concurrent_runs: env_parsed("UNSPEND_MAX_CONCURRENT_RUNS", 8),
            lease_ttl_secs: env_parsed("UNSPEND_LEASE_TTL_SECS", 300),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
