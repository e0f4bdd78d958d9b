//! SQLite persistence: connection setup, migrations, and the record store.

pub mod repository;
pub mod sqlite;

pub use repository::Store;
pub use sqlite::{open_database, open_memory_database, run_migrations};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Migration v{version} failed: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("Record not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Correction rejected: {0}")]
    Correction(#[from] crate::schema::CorrectionError),

    #[error("Database lock poisoned")]
    LockPoisoned,
}
