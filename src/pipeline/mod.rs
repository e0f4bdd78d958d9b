//! Per-pair reconciliation runs: lease, context, deterministic pass,
//! conditional review, persistence.

pub mod runner;

pub use runner::PipelineRunner;

use thiserror::Error;
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::extraction::ExtractionError;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// The pair is leased by another run. The caller gets a conflict, never
    /// a queue slot.
    #[error("reconciliation already in flight for contract {contract_id} / invoice {invoice_id}")]
    RunInFlight {
        contract_id: Uuid,
        invoice_id: Uuid,
    },

    #[error("record not found: {entity} {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("pipeline is shutting down")]
    Shutdown,

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}
