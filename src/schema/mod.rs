//! Shared typed records: extracted fields, contracts, invoices, and
//! reconciliation results, plus the per-record schema validation the
//! extraction router gates on.

pub mod contract;
pub mod corrections;
pub mod field;
pub mod invoice;
pub mod result;
pub mod validation;

pub use contract::{ContractRecord, ContractTerm, EscalationKind, PriceEscalation, RecordStatus};
pub use corrections::{apply_contract_correction, apply_invoice_correction, CorrectionError};
pub use field::ExtractedField;
pub use invoice::{InvoiceLine, InvoiceRecord};
pub use result::{
    Flag, FlagEvidence, FlagType, Match, MatchMethod, ReconciliationResult, ResultStatus,
    ServiceDates, Severity,
};
pub use validation::{validate_contract, validate_invoice, RecordValidation};
