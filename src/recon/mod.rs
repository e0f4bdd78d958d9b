//! Reconciliation: deterministic matching, rule flags, review merge, and
//! the next-payment preview.
//!
//! Everything in this module is pure. The pipeline resolves history into a
//! `MatchContext`, calls `reconcile`, and decides from the draft whether the
//! review tier gets involved.

pub mod engine;
pub mod preview;
pub mod review;
pub mod rules;
pub mod similarity;

pub use engine::{reconcile, DraftResult, MatchContext};
pub use preview::{generate_preview, PaymentPreview, PreviewLine};
pub use review::{apply_review, ReviewAugmentation, ReviewPayload};
