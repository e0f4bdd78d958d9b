//! Unspend reconciles vendor invoices against the contracts that govern
//! them.
//!
//! Documents enter through a two-tier extraction router (cheap model first,
//! escalation to a stronger model on low confidence), land as typed records
//! with per-field confidences, and are reconciled by a deterministic
//! matching engine. A result that carries flags or weak matches gets one
//! advisory review pass from the expensive tier before persisting. Every
//! mutation is audited in the same transaction that writes it.

pub mod api;
pub mod audit;
pub mod cache;
pub mod config;
pub mod db;
pub mod extraction;
pub mod pipeline;
pub mod recon;
pub mod schema;
