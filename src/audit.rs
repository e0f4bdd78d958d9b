//! Append-only audit trail.
//!
//! Every persisted mutation writes exactly one event, inside the same
//! transaction as the mutation itself. Events are never updated or deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of record an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Contract,
    Invoice,
    ReconciliationResult,
}

impl EntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Contract => "contract",
            EntityType::Invoice => "invoice",
            EntityType::ReconciliationResult => "reconciliation_result",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "contract" => Some(EntityType::Contract),
            "invoice" => Some(EntityType::Invoice),
            "reconciliation_result" => Some(EntityType::ReconciliationResult),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Corrected,
    Archived,
    Reconciled,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Created => "created",
            AuditAction::Corrected => "corrected",
            AuditAction::Archived => "archived",
            AuditAction::Reconciled => "reconciled",
        }
    }
}

/// One recorded mutation. `before`/`after` hold JSON snapshots where a diff
/// is meaningful (corrections, archival); creation events carry `after` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub action: AuditAction,
    pub actor: String,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Filters for the audit query endpoint. All fields optional; unset means
/// unfiltered.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    pub entity_type: Option<EntityType>,
    pub entity_id: Option<Uuid>,
    pub actor: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_type_round_trips_through_str() {
        for et in [
            EntityType::Contract,
            EntityType::Invoice,
            EntityType::ReconciliationResult,
        ] {
            assert_eq!(EntityType::parse(et.as_str()), Some(et));
        }
        assert_eq!(EntityType::parse("vendor"), None);
    }

    #[test]
    fn filter_deserializes_from_query_shape() {
        let filter: AuditFilter = serde_json::from_str(
            r#"{"entity_type": "contract", "actor": "reviewer", "limit": 10}"#,
        )
        .unwrap();
        assert_eq!(filter.entity_type, Some(EntityType::Contract));
        assert_eq!(filter.actor.as_deref(), Some("reviewer"));
        assert_eq!(filter.limit, Some(10));
    }
}
