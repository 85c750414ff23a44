//! Audit trail records and the recorder that builds them from committed changes.
//!
//! Records are append-only. A store writes the record inside the same unit of
//! work as the change it describes, so a record exists iff the change committed.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use stockledger_core::{LedgerError, LedgerResult, UserId};
use stockledger_inventory::{ManagerAssignment, MutationKind, StockChange};

/// Table name recorded for stock entry mutations.
pub const STOCK_TABLE: &str = "inventory_products";
/// Table name recorded for manager assignment changes.
pub const ASSIGNMENT_TABLE: &str = "inventory_managers";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    QuantityIncrease,
    QuantityDecrease,
    QuantitySet,
    MinStockUpdate,
    Assign,
    Unassign,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::QuantityIncrease => "QUANTITY_INCREASE",
            AuditAction::QuantityDecrease => "QUANTITY_DECREASE",
            AuditAction::QuantitySet => "QUANTITY_SET",
            AuditAction::MinStockUpdate => "MIN_STOCK_UPDATE",
            AuditAction::Assign => "ASSIGN",
            AuditAction::Unassign => "UNASSIGN",
        }
    }
}

impl From<MutationKind> for AuditAction {
    fn from(kind: MutationKind) -> Self {
        match kind {
            MutationKind::Linked => AuditAction::Create,
            MutationKind::Increased => AuditAction::QuantityIncrease,
            MutationKind::Decreased => AuditAction::QuantityDecrease,
            MutationKind::QuantitySet => AuditAction::QuantitySet,
            MutationKind::MinStockUpdated => AuditAction::MinStockUpdate,
            MutationKind::Unlinked => AuditAction::Delete,
        }
    }
}

impl core::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let action = match s.trim().to_ascii_uppercase().as_str() {
            "CREATE" => AuditAction::Create,
            "UPDATE" => AuditAction::Update,
            "DELETE" => AuditAction::Delete,
            "QUANTITY_INCREASE" => AuditAction::QuantityIncrease,
            "QUANTITY_DECREASE" => AuditAction::QuantityDecrease,
            "QUANTITY_SET" => AuditAction::QuantitySet,
            "MIN_STOCK_UPDATE" => AuditAction::MinStockUpdate,
            "ASSIGN" => AuditAction::Assign,
            "UNASSIGN" => AuditAction::Unassign,
            other => {
                return Err(LedgerError::invalid_argument(format!(
                    "unknown audit action '{other}'"
                )));
            }
        };
        Ok(action)
    }
}

/// An audit record that has not been written yet (no id, no timestamp).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntryRequest {
    pub actor_id: Option<UserId>,
    pub table_name: String,
    pub record_id: String,
    pub action: AuditAction,
    pub old_value: Option<JsonValue>,
    pub new_value: Option<JsonValue>,
    pub changes: Option<String>,
}

impl AuditEntryRequest {
    /// Stores refuse to append a record that does not identify what it describes.
    pub fn validate(&self) -> Result<(), String> {
        if self.table_name.trim().is_empty() {
            return Err("audit record has no table name".to_string());
        }
        if self.record_id.trim().is_empty() {
            return Err("audit record has no record id".to_string());
        }
        Ok(())
    }

    pub fn into_record(self, audit_log_id: i64, timestamp: DateTime<Utc>) -> AuditRecord {
        AuditRecord {
            audit_log_id,
            actor_id: self.actor_id,
            table_name: self.table_name,
            record_id: self.record_id,
            action_type: self.action,
            old_value: self.old_value,
            new_value: self.new_value,
            changes: self.changes,
            timestamp,
        }
    }
}

/// A persisted audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// Strictly increasing, assigned by the store.
    pub audit_log_id: i64,
    pub actor_id: Option<UserId>,
    pub table_name: String,
    pub record_id: String,
    pub action_type: AuditAction,
    pub old_value: Option<JsonValue>,
    pub new_value: Option<JsonValue>,
    pub changes: Option<String>,
    /// Never earlier than the previous record's timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Builds audit requests for ledger and registry changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditRecorder;

impl AuditRecorder {
    pub fn for_stock_change(change: &StockChange, actor: Option<UserId>) -> LedgerResult<AuditEntryRequest> {
        let old_value = change.before.as_ref().map(snapshot).transpose()?;
        let new_value = change.after.as_ref().map(snapshot).transpose()?;
        let changes = describe_changes(old_value.as_ref(), new_value.as_ref());

        Ok(AuditEntryRequest {
            actor_id: actor,
            table_name: STOCK_TABLE.to_string(),
            record_id: change.key.record_id(),
            action: change.kind.into(),
            old_value,
            new_value,
            changes,
        })
    }

    /// `action` must be `Assign` or `Unassign`.
    pub fn for_assignment(
        assignment: &ManagerAssignment,
        action: AuditAction,
        actor: Option<UserId>,
    ) -> LedgerResult<AuditEntryRequest> {
        let value = snapshot(assignment)?;
        let (old_value, new_value) = match action {
            AuditAction::Assign => (None, Some(value)),
            AuditAction::Unassign => (Some(value), None),
            other => {
                return Err(LedgerError::invalid_argument(format!(
                    "{other} is not an assignment action"
                )));
            }
        };
        let changes = describe_changes(old_value.as_ref(), new_value.as_ref());

        Ok(AuditEntryRequest {
            actor_id: actor,
            table_name: ASSIGNMENT_TABLE.to_string(),
            record_id: assignment.record_id(),
            action,
            old_value,
            new_value,
            changes,
        })
    }
}

fn snapshot<T: Serialize>(value: &T) -> LedgerResult<JsonValue> {
    serde_json::to_value(value).map_err(|e| LedgerError::storage(format!("audit snapshot failed: {e}")))
}

// `version` is bookkeeping, not business state.
const UNDESCRIBED_FIELDS: &[&str] = &["version"];

/// Human-readable diff of two JSON object snapshots, e.g. `quantity: 20 -> 4`.
pub fn describe_changes(old: Option<&JsonValue>, new: Option<&JsonValue>) -> Option<String> {
    let describe = |value: &JsonValue| -> Vec<String> {
        value
            .as_object()
            .map(|obj| {
                obj.iter()
                    .filter(|(k, _)| !UNDESCRIBED_FIELDS.contains(&k.as_str()))
                    .map(|(k, v)| format!("{k}: {v}"))
                    .collect()
            })
            .unwrap_or_default()
    };

    let parts: Vec<String> = match (old, new) {
        (None, None) => return None,
        (None, Some(new)) => describe(new),
        (Some(old), None) => describe(old),
        (Some(old), Some(new)) => {
            let (Some(old), Some(new)) = (old.as_object(), new.as_object()) else {
                return Some(format!("{old} -> {new}"));
            };
            new.iter()
                .filter(|(k, _)| !UNDESCRIBED_FIELDS.contains(&k.as_str()))
                .filter_map(|(k, v)| match old.get(k) {
                    Some(prev) if prev == v => None,
                    Some(prev) => Some(format!("{k}: {prev} -> {v}")),
                    None => Some(format!("{k}: {v}")),
                })
                .collect()
        }
    };

    if parts.is_empty() { None } else { Some(parts.join(", ")) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_core::{InventoryId, ProductId};
    use stockledger_inventory::{StockCommand, StockKey};

    fn key() -> StockKey {
        StockKey::new(InventoryId::new(1), ProductId::new(7))
    }

    #[test]
    fn link_is_recorded_as_create_without_old_value() {
        let change = StockCommand::Link {
            quantity: 20,
            min_stock_quantity: 5,
        }
        .decide(key(), None)
        .unwrap();

        let req = AuditRecorder::for_stock_change(&change, Some(UserId::new(3))).unwrap();
        assert_eq!(req.action, AuditAction::Create);
        assert_eq!(req.table_name, STOCK_TABLE);
        assert_eq!(req.record_id, "1:7");
        assert!(req.old_value.is_none());
        assert_eq!(req.new_value.as_ref().unwrap()["quantity"], 20);
        assert_eq!(req.actor_id, Some(UserId::new(3)));
    }

    #[test]
    fn decrease_diff_names_the_changed_field_only() {
        let linked = StockCommand::Link {
            quantity: 20,
            min_stock_quantity: 5,
        }
        .decide(key(), None)
        .unwrap()
        .after
        .unwrap();
        let change = StockCommand::Decrease { delta: 16 }
            .decide(key(), Some(&linked))
            .unwrap();

        let req = AuditRecorder::for_stock_change(&change, None).unwrap();
        assert_eq!(req.action, AuditAction::QuantityDecrease);
        assert_eq!(req.changes.as_deref(), Some("quantity: 20 -> 4"));
    }

    #[test]
    fn unlink_is_recorded_as_delete_without_new_value() {
        let linked = StockCommand::Link {
            quantity: 2,
            min_stock_quantity: 0,
        }
        .decide(key(), None)
        .unwrap()
        .after
        .unwrap();
        let change = StockCommand::Unlink.decide(key(), Some(&linked)).unwrap();

        let req = AuditRecorder::for_stock_change(&change, None).unwrap();
        assert_eq!(req.action, AuditAction::Delete);
        assert!(req.new_value.is_none());
        assert!(req.old_value.is_some());
    }

    #[test]
    fn assignment_actions_only() {
        let a = ManagerAssignment::new(InventoryId::new(1), UserId::new(9));
        let req = AuditRecorder::for_assignment(&a, AuditAction::Assign, None).unwrap();
        assert_eq!(req.table_name, ASSIGNMENT_TABLE);
        assert_eq!(req.record_id, "1:9");

        let err = AuditRecorder::for_assignment(&a, AuditAction::QuantitySet, None).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));
    }

    #[test]
    fn action_names_round_trip_through_storage_form() {
        for action in [
            AuditAction::Create,
            AuditAction::QuantityIncrease,
            AuditAction::MinStockUpdate,
            AuditAction::Unassign,
        ] {
            assert_eq!(action.as_str().parse::<AuditAction>().unwrap(), action);
        }
    }
}
