//! Notifications pushed to connected clients.
//!
//! The JSON shape (camelCase, `kind` tag) is what clients persist in their
//! session slot, so field names are part of the client contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockledger_core::{InventoryId, ProductId, UserId};

use crate::catalog::{InventoryLabel, ProductLabel};
use crate::entry::StockEntry;

/// Transient low-stock alert; not persisted server-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LowStockAlert {
    /// Client-side dedup key.
    pub alert_id: Uuid,
    pub product_id: ProductId,
    pub sku: String,
    pub product_name: String,
    pub current_quantity: i64,
    pub min_stock_quantity: i64,
    pub inventory_id: InventoryId,
    pub inventory_name: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl LowStockAlert {
    pub fn new(
        entry: &StockEntry,
        product: &ProductLabel,
        inventory: &InventoryLabel,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let message = format!(
            "Low stock: {} ({}) in {} has {} left (minimum {})",
            product.name, product.sku, inventory.name, entry.quantity, entry.min_stock_quantity
        );
        Self {
            alert_id: Uuid::now_v7(),
            product_id: entry.product_id,
            sku: product.sku.clone(),
            product_name: product.name.clone(),
            current_quantity: entry.quantity,
            min_stock_quantity: entry.min_stock_quantity,
            inventory_id: entry.inventory_id,
            inventory_name: inventory.name.clone(),
            message,
            timestamp,
        }
    }
}

/// Account-level notice sharing the notification channel (not inventory-scoped).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountNotice {
    pub notice_id: Uuid,
    /// Addressed user; `None` means "administrators".
    pub target_user: Option<UserId>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl AccountNotice {
    pub fn new(target_user: Option<UserId>, message: impl Into<String>) -> Self {
        Self {
            notice_id: Uuid::now_v7(),
            target_user,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    LowStock(LowStockAlert),
    Account(AccountNotice),
}

impl Notification {
    pub fn id(&self) -> Uuid {
        match self {
            Notification::LowStock(a) => a.alert_id,
            Notification::Account(n) => n.notice_id,
        }
    }

    /// Inventory the notification is scoped to, if any.
    pub fn inventory_id(&self) -> Option<InventoryId> {
        match self {
            Notification::LowStock(a) => Some(a.inventory_id),
            Notification::Account(_) => None,
        }
    }

    pub fn target_user(&self) -> Option<UserId> {
        match self {
            Notification::LowStock(_) => None,
            Notification::Account(n) => n.target_user,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Notification::LowStock(a) => a.timestamp,
            Notification::Account(n) => n.timestamp,
        }
    }

    pub fn topic(&self) -> &'static str {
        match self {
            Notification::LowStock(_) => "low_stock",
            Notification::Account(_) => "account",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> StockEntry {
        StockEntry {
            inventory_id: InventoryId::new(1),
            product_id: ProductId::new(7),
            quantity: 4,
            min_stock_quantity: 5,
            version: 2,
        }
    }

    #[test]
    fn alert_copies_levels_and_labels() {
        let alert = LowStockAlert::new(
            &entry(),
            &ProductLabel::new("SKU-7", "Widget"),
            &InventoryLabel::new("Main"),
            Utc::now(),
        );
        assert_eq!(alert.current_quantity, 4);
        assert_eq!(alert.min_stock_quantity, 5);
        assert_eq!(alert.sku, "SKU-7");
        assert_eq!(alert.inventory_name, "Main");
        assert!(alert.message.contains("Widget"));
    }

    #[test]
    fn notification_json_is_tagged_and_camel_cased() {
        let alert = LowStockAlert::new(
            &entry(),
            &ProductLabel::new("SKU-7", "Widget"),
            &InventoryLabel::new("Main"),
            Utc::now(),
        );
        let json = serde_json::to_value(Notification::LowStock(alert)).unwrap();
        assert_eq!(json["kind"], "low_stock");
        assert_eq!(json["currentQuantity"], 4);
        assert_eq!(json["inventoryId"], 1);
    }
}
