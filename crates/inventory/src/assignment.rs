use serde::{Deserialize, Serialize};

use stockledger_core::{InventoryId, UserId};

/// Grants a manager visibility into one inventory. Unique per pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ManagerAssignment {
    pub inventory_id: InventoryId,
    pub manager_id: UserId,
}

impl ManagerAssignment {
    pub fn new(inventory_id: InventoryId, manager_id: UserId) -> Self {
        Self {
            inventory_id,
            manager_id,
        }
    }

    pub fn record_id(&self) -> String {
        format!("{}:{}", self.inventory_id, self.manager_id)
    }
}
