use serde::{Deserialize, Serialize};

/// Display labels of a catalog product (owned by catalog CRUD, read-only here).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductLabel {
    pub sku: String,
    pub name: String,
}

impl ProductLabel {
    pub fn new(sku: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            sku: sku.into(),
            name: name.into(),
        }
    }
}

/// Display label of an inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLabel {
    pub name: String,
}

impl InventoryLabel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}
