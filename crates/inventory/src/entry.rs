use serde::{Deserialize, Serialize};

use stockledger_core::{ExpectedVersion, InventoryId, LedgerError, LedgerResult, ProductId};

/// Identifies one (inventory, product) pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub inventory_id: InventoryId,
    pub product_id: ProductId,
}

impl StockKey {
    pub fn new(inventory_id: InventoryId, product_id: ProductId) -> Self {
        Self {
            inventory_id,
            product_id,
        }
    }

    /// Record id used for the audit trail (`"{inventory}:{product}"`).
    pub fn record_id(&self) -> String {
        format!("{}:{}", self.inventory_id, self.product_id)
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "inventory {} / product {}", self.inventory_id, self.product_id)
    }
}

/// Whether an entry sits above its threshold or at/below it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockLevel {
    Ok,
    Low,
}

impl StockLevel {
    /// The threshold is inclusive: `quantity == min` is already low.
    pub fn of(quantity: i64, min_stock_quantity: i64) -> Self {
        if quantity <= min_stock_quantity {
            StockLevel::Low
        } else {
            StockLevel::Ok
        }
    }
}

/// Current on-hand state of one (inventory, product) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockEntry {
    pub inventory_id: InventoryId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub min_stock_quantity: i64,
    /// Optimistic concurrency counter; 1 after link, +1 per committed mutation.
    pub version: u64,
}

impl StockEntry {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.inventory_id, self.product_id)
    }

    pub fn level(&self) -> StockLevel {
        StockLevel::of(self.quantity, self.min_stock_quantity)
    }

    pub fn is_low(&self) -> bool {
        self.level() == StockLevel::Low
    }

    fn next(&self, quantity: i64, min_stock_quantity: i64) -> StockEntry {
        StockEntry {
            inventory_id: self.inventory_id,
            product_id: self.product_id,
            quantity,
            min_stock_quantity,
            version: self.version + 1,
        }
    }
}

/// What a committed mutation did.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Linked,
    Increased,
    Decreased,
    QuantitySet,
    MinStockUpdated,
    Unlinked,
}

impl MutationKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            MutationKind::Linked => "inventory.stock.linked",
            MutationKind::Increased => "inventory.stock.increased",
            MutationKind::Decreased => "inventory.stock.decreased",
            MutationKind::QuantitySet => "inventory.stock.quantity_set",
            MutationKind::MinStockUpdated => "inventory.stock.min_stock_updated",
            MutationKind::Unlinked => "inventory.stock.unlinked",
        }
    }
}

/// A requested mutation of one stock entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StockCommand {
    Link {
        quantity: i64,
        min_stock_quantity: i64,
    },
    Increase {
        delta: i64,
    },
    Decrease {
        delta: i64,
    },
    Set {
        quantity: i64,
    },
    UpdateMinStock {
        min_stock_quantity: i64,
    },
    Unlink,
}

/// Outcome of deciding a command against the current entry (nothing persisted yet).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockChange {
    pub key: StockKey,
    pub kind: MutationKind,
    /// Entry as read before the mutation (`None` for a link).
    pub before: Option<StockEntry>,
    /// Entry after the mutation (`None` for an unlink).
    pub after: Option<StockEntry>,
}

impl StockChange {
    /// Version the store must still hold for this change to commit.
    pub fn expected_version(&self) -> ExpectedVersion {
        ExpectedVersion::of(self.before.as_ref().map(|e| e.version))
    }
}

impl StockCommand {
    pub fn kind(&self) -> MutationKind {
        match self {
            StockCommand::Link { .. } => MutationKind::Linked,
            StockCommand::Increase { .. } => MutationKind::Increased,
            StockCommand::Decrease { .. } => MutationKind::Decreased,
            StockCommand::Set { .. } => MutationKind::QuantitySet,
            StockCommand::UpdateMinStock { .. } => MutationKind::MinStockUpdated,
            StockCommand::Unlink => MutationKind::Unlinked,
        }
    }

    /// Argument checks that do not depend on stored state.
    pub fn validate(&self) -> LedgerResult<()> {
        match self {
            StockCommand::Link {
                quantity,
                min_stock_quantity,
            } => {
                ensure_non_negative("quantity", *quantity)?;
                ensure_non_negative("min_stock_quantity", *min_stock_quantity)
            }
            StockCommand::Increase { delta } | StockCommand::Decrease { delta } => {
                if *delta <= 0 {
                    return Err(LedgerError::invalid_argument(format!(
                        "delta must be positive (got {delta})"
                    )));
                }
                Ok(())
            }
            StockCommand::Set { quantity } => ensure_non_negative("quantity", *quantity),
            StockCommand::UpdateMinStock { min_stock_quantity } => {
                ensure_non_negative("min_stock_quantity", *min_stock_quantity)
            }
            StockCommand::Unlink => Ok(()),
        }
    }

    /// Decide the change this command makes to `current`.
    ///
    /// Pure: no IO, no mutation. Rejections leave nothing to roll back.
    pub fn decide(&self, key: StockKey, current: Option<&StockEntry>) -> LedgerResult<StockChange> {
        self.validate()?;

        let after = match (self, current) {
            (
                StockCommand::Link {
                    quantity,
                    min_stock_quantity,
                },
                None,
            ) => Some(StockEntry {
                inventory_id: key.inventory_id,
                product_id: key.product_id,
                quantity: *quantity,
                min_stock_quantity: *min_stock_quantity,
                version: 1,
            }),
            (StockCommand::Link { .. }, Some(_)) => {
                return Err(LedgerError::already_exists(format!("{key} is already linked")));
            }
            (_, None) => {
                return Err(LedgerError::not_found(format!("{key} is not linked")));
            }
            (StockCommand::Increase { delta }, Some(entry)) => {
                let quantity = entry.quantity.checked_add(*delta).ok_or_else(|| {
                    LedgerError::invalid_argument(format!("increase by {delta} overflows quantity"))
                })?;
                Some(entry.next(quantity, entry.min_stock_quantity))
            }
            (StockCommand::Decrease { delta }, Some(entry)) => {
                if *delta > entry.quantity {
                    return Err(LedgerError::InsufficientStock {
                        available: entry.quantity,
                        requested: *delta,
                    });
                }
                Some(entry.next(entry.quantity - delta, entry.min_stock_quantity))
            }
            (StockCommand::Set { quantity }, Some(entry)) => {
                Some(entry.next(*quantity, entry.min_stock_quantity))
            }
            (StockCommand::UpdateMinStock { min_stock_quantity }, Some(entry)) => {
                Some(entry.next(entry.quantity, *min_stock_quantity))
            }
            (StockCommand::Unlink, Some(_)) => None,
        };

        Ok(StockChange {
            key,
            kind: self.kind(),
            before: current.cloned(),
            after,
        })
    }
}

fn ensure_non_negative(field: &str, value: i64) -> LedgerResult<()> {
    if value < 0 {
        return Err(LedgerError::invalid_argument(format!(
            "{field} must not be negative (got {value})"
        )));
    }
    Ok(())
}
