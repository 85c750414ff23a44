//! Stock domain module.
//!
//! Business rules for per-inventory product quantities, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod alert;
pub mod assignment;
pub mod catalog;
pub mod entry;
pub mod event;

pub use alert::{AccountNotice, LowStockAlert, Notification};
pub use assignment::ManagerAssignment;
pub use catalog::{InventoryLabel, ProductLabel};
pub use entry::{MutationKind, StockChange, StockCommand, StockEntry, StockKey, StockLevel};
pub use event::MutationEvent;
