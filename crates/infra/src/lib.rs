//! Infrastructure layer: persistence, audit trail, ledger service, notification fan-out.

pub mod assignment_registry;
pub mod audit;
pub mod config;
pub mod ledger_store;
pub mod notifications;
pub mod stock_ledger;
pub mod workers;

mod integration_tests;

pub use assignment_registry::AssignmentRegistry;
pub use audit::{AuditAction, AuditEntryRequest, AuditRecord, AuditRecorder};
pub use config::{AlertPolicy, ConfigError, LedgerConfig};
pub use stock_ledger::StockLedger;
