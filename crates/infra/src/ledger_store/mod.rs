//! Ledger persistence boundary.
//!
//! Defines the contract the ledger consumes from a relational store and ships
//! two implementations: an in-memory store (tests/dev) and a Postgres store.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use query::{AuditQuery, AuditSortField, SortOrder};
pub use r#trait::{AssignmentWrite, CommittedStock, LedgerStore, StockWrite, StoreError};
