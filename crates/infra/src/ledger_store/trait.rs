use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use stockledger_core::{InventoryId, LedgerError, ProductId};
use stockledger_inventory::{
    InventoryLabel, ManagerAssignment, ProductLabel, StockChange, StockEntry, StockKey,
};

use crate::audit::{AuditEntryRequest, AuditRecord};
use crate::ledger_store::query::AuditQuery;

/// Ledger store operation error.
///
/// These are **infrastructure errors**. Domain rejections (negative
/// quantities, insufficient stock) never reach the store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The row changed (or appeared) since it was read.
    #[error("optimistic concurrency check failed: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The audit insert failed; the enclosing write was rolled back.
    #[error("audit write failed: {0}")]
    Audit(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(msg) => LedgerError::Conflict(msg),
            StoreError::NotFound(msg) => LedgerError::NotFound(msg),
            StoreError::AlreadyExists(msg) => LedgerError::AlreadyExists(msg),
            StoreError::Audit(msg) => LedgerError::Storage(format!("audit write failed: {msg}")),
            StoreError::Backend(msg) => LedgerError::Storage(msg),
        }
    }
}

/// A decided stock change plus the audit record describing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockWrite {
    pub change: StockChange,
    pub audit: AuditEntryRequest,
}

/// Result of a committed stock write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedStock {
    /// Entry as stored after the commit (`None` after an unlink).
    pub entry: Option<StockEntry>,
    pub audit: AuditRecord,
}

/// An assignment edge change plus its audit record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentWrite {
    pub assignment: ManagerAssignment,
    pub audit: AuditEntryRequest,
}

/// Persistence boundary of the ledger.
///
/// ## Commit semantics
///
/// `commit_stock()`:
/// - compares the stored version against `change.expected_version()` and
///   fails with `Conflict` when they differ (compare-and-swap)
/// - inserts, updates or deletes the entry according to the change
/// - appends the audit record
///
/// All three happen in one unit of work: either the entry changed and the
/// audit record exists, or neither. Assignment inserts and deletes follow the
/// same rule for their audit records.
///
/// ## Audit ordering
///
/// Implementations assign strictly increasing `audit_log_id`s and timestamps
/// that never go backwards.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_stock_entry(&self, key: StockKey) -> Result<Option<StockEntry>, StoreError>;

    /// Entries of one inventory ordered by product id.
    async fn list_stock_entries(&self, inventory_id: InventoryId) -> Result<Vec<StockEntry>, StoreError>;

    async fn commit_stock(&self, write: StockWrite) -> Result<CommittedStock, StoreError>;

    async fn list_assignments(&self) -> Result<Vec<ManagerAssignment>, StoreError>;

    /// `AlreadyExists` when the pair is already assigned.
    async fn insert_assignment(&self, write: AssignmentWrite) -> Result<AuditRecord, StoreError>;

    /// `NotFound` when the pair is not assigned.
    async fn delete_assignment(&self, write: AssignmentWrite) -> Result<AuditRecord, StoreError>;

    async fn query_audit(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, StoreError>;

    async fn product_label(&self, product_id: ProductId) -> Result<Option<ProductLabel>, StoreError>;

    async fn inventory_label(&self, inventory_id: InventoryId) -> Result<Option<InventoryLabel>, StoreError>;
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    async fn get_stock_entry(&self, key: StockKey) -> Result<Option<StockEntry>, StoreError> {
        (**self).get_stock_entry(key).await
    }

    async fn list_stock_entries(&self, inventory_id: InventoryId) -> Result<Vec<StockEntry>, StoreError> {
        (**self).list_stock_entries(inventory_id).await
    }

    async fn commit_stock(&self, write: StockWrite) -> Result<CommittedStock, StoreError> {
        (**self).commit_stock(write).await
    }

    async fn list_assignments(&self) -> Result<Vec<ManagerAssignment>, StoreError> {
        (**self).list_assignments().await
    }

    async fn insert_assignment(&self, write: AssignmentWrite) -> Result<AuditRecord, StoreError> {
        (**self).insert_assignment(write).await
    }

    async fn delete_assignment(&self, write: AssignmentWrite) -> Result<AuditRecord, StoreError> {
        (**self).delete_assignment(write).await
    }

    async fn query_audit(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, StoreError> {
        (**self).query_audit(query).await
    }

    async fn product_label(&self, product_id: ProductId) -> Result<Option<ProductLabel>, StoreError> {
        (**self).product_label(product_id).await
    }

    async fn inventory_label(&self, inventory_id: InventoryId) -> Result<Option<InventoryLabel>, StoreError> {
        (**self).inventory_label(inventory_id).await
    }
}
