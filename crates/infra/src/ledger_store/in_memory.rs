use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use stockledger_core::{InventoryId, ProductId};
use stockledger_inventory::{
    InventoryLabel, ManagerAssignment, ProductLabel, StockEntry, StockKey,
};

use super::query::AuditQuery;
use super::r#trait::{AssignmentWrite, CommittedStock, LedgerStore, StockWrite, StoreError};
use crate::audit::{AuditEntryRequest, AuditRecord};

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<StockKey, StockEntry>,
    assignments: BTreeSet<ManagerAssignment>,
    audit: Vec<AuditRecord>,
    products: HashMap<ProductId, ProductLabel>,
    inventories: HashMap<InventoryId, InventoryLabel>,
}

impl State {
    /// Build the next audit record without appending it.
    fn next_audit(&self, request: AuditEntryRequest) -> Result<AuditRecord, StoreError> {
        request.validate().map_err(StoreError::Audit)?;

        let last = self.audit.last();
        let id = last.map(|r| r.audit_log_id).unwrap_or(0) + 1;
        let now = Utc::now();
        let timestamp: DateTime<Utc> = match last {
            Some(prev) if prev.timestamp > now => prev.timestamp,
            _ => now,
        };
        Ok(request.into_record(id, timestamp))
    }
}

/// In-memory ledger store.
///
/// Intended for tests/dev. Every write takes the single state lock, so the
/// version check, the entry write and the audit append are one atomic step.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<State>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a catalog product.
    pub fn register_product(&self, product_id: ProductId, label: ProductLabel) -> Result<(), StoreError> {
        self.write()?.products.insert(product_id, label);
        Ok(())
    }

    /// Seed a catalog inventory.
    pub fn register_inventory(&self, inventory_id: InventoryId, label: InventoryLabel) -> Result<(), StoreError> {
        self.write()?.inventories.insert(inventory_id, label);
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn get_stock_entry(&self, key: StockKey) -> Result<Option<StockEntry>, StoreError> {
        Ok(self.read()?.entries.get(&key).cloned())
    }

    async fn list_stock_entries(&self, inventory_id: InventoryId) -> Result<Vec<StockEntry>, StoreError> {
        let state = self.read()?;
        Ok(state
            .entries
            .values()
            .filter(|e| e.inventory_id == inventory_id)
            .cloned()
            .collect())
    }

    async fn commit_stock(&self, write: StockWrite) -> Result<CommittedStock, StoreError> {
        let StockWrite { change, audit } = write;
        let key = change.key;

        let mut state = self.write()?;

        let current = state.entries.get(&key).map(|e| e.version);
        if !change.expected_version().matches(current) {
            return Err(StoreError::Conflict(format!(
                "{key}: expected {:?}, found {current:?}",
                change.expected_version()
            )));
        }
        if change.before.is_none()
            && (!state.products.contains_key(&key.product_id)
                || !state.inventories.contains_key(&key.inventory_id))
        {
            return Err(StoreError::NotFound(format!("{key} is not in the catalog")));
        }

        // Audit first: a rejected record must leave the entry untouched.
        let record = state.next_audit(audit)?;

        match &change.after {
            Some(entry) => {
                state.entries.insert(key, entry.clone());
            }
            None => {
                state.entries.remove(&key);
            }
        }
        state.audit.push(record.clone());

        Ok(CommittedStock {
            entry: change.after,
            audit: record,
        })
    }

    async fn list_assignments(&self) -> Result<Vec<ManagerAssignment>, StoreError> {
        Ok(self.read()?.assignments.iter().copied().collect())
    }

    async fn insert_assignment(&self, write: AssignmentWrite) -> Result<AuditRecord, StoreError> {
        let mut state = self.write()?;
        let a = write.assignment;

        if !state.inventories.contains_key(&a.inventory_id) {
            return Err(StoreError::NotFound(format!("inventory {}", a.inventory_id)));
        }
        if state.assignments.contains(&a) {
            return Err(StoreError::AlreadyExists(format!(
                "manager {} is already assigned to inventory {}",
                a.manager_id, a.inventory_id
            )));
        }

        let record = state.next_audit(write.audit)?;
        state.assignments.insert(a);
        state.audit.push(record.clone());
        Ok(record)
    }

    async fn delete_assignment(&self, write: AssignmentWrite) -> Result<AuditRecord, StoreError> {
        let mut state = self.write()?;
        let a = write.assignment;

        if !state.assignments.contains(&a) {
            return Err(StoreError::NotFound(format!(
                "manager {} is not assigned to inventory {}",
                a.manager_id, a.inventory_id
            )));
        }

        let record = state.next_audit(write.audit)?;
        state.assignments.remove(&a);
        state.audit.push(record.clone());
        Ok(record)
    }

    async fn query_audit(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, StoreError> {
        let state = self.read()?;
        let mut records: Vec<AuditRecord> = state
            .audit
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        records.sort_by(|a, b| query.compare(a, b));
        records.truncate(query.effective_limit() as usize);
        Ok(records)
    }

    async fn product_label(&self, product_id: ProductId) -> Result<Option<ProductLabel>, StoreError> {
        Ok(self.read()?.products.get(&product_id).cloned())
    }

    async fn inventory_label(&self, inventory_id: InventoryId) -> Result<Option<InventoryLabel>, StoreError> {
        Ok(self.read()?.inventories.get(&inventory_id).cloned())
    }
}
