//! Manager <-> inventory visibility.
//!
//! Lookups are synchronous and served from an in-memory cache; the cache is
//! rebuilt from the store at startup and after every successful change.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use stockledger_core::{InventoryId, LedgerError, LedgerResult, UserId};
use stockledger_inventory::ManagerAssignment;

use crate::audit::{AuditAction, AuditRecorder};
use crate::ledger_store::{AssignmentWrite, LedgerStore};

#[derive(Debug, Default)]
struct AssignmentCache {
    by_manager: HashMap<UserId, BTreeSet<InventoryId>>,
    by_inventory: HashMap<InventoryId, BTreeSet<UserId>>,
}

impl AssignmentCache {
    fn build(assignments: &[ManagerAssignment]) -> Self {
        let mut cache = Self::default();
        for a in assignments {
            cache
                .by_manager
                .entry(a.manager_id)
                .or_default()
                .insert(a.inventory_id);
            cache
                .by_inventory
                .entry(a.inventory_id)
                .or_default()
                .insert(a.manager_id);
        }
        cache
    }
}

pub struct AssignmentRegistry<S: ?Sized> {
    store: Arc<S>,
    cache: RwLock<AssignmentCache>,
}

impl<S> AssignmentRegistry<S>
where
    S: LedgerStore + ?Sized,
{
    /// Registry with an empty cache; call `refresh` before serving lookups.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            cache: RwLock::new(AssignmentCache::default()),
        }
    }

    /// Registry with the cache loaded from the store.
    pub async fn load(store: Arc<S>) -> LedgerResult<Self> {
        let registry = Self::new(store);
        registry.refresh().await?;
        Ok(registry)
    }

    pub fn inventories_for_manager(&self, manager_id: UserId) -> BTreeSet<InventoryId> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        cache.by_manager.get(&manager_id).cloned().unwrap_or_default()
    }

    pub fn managers_for_inventory(&self, inventory_id: InventoryId) -> BTreeSet<UserId> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        cache.by_inventory.get(&inventory_id).cloned().unwrap_or_default()
    }

    pub fn is_assigned(&self, manager_id: UserId, inventory_id: InventoryId) -> bool {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        cache
            .by_manager
            .get(&manager_id)
            .is_some_and(|set| set.contains(&inventory_id))
    }

    pub async fn assign(
        &self,
        inventory_id: InventoryId,
        manager_id: UserId,
        actor: Option<UserId>,
    ) -> LedgerResult<ManagerAssignment> {
        let assignment = ManagerAssignment::new(inventory_id, manager_id);
        let audit = AuditRecorder::for_assignment(&assignment, AuditAction::Assign, actor)?;

        self.store
            .insert_assignment(AssignmentWrite { assignment, audit })
            .await?;
        info!(inventory_id = %inventory_id, manager_id = %manager_id, "manager assigned");

        self.refresh().await?;
        Ok(assignment)
    }

    pub async fn unassign(
        &self,
        inventory_id: InventoryId,
        manager_id: UserId,
        actor: Option<UserId>,
    ) -> LedgerResult<ManagerAssignment> {
        let assignment = ManagerAssignment::new(inventory_id, manager_id);
        let audit = AuditRecorder::for_assignment(&assignment, AuditAction::Unassign, actor)?;

        self.store
            .delete_assignment(AssignmentWrite { assignment, audit })
            .await?;
        info!(inventory_id = %inventory_id, manager_id = %manager_id, "manager unassigned");

        self.refresh().await?;
        Ok(assignment)
    }

    /// Reload the cache from the store.
    pub async fn refresh(&self) -> LedgerResult<()> {
        let assignments = self
            .store
            .list_assignments()
            .await
            .map_err(LedgerError::from)?;
        let rebuilt = AssignmentCache::build(&assignments);

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        *cache = rebuilt;
        debug!(assignments = assignments.len(), "assignment cache refreshed");
        Ok(())
    }
}
