//! Stock mutation pipeline.
//!
//! ```text
//! StockCommand
//!   ↓
//! 1. Validate arguments (no IO)
//!   ↓
//! 2. Read the current entry
//!   ↓
//! 3. Decide the change (pure)
//!   ↓
//! 4. Commit entry + audit record (CAS on version, one unit of work)
//!   ↓
//! 5. Publish a MutationEvent (best-effort)
//! ```
//!
//! A `Conflict` at step 4 sends the command back to step 2, up to
//! `max_conflict_retries` times. Steps 4 and 5 run on a detached task: once a
//! commit has started, dropping the caller's future does not abort it.

use std::sync::Arc;

use tracing::{info, warn};

use stockledger_core::{InventoryId, LedgerError, LedgerResult, ProductId, UserId};
use stockledger_events::EventBus;
use stockledger_inventory::{MutationEvent, StockChange, StockCommand, StockEntry, StockKey};

use crate::audit::{AuditEntryRequest, AuditRecorder};
use crate::ledger_store::{LedgerStore, StockWrite};

pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 5;

/// The only writer of stock quantities.
pub struct StockLedger<S: ?Sized, B> {
    store: Arc<S>,
    bus: B,
    max_conflict_retries: u32,
}

impl<S: ?Sized, B> StockLedger<S, B> {
    pub fn new(store: Arc<S>, bus: B) -> Self {
        Self {
            store,
            bus,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

impl<S, B> StockLedger<S, B>
where
    S: LedgerStore + ?Sized + 'static,
    B: EventBus<MutationEvent> + Clone + 'static,
{
    pub async fn link(
        &self,
        key: StockKey,
        quantity: i64,
        min_stock_quantity: i64,
        actor: Option<UserId>,
    ) -> LedgerResult<StockEntry> {
        self.execute(
            key,
            StockCommand::Link {
                quantity,
                min_stock_quantity,
            },
            actor,
        )
        .await
    }

    pub async fn increase(&self, key: StockKey, delta: i64, actor: Option<UserId>) -> LedgerResult<StockEntry> {
        self.execute(key, StockCommand::Increase { delta }, actor).await
    }

    pub async fn decrease(&self, key: StockKey, delta: i64, actor: Option<UserId>) -> LedgerResult<StockEntry> {
        self.execute(key, StockCommand::Decrease { delta }, actor).await
    }

    pub async fn set_quantity(&self, key: StockKey, quantity: i64, actor: Option<UserId>) -> LedgerResult<StockEntry> {
        self.execute(key, StockCommand::Set { quantity }, actor).await
    }

    pub async fn update_min_stock(
        &self,
        key: StockKey,
        min_stock_quantity: i64,
        actor: Option<UserId>,
    ) -> LedgerResult<StockEntry> {
        self.execute(key, StockCommand::UpdateMinStock { min_stock_quantity }, actor)
            .await
    }

    /// Returns the removed entry.
    pub async fn unlink(&self, key: StockKey, actor: Option<UserId>) -> LedgerResult<StockEntry> {
        self.execute(key, StockCommand::Unlink, actor).await
    }

    pub async fn get(&self, key: StockKey) -> LedgerResult<StockEntry> {
        self.store
            .get_stock_entry(key)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("{key} is not linked")))
    }

    pub async fn list_inventory(&self, inventory_id: InventoryId) -> LedgerResult<Vec<StockEntry>> {
        Ok(self.store.list_stock_entries(inventory_id).await?)
    }

    /// Run `command` against the entry at `key`.
    ///
    /// Returns the post-mutation entry, or the removed entry for an unlink.
    pub async fn execute(
        &self,
        key: StockKey,
        command: StockCommand,
        actor: Option<UserId>,
    ) -> LedgerResult<StockEntry> {
        command.validate()?;
        if matches!(command, StockCommand::Link { .. }) {
            self.ensure_in_catalog(key.inventory_id, key.product_id).await?;
        }

        let mut attempt: u32 = 0;
        loop {
            let current = self.store.get_stock_entry(key).await?;
            let change = command.decide(key, current.as_ref())?;
            let audit = AuditRecorder::for_stock_change(&change, actor)?;

            match self.commit(change, audit, actor).await {
                Err(LedgerError::Conflict(reason)) if attempt < self.max_conflict_retries => {
                    attempt += 1;
                    warn!(%key, attempt, %reason, "stock write lost a version race; retrying");
                    tokio::task::yield_now().await;
                }
                Err(LedgerError::Conflict(reason)) => {
                    return Err(LedgerError::conflict(format!(
                        "{key}: gave up after {} retries ({reason})",
                        self.max_conflict_retries
                    )));
                }
                other => return other,
            }
        }
    }

    async fn ensure_in_catalog(&self, inventory_id: InventoryId, product_id: ProductId) -> LedgerResult<()> {
        if self.store.inventory_label(inventory_id).await?.is_none() {
            return Err(LedgerError::not_found(format!("inventory {inventory_id}")));
        }
        if self.store.product_label(product_id).await?.is_none() {
            return Err(LedgerError::not_found(format!("product {product_id}")));
        }
        Ok(())
    }

    async fn commit(
        &self,
        change: StockChange,
        audit: AuditEntryRequest,
        actor: Option<UserId>,
    ) -> LedgerResult<StockEntry> {
        let store = Arc::clone(&self.store);
        let bus = self.bus.clone();

        let task = tokio::spawn(async move {
            let committed = store
                .commit_stock(StockWrite {
                    change: change.clone(),
                    audit,
                })
                .await?;

            let key = change.key;
            let result = change
                .after
                .clone()
                .or_else(|| change.before.clone())
                .ok_or_else(|| LedgerError::storage(format!("{key}: committed change carries no entry")));

            info!(
                %key,
                kind = ?change.kind,
                audit_log_id = committed.audit.audit_log_id,
                quantity = ?committed.entry.as_ref().map(|e| e.quantity),
                "stock mutation committed"
            );

            let event = MutationEvent::from_change(
                change,
                actor,
                committed.audit.audit_log_id,
                committed.audit.timestamp,
            );
            if let Err(err) = bus.publish(event) {
                warn!(%key, error = ?err, "mutation event not published");
            }

            result
        });

        match task.await {
            Ok(result) => result,
            Err(join_err) => Err(LedgerError::storage(format!("commit task failed: {join_err}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger_store::{AuditQuery, InMemoryLedgerStore};
    use stockledger_events::InMemoryEventBus;
    use stockledger_inventory::{InventoryLabel, ProductLabel};

    type Ledger = StockLedger<InMemoryLedgerStore, Arc<InMemoryEventBus<MutationEvent>>>;

    fn key() -> StockKey {
        StockKey::new(InventoryId::new(1), ProductId::new(7))
    }

    fn setup() -> (Ledger, Arc<InMemoryEventBus<MutationEvent>>) {
        let store = Arc::new(InMemoryLedgerStore::new());
        store
            .register_product(ProductId::new(7), ProductLabel::new("SKU-7", "Widget"))
            .unwrap();
        store
            .register_inventory(InventoryId::new(1), InventoryLabel::new("Main"))
            .unwrap();
        let bus = Arc::new(InMemoryEventBus::new());
        (StockLedger::new(store, Arc::clone(&bus)), bus)
    }

    #[tokio::test]
    async fn link_then_mutate_returns_post_state() {
        let (ledger, _bus) = setup();
        let entry = ledger.link(key(), 20, 5, None).await.unwrap();
        assert_eq!((entry.quantity, entry.version), (20, 1));

        let entry = ledger.decrease(key(), 16, None).await.unwrap();
        assert_eq!((entry.quantity, entry.version), (4, 2));

        let entry = ledger.set_quantity(key(), 9, None).await.unwrap();
        assert_eq!(entry.quantity, 9);

        let entry = ledger.update_min_stock(key(), 10, None).await.unwrap();
        assert_eq!(entry.min_stock_quantity, 10);
        assert!(entry.is_low());
    }

    #[tokio::test]
    async fn each_mutation_writes_one_audit_record_and_one_event() {
        let (ledger, bus) = setup();
        let sub = bus.subscribe();

        ledger.link(key(), 10, 0, Some(UserId::new(1))).await.unwrap();
        ledger.increase(key(), 5, Some(UserId::new(1))).await.unwrap();
        let _ = ledger.decrease(key(), 100, Some(UserId::new(1))).await.unwrap_err();

        let audit = ledger.store().query_audit(&AuditQuery::default()).await.unwrap();
        assert_eq!(audit.len(), 2);

        let first = sub.try_recv().unwrap();
        let second = sub.try_recv().unwrap();
        assert!(sub.try_recv().is_err());
        assert_eq!(first.audit_log_id, 1);
        assert_eq!(second.after.unwrap().quantity, 15);
    }

    #[tokio::test]
    async fn rejected_decrease_leaves_quantity_unchanged() {
        let (ledger, _bus) = setup();
        ledger.link(key(), 3, 0, None).await.unwrap();

        let err = ledger.decrease(key(), 5, None).await.unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientStock {
                available: 3,
                requested: 5
            }
        );
        assert_eq!(ledger.get(key()).await.unwrap().quantity, 3);
    }

    #[tokio::test]
    async fn link_of_unknown_product_is_not_found() {
        let (ledger, _bus) = setup();
        let err = ledger
            .link(StockKey::new(InventoryId::new(1), ProductId::new(99)), 1, 0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[tokio::test]
    async fn unlink_returns_removed_entry() {
        let (ledger, _bus) = setup();
        ledger.link(key(), 4, 1, None).await.unwrap();

        let removed = ledger.unlink(key(), None).await.unwrap();
        assert_eq!(removed.quantity, 4);
        assert!(matches!(ledger.get(key()).await, Err(LedgerError::NotFound(_))));
    }

    #[tokio::test]
    async fn invalid_arguments_are_rejected_before_any_read() {
        let (ledger, _bus) = setup();
        let err = ledger.increase(key(), 0, None).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));
        let err = ledger.link(key(), -1, 0, None).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));
    }
}
