//! Integration tests for the full mutation pipeline.
//!
//! Tests: StockLedger → LedgerStore (+ audit) → EventBus → notification worker → ClientHub
//!
//! Verifies:
//! - Concurrent writers on one entry serialize through the version check
//! - Audit records exist iff the mutation committed
//! - Alerts reach admins and assigned managers only
//! - Notification failures never fail a mutation

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::runtime::Handle;

    use stockledger_auth::Role;
    use stockledger_core::{InventoryId, LedgerError, ProductId, UserId};
    use stockledger_events::{EventBus, InMemoryEventBus};
    use stockledger_inventory::{
        InventoryLabel, ManagerAssignment, MutationEvent, Notification, ProductLabel, StockCommand,
        StockEntry, StockKey,
    };

    use crate::assignment_registry::AssignmentRegistry;
    use crate::audit::{AuditRecord, AuditRecorder, STOCK_TABLE};
    use crate::config::AlertPolicy;
    use crate::ledger_store::{
        AssignmentWrite, AuditQuery, CommittedStock, InMemoryLedgerStore, LedgerStore, StockWrite,
        StoreError,
    };
    use crate::notifications::{ClientHub, ClientStream, NotificationDispatcher};
    use crate::stock_ledger::StockLedger;
    use crate::workers::{EventWorker, WorkerHandle};

    type Bus = Arc<InMemoryEventBus<MutationEvent>>;

    fn bus() -> Bus {
        Arc::new(InMemoryEventBus::new())
    }

    fn main_inventory() -> InventoryId {
        InventoryId::new(1)
    }

    fn overflow_inventory() -> InventoryId {
        InventoryId::new(2)
    }

    fn widget() -> ProductId {
        ProductId::new(7)
    }

    fn seeded_store() -> InMemoryLedgerStore {
        let store = InMemoryLedgerStore::new();
        store
            .register_product(widget(), ProductLabel::new("SKU-7", "Widget"))
            .unwrap();
        store
            .register_inventory(main_inventory(), InventoryLabel::new("Main"))
            .unwrap();
        store
            .register_inventory(overflow_inventory(), InventoryLabel::new("Overflow"))
            .unwrap();
        store
    }

    /// How `ScriptedStore` interferes with `commit_stock`.
    #[derive(Debug, Clone, Copy)]
    enum Script {
        /// Every commit loses the version race.
        AlwaysConflict,
        /// A competing +1 commits just before the first write.
        RaceOnce,
        /// The audit record is corrupted so the store rejects it.
        CorruptAudit,
        /// Commits take a while.
        Slow(Duration),
    }

    struct ScriptedStore {
        inner: InMemoryLedgerStore,
        script: Script,
        commits: AtomicU32,
        raced: AtomicBool,
    }

    impl ScriptedStore {
        fn new(script: Script) -> Self {
            Self {
                inner: seeded_store(),
                script,
                commits: AtomicU32::new(0),
                raced: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl LedgerStore for ScriptedStore {
        async fn get_stock_entry(&self, key: StockKey) -> Result<Option<StockEntry>, StoreError> {
            self.inner.get_stock_entry(key).await
        }

        async fn list_stock_entries(&self, inventory_id: InventoryId) -> Result<Vec<StockEntry>, StoreError> {
            self.inner.list_stock_entries(inventory_id).await
        }

        async fn commit_stock(&self, mut write: StockWrite) -> Result<CommittedStock, StoreError> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            match self.script {
                Script::AlwaysConflict if write.change.before.is_some() => {
                    return Err(StoreError::Conflict("scripted".to_string()));
                }
                Script::AlwaysConflict => {}
                Script::RaceOnce => {
                    if write.change.before.is_some() && !self.raced.swap(true, Ordering::SeqCst) {
                        let key = write.change.key;
                        let current = self.inner.get_stock_entry(key).await?;
                        let change = StockCommand::Increase { delta: 1 }
                            .decide(key, current.as_ref())
                            .unwrap();
                        let audit = AuditRecorder::for_stock_change(&change, None).unwrap();
                        self.inner.commit_stock(StockWrite { change, audit }).await?;
                    }
                }
                Script::CorruptAudit => write.audit.table_name.clear(),
                Script::Slow(delay) => tokio::time::sleep(delay).await,
            }
            self.inner.commit_stock(write).await
        }

        async fn list_assignments(&self) -> Result<Vec<ManagerAssignment>, StoreError> {
            self.inner.list_assignments().await
        }

        async fn insert_assignment(&self, write: AssignmentWrite) -> Result<AuditRecord, StoreError> {
            self.inner.insert_assignment(write).await
        }

        async fn delete_assignment(&self, write: AssignmentWrite) -> Result<AuditRecord, StoreError> {
            self.inner.delete_assignment(write).await
        }

        async fn query_audit(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, StoreError> {
            self.inner.query_audit(query).await
        }

        async fn product_label(&self, product_id: ProductId) -> Result<Option<ProductLabel>, StoreError> {
            self.inner.product_label(product_id).await
        }

        async fn inventory_label(&self, inventory_id: InventoryId) -> Result<Option<InventoryLabel>, StoreError> {
            self.inner.inventory_label(inventory_id).await
        }
    }

    struct Pipeline {
        ledger: Arc<StockLedger<InMemoryLedgerStore, Bus>>,
        registry: Arc<AssignmentRegistry<InMemoryLedgerStore>>,
        hub: Arc<ClientHub>,
        worker: WorkerHandle,
    }

    fn pipeline(policy: AlertPolicy) -> Pipeline {
        let store = Arc::new(seeded_store());
        let bus = bus();
        let registry = Arc::new(AssignmentRegistry::new(Arc::clone(&store)));
        let hub = ClientHub::new(16);
        let dispatcher = Arc::new(NotificationDispatcher::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&hub),
            policy,
            Handle::current(),
        ));
        let worker = EventWorker::spawn_notifications(&bus, dispatcher).unwrap();
        let ledger = Arc::new(StockLedger::new(store, bus));

        Pipeline {
            ledger,
            registry,
            hub,
            worker,
        }
    }

    fn key(inventory_id: InventoryId) -> StockKey {
        StockKey::new(inventory_id, widget())
    }

    async fn next_alert(stream: &mut ClientStream) -> Option<Notification> {
        tokio::time::timeout(Duration::from_secs(2), stream.recv())
            .await
            .ok()
            .flatten()
    }

    async fn stock_audit<S: LedgerStore + ?Sized>(store: &S, key: StockKey) -> Vec<AuditRecord> {
        store
            .query_audit(&AuditQuery::for_record(STOCK_TABLE, key.record_id()))
            .await
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increase_and_decrease_both_apply() {
        let store = Arc::new(seeded_store());
        let ledger = Arc::new(StockLedger::new(store, bus()));
        let k = key(main_inventory());
        ledger.link(k, 10, 0, None).await.unwrap();

        let (a, b) = tokio::join!(
            {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move { ledger.increase(k, 5, None).await })
            },
            {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move { ledger.decrease(k, 3, None).await })
            }
        );
        a.unwrap().unwrap();
        b.unwrap().unwrap();

        let entry = ledger.get(k).await.unwrap();
        assert_eq!(entry.quantity, 12);
        assert_eq!(entry.version, 3);
        assert_eq!(stock_audit(ledger.store().as_ref(), k).await.len(), 3);
    }

    #[tokio::test]
    async fn lost_version_race_is_retried_against_fresh_state() {
        let store = Arc::new(ScriptedStore::new(Script::RaceOnce));
        let ledger = StockLedger::new(Arc::clone(&store), bus());
        let k = key(main_inventory());
        ledger.link(k, 10, 0, None).await.unwrap();

        let entry = ledger.decrease(k, 4, None).await.unwrap();

        // 10 + 1 (competing write) - 4
        assert_eq!(entry.quantity, 7);
        assert_eq!(entry.version, 4);
        // link, first (conflicting) attempt, retry
        assert_eq!(store.commits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn conflict_surfaces_after_retry_budget() {
        let store = Arc::new(ScriptedStore::new(Script::AlwaysConflict));
        let ledger = StockLedger::new(Arc::clone(&store), bus())
            .with_max_conflict_retries(2);
        let k = key(main_inventory());
        ledger.link(k, 10, 0, None).await.unwrap();

        let err = ledger.increase(k, 1, None).await.unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
        // link + 1 attempt + 2 retries
        assert_eq!(store.commits.load(Ordering::SeqCst), 4);
        assert_eq!(ledger.get(k).await.unwrap().quantity, 10);
    }

    #[tokio::test]
    async fn failed_audit_write_rolls_back_the_mutation() {
        let store = Arc::new(ScriptedStore::new(Script::CorruptAudit));
        let ledger = StockLedger::new(Arc::clone(&store), bus());
        let k = key(main_inventory());

        let err = ledger.link(k, 10, 0, None).await.unwrap_err();
        assert!(matches!(err, LedgerError::Storage(_)));
        assert!(matches!(ledger.get(k).await, Err(LedgerError::NotFound(_))));
        assert!(stock_audit(store.as_ref(), k).await.is_empty());
    }

    #[tokio::test]
    async fn unlink_of_absent_pair_is_not_found_without_audit() {
        let store = Arc::new(seeded_store());
        let ledger = StockLedger::new(Arc::clone(&store), bus());
        let k = key(main_inventory());

        let err = ledger.unlink(k, Some(UserId::new(1))).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
        assert!(stock_audit(store.as_ref(), k).await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn commit_completes_when_caller_is_cancelled() {
        let store = Arc::new(ScriptedStore::new(Script::Slow(Duration::from_millis(200))));
        let bus = bus();
        let ledger = Arc::new(StockLedger::new(Arc::clone(&store), Arc::clone(&bus)));
        let k = key(main_inventory());
        ledger.link(k, 10, 0, None).await.unwrap();
        let sub = bus.subscribe();

        let caller = {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.increase(k, 5, None).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(ledger.get(k).await.unwrap().quantity, 15);
        assert_eq!(stock_audit(store.as_ref(), k).await.len(), 2);
        assert!(sub.try_recv().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn alerts_reach_admin_and_assigned_manager_only() {
        let p = pipeline(AlertPolicy::EveryMutation);
        let (manager_a, manager_b) = (UserId::new(10), UserId::new(11));
        p.registry.assign(main_inventory(), manager_a, None).await.unwrap();
        p.registry.assign(overflow_inventory(), manager_b, None).await.unwrap();

        let mut admin = p.hub.register(UserId::new(1), Role::Admin).unwrap();
        let mut a = p.hub.register(manager_a, Role::Manager).unwrap();
        let mut b = p.hub.register(manager_b, Role::Manager).unwrap();
        let mut user = p.hub.register(UserId::new(99), Role::User).unwrap();

        let k = key(main_inventory());
        p.ledger.link(k, 20, 5, Some(UserId::new(1))).await.unwrap();
        p.ledger.decrease(k, 16, Some(UserId::new(1))).await.unwrap();

        let Some(Notification::LowStock(alert)) = next_alert(&mut a).await else {
            panic!("assigned manager should receive the alert");
        };
        assert_eq!(alert.inventory_id, main_inventory());
        assert_eq!(alert.current_quantity, 4);
        assert_eq!(alert.min_stock_quantity, 5);

        let Some(Notification::LowStock(admin_alert)) = next_alert(&mut admin).await else {
            panic!("admin should receive the alert");
        };
        assert_eq!(admin_alert.alert_id, alert.alert_id);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(b.try_recv().is_none());
        assert!(user.try_recv().is_none());

        p.worker.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn alert_scenario_announces_twice() {
        let p = pipeline(AlertPolicy::EveryMutation);
        let mut admin = p.hub.register(UserId::new(1), Role::Admin).unwrap();
        let k = key(main_inventory());

        p.ledger.link(k, 20, 5, None).await.unwrap();
        p.ledger.decrease(k, 16, None).await.unwrap();
        p.ledger.increase(k, 10, None).await.unwrap();
        p.ledger.decrease(k, 9, None).await.unwrap();

        let first = next_alert(&mut admin).await.expect("first alert");
        let Some(Notification::LowStock(second)) = next_alert(&mut admin).await else {
            panic!("second alert expected");
        };
        assert_ne!(first.id(), second.alert_id);
        // Exactly at the threshold still counts as low.
        assert_eq!(second.current_quantity, 5);
        assert_eq!(second.min_stock_quantity, 5);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(admin.try_recv().is_none());

        p.worker.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unavailable_transport_does_not_fail_mutations() {
        let p = pipeline(AlertPolicy::EveryMutation);
        p.hub.close();
        let k = key(main_inventory());

        p.ledger.link(k, 20, 5, None).await.unwrap();
        let entry = p.ledger.decrease(k, 19, None).await.unwrap();

        assert_eq!(entry.quantity, 1);
        assert_eq!(stock_audit(p.ledger.store().as_ref(), k).await.len(), 2);

        p.worker.shutdown();
    }
}
