//! Low-stock detection and audience routing.
//!
//! Consumes committed `MutationEvent`s, decides whether the entry is (newly)
//! low according to the configured `AlertPolicy`, and fans the alert out:
//!
//! - inventory-scoped alerts go to every connected admin and to connected
//!   managers assigned to the inventory at delivery time
//! - account notices go to the named user, or to every admin when unnamed
//! - plain users never receive inventory-scoped alerts
//!
//! Delivery is at-most-once per connection per publish.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;
use tracing::{debug, warn};

use stockledger_auth::Role;
use stockledger_core::{LedgerError, LedgerResult, UserId};
use stockledger_inventory::{
    AccountNotice, LowStockAlert, MutationEvent, Notification, StockKey, StockLevel,
};

use super::transport::{ClientConnection, PushTransport, TransportError};
use crate::assignment_registry::AssignmentRegistry;
use crate::config::AlertPolicy;
use crate::ledger_store::LedgerStore;

/// What the dispatcher did with one mutation event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No alert condition (or suppressed by the policy).
    Skipped,
    /// Alert published; `delivered` connections had it queued.
    Published { delivered: usize },
}

pub struct NotificationDispatcher<S: ?Sized, T: ?Sized> {
    store: Arc<S>,
    registry: Arc<AssignmentRegistry<S>>,
    transport: Arc<T>,
    policy: AlertPolicy,
    runtime: Handle,
    /// Newest version seen per entry and the level it left the entry at.
    last_levels: Mutex<HashMap<StockKey, (u64, StockLevel)>>,
}

impl<S, T> NotificationDispatcher<S, T>
where
    S: LedgerStore + ?Sized,
    T: PushTransport + ?Sized,
{
    /// `runtime` drives the catalog label lookups from the worker thread.
    pub fn new(
        store: Arc<S>,
        registry: Arc<AssignmentRegistry<S>>,
        transport: Arc<T>,
        policy: AlertPolicy,
        runtime: Handle,
    ) -> Self {
        Self {
            store,
            registry,
            transport,
            policy,
            runtime,
            last_levels: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> AlertPolicy {
        self.policy
    }

    /// Handle one committed mutation.
    ///
    /// Blocking: must not be called from an async context.
    pub fn handle(&self, event: &MutationEvent) -> LedgerResult<DispatchOutcome> {
        if !self.should_alert(event) {
            return Ok(DispatchOutcome::Skipped);
        }
        let Some(entry) = event.after.as_ref() else {
            return Ok(DispatchOutcome::Skipped);
        };

        let (product, inventory) = self.runtime.block_on(async {
            let product = self.store.product_label(entry.product_id).await;
            let inventory = self.store.inventory_label(entry.inventory_id).await;
            (product, inventory)
        });
        let product = product?.ok_or_else(|| LedgerError::not_found(format!("product {}", entry.product_id)))?;
        let inventory =
            inventory?.ok_or_else(|| LedgerError::not_found(format!("inventory {}", entry.inventory_id)))?;

        let alert = LowStockAlert::new(entry, &product, &inventory, event.occurred_at);
        let delivered = self.publish(&Notification::LowStock(alert))?;
        Ok(DispatchOutcome::Published { delivered })
    }

    /// Send an account-level notice to `target_user`, or to all admins when `None`.
    pub fn notify_account(&self, target_user: Option<UserId>, message: impl Into<String>) -> LedgerResult<usize> {
        self.publish(&Notification::Account(AccountNotice::new(target_user, message)))
    }

    /// Route `notification` to every eligible connection.
    ///
    /// Per-connection failures are logged and skipped; only an unavailable
    /// transport is an error.
    pub fn publish(&self, notification: &Notification) -> LedgerResult<usize> {
        let connections = self.transport.connections()?;

        let mut delivered = 0;
        for conn in connections.iter().filter(|c| self.is_recipient(c, notification)) {
            match self.transport.send_to(conn.connection_id, notification) {
                Ok(()) => delivered += 1,
                Err(TransportError::Unavailable(reason)) => {
                    return Err(LedgerError::transport_unavailable(reason));
                }
                Err(err) => {
                    warn!(
                        connection_id = %conn.connection_id,
                        user_id = %conn.user_id,
                        error = %err,
                        "notification dropped for connection"
                    );
                }
            }
        }

        debug!(
            notification_id = %notification.id(),
            topic = notification.topic(),
            eligible_of = connections.len(),
            delivered,
            "notification routed"
        );
        Ok(delivered)
    }

    pub fn is_recipient(&self, conn: &ClientConnection, notification: &Notification) -> bool {
        match notification.inventory_id() {
            Some(inventory_id) => match conn.role {
                Role::Admin => true,
                Role::Manager => self.registry.is_assigned(conn.user_id, inventory_id),
                Role::User => false,
            },
            None => match notification.target_user() {
                Some(target) => conn.user_id == target,
                None => conn.role == Role::Admin,
            },
        }
    }

    /// Track the entry's level and decide whether this event announces it.
    ///
    /// Commits reach the bus in publish order, which can differ from commit
    /// order; an event no newer than the last one seen for its entry is stale
    /// and ignored.
    fn should_alert(&self, event: &MutationEvent) -> bool {
        let mut levels = self.last_levels.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(after) = event.after.as_ref() else {
            // Unlink: forget the entry, never announce. A relink restarts at version 1.
            levels.remove(&event.key);
            return false;
        };
        let level = after.level();
        if let Some(&(seen, _)) = levels.get(&event.key) {
            if after.version <= seen {
                debug!(
                    key = ?event.key,
                    version = after.version,
                    seen,
                    "stale mutation event ignored"
                );
                return false;
            }
        }
        let previous = levels
            .insert(event.key, (after.version, level))
            .map(|(_, level)| level)
            .or(event.level_before());

        if level != StockLevel::Low {
            return false;
        }
        match self.policy {
            AlertPolicy::EveryMutation => true,
            AlertPolicy::EdgeTriggered => previous != Some(StockLevel::Low),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger_store::InMemoryLedgerStore;
    use crate::notifications::ClientHub;
    use chrono::Utc;
    use stockledger_core::{InventoryId, ProductId};
    use stockledger_inventory::{InventoryLabel, ProductLabel, StockCommand, StockEntry};

    fn key() -> StockKey {
        StockKey::new(InventoryId::new(1), ProductId::new(7))
    }

    fn event(cmd: StockCommand, current: Option<&StockEntry>) -> MutationEvent {
        let change = cmd.decide(key(), current).unwrap();
        MutationEvent::from_change(change, None, 1, Utc::now())
    }

    fn dispatcher(
        policy: AlertPolicy,
    ) -> (
        NotificationDispatcher<InMemoryLedgerStore, ClientHub>,
        Arc<ClientHub>,
        tokio::runtime::Runtime,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let store = Arc::new(InMemoryLedgerStore::new());
        store
            .register_product(ProductId::new(7), ProductLabel::new("SKU-7", "Widget"))
            .unwrap();
        store
            .register_inventory(InventoryId::new(1), InventoryLabel::new("Main"))
            .unwrap();
        let registry = Arc::new(AssignmentRegistry::new(Arc::clone(&store)));
        let hub = ClientHub::new(16);
        let d = NotificationDispatcher::new(store, registry, Arc::clone(&hub), policy, rt.handle().clone());
        (d, hub, rt)
    }

    /// Link(20,5) -> Decrease(16) -> Increase(10) -> Decrease(9).
    fn scenario() -> Vec<MutationEvent> {
        let link = event(
            StockCommand::Link {
                quantity: 20,
                min_stock_quantity: 5,
            },
            None,
        );
        let after_link = link.after.clone();
        let dec = event(StockCommand::Decrease { delta: 16 }, after_link.as_ref());
        let after_dec = dec.after.clone();
        let inc = event(StockCommand::Increase { delta: 10 }, after_dec.as_ref());
        let after_inc = inc.after.clone();
        let dec2 = event(StockCommand::Decrease { delta: 9 }, after_inc.as_ref());
        vec![link, dec, inc, dec2]
    }

    #[test]
    fn alerts_on_mutations_that_leave_entry_low() {
        for policy in [AlertPolicy::EveryMutation, AlertPolicy::EdgeTriggered] {
            let (d, hub, _rt) = dispatcher(policy);
            let mut admin = hub.register(UserId::new(1), Role::Admin).unwrap();

            let outcomes: Vec<DispatchOutcome> = scenario().iter().map(|e| d.handle(e).unwrap()).collect();
            assert_eq!(
                outcomes,
                vec![
                    DispatchOutcome::Skipped,
                    DispatchOutcome::Published { delivered: 1 },
                    DispatchOutcome::Skipped,
                    DispatchOutcome::Published { delivered: 1 },
                ],
                "policy {policy:?}"
            );

            let Some(Notification::LowStock(alert)) = admin.try_recv() else {
                panic!("expected a low-stock alert");
            };
            assert_eq!(alert.current_quantity, 4);
            assert_eq!(alert.min_stock_quantity, 5);
            assert_eq!(alert.sku, "SKU-7");
            assert_eq!(alert.inventory_name, "Main");

            let Some(Notification::LowStock(at_threshold)) = admin.try_recv() else {
                panic!("expected a second low-stock alert");
            };
            assert_eq!(at_threshold.current_quantity, 5);
            assert_eq!(at_threshold.min_stock_quantity, 5);
            assert!(admin.try_recv().is_none());
        }
    }

    #[test]
    fn events_arriving_out_of_commit_order_are_ignored() {
        let (d, hub, _rt) = dispatcher(AlertPolicy::EdgeTriggered);
        let mut admin = hub.register(UserId::new(1), Role::Admin).unwrap();

        let link = event(
            StockCommand::Link {
                quantity: 10,
                min_stock_quantity: 5,
            },
            None,
        );
        let drop_low = event(StockCommand::Decrease { delta: 6 }, link.after.as_ref());
        let refill = event(StockCommand::Increase { delta: 10 }, drop_low.after.as_ref());
        let drop_again = event(StockCommand::Decrease { delta: 10 }, refill.after.as_ref());

        assert_eq!(d.handle(&link).unwrap(), DispatchOutcome::Skipped);
        // Refill (v3) is published before the earlier decrease (v2).
        assert_eq!(d.handle(&refill).unwrap(), DispatchOutcome::Skipped);
        assert_eq!(d.handle(&drop_low).unwrap(), DispatchOutcome::Skipped);
        assert!(admin.try_recv().is_none());

        // The next real OK -> LOW transition still announces.
        assert_eq!(
            d.handle(&drop_again).unwrap(),
            DispatchOutcome::Published { delivered: 1 }
        );
        let Some(Notification::LowStock(alert)) = admin.try_recv() else {
            panic!("expected a low-stock alert");
        };
        assert_eq!(alert.current_quantity, 4);
    }

    #[test]
    fn relink_after_unlink_is_tracked_afresh() {
        let (d, _hub, _rt) = dispatcher(AlertPolicy::EdgeTriggered);
        let link = event(
            StockCommand::Link {
                quantity: 10,
                min_stock_quantity: 5,
            },
            None,
        );
        let bump = event(StockCommand::Increase { delta: 1 }, link.after.as_ref());
        let unlink = event(StockCommand::Unlink, bump.after.as_ref());
        let relink = event(
            StockCommand::Link {
                quantity: 2,
                min_stock_quantity: 5,
            },
            None,
        );

        d.handle(&link).unwrap();
        d.handle(&bump).unwrap();
        assert_eq!(d.handle(&unlink).unwrap(), DispatchOutcome::Skipped);
        assert!(matches!(d.handle(&relink).unwrap(), DispatchOutcome::Published { .. }));
    }

    #[test]
    fn edge_triggered_suppresses_repeats_while_low() {
        let (every, _hub1, _rt1) = dispatcher(AlertPolicy::EveryMutation);
        let (edge, _hub2, _rt2) = dispatcher(AlertPolicy::EdgeTriggered);

        let link = event(
            StockCommand::Link {
                quantity: 4,
                min_stock_quantity: 5,
            },
            None,
        );
        let dec = event(StockCommand::Decrease { delta: 1 }, link.after.as_ref());

        assert!(matches!(every.handle(&link).unwrap(), DispatchOutcome::Published { .. }));
        assert!(matches!(every.handle(&dec).unwrap(), DispatchOutcome::Published { .. }));

        assert!(matches!(edge.handle(&link).unwrap(), DispatchOutcome::Published { .. }));
        assert_eq!(edge.handle(&dec).unwrap(), DispatchOutcome::Skipped);
    }

    #[test]
    fn unlink_never_alerts() {
        let (d, _hub, _rt) = dispatcher(AlertPolicy::EveryMutation);
        let link = event(
            StockCommand::Link {
                quantity: 1,
                min_stock_quantity: 5,
            },
            None,
        );
        let unlink = event(StockCommand::Unlink, link.after.as_ref());
        assert_eq!(d.handle(&unlink).unwrap(), DispatchOutcome::Skipped);
    }

    #[test]
    fn account_notices_go_to_target_or_admins() {
        let (d, hub, _rt) = dispatcher(AlertPolicy::EveryMutation);
        let mut admin = hub.register(UserId::new(1), Role::Admin).unwrap();
        let mut user = hub.register(UserId::new(2), Role::User).unwrap();

        assert_eq!(d.notify_account(Some(UserId::new(2)), "password changed").unwrap(), 1);
        assert!(user.try_recv().is_some());
        assert!(admin.try_recv().is_none());

        assert_eq!(d.notify_account(None, "new signup").unwrap(), 1);
        assert!(admin.try_recv().is_some());
        assert!(user.try_recv().is_none());
    }

    #[test]
    fn closed_transport_is_unavailable() {
        let (d, hub, _rt) = dispatcher(AlertPolicy::EveryMutation);
        hub.close();
        let err = d.notify_account(None, "x").unwrap_err();
        assert!(matches!(err, LedgerError::TransportUnavailable(_)));
    }
}
