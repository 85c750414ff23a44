//! Viewer-side notification list.
//!
//! The server already routes by role, but the client re-checks every
//! notification against its own viewer before keeping it:
//!
//! - admins keep every inventory alert
//! - managers keep an inventory alert only if the assignment query confirms
//!   they manage that inventory; a failed query rejects the alert
//! - plain users never keep inventory alerts
//! - account notices are kept by their target user; untargeted ones by admins
//!
//! The list is newest first and deduplicated by notification id. Every change
//! is written to the session slot first and only then applied in memory, so a
//! failed write leaves both sides as they were.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use stockledger_auth::{Principal, Role};
use stockledger_inventory::Notification;

use crate::assignments::AssignmentQuery;
use crate::session::{NOTIFICATIONS_SLOT, SessionStorage};
use crate::ClientError;

pub struct ClientNotificationStore<Q: ?Sized, S> {
    viewer: Principal,
    assignments: Arc<Q>,
    session: S,
    items: Vec<Notification>,
}

impl<Q, S> ClientNotificationStore<Q, S>
where
    Q: AssignmentQuery + ?Sized,
    S: SessionStorage,
{
    /// Empty store; the session slot is left untouched until the first change.
    pub fn new(viewer: Principal, assignments: Arc<Q>, session: S) -> Self {
        Self {
            viewer,
            assignments,
            session,
            items: Vec::new(),
        }
    }

    /// Rebuild the list from the session slot (page reload).
    ///
    /// A missing slot gives an empty list; a corrupt one is discarded.
    pub fn restore(viewer: Principal, assignments: Arc<Q>, session: S) -> Result<Self, ClientError> {
        let items = match session.get(NOTIFICATIONS_SLOT)? {
            None => Vec::new(),
            Some(raw) => serde_json::from_str::<Vec<Notification>>(&raw).unwrap_or_else(|err| {
                warn!(error = %err, "discarding unreadable notification slot");
                Vec::new()
            }),
        };
        Ok(Self {
            viewer,
            assignments,
            session,
            items,
        })
    }

    pub fn viewer(&self) -> Principal {
        self.viewer
    }

    /// Newest first.
    pub fn notifications(&self) -> &[Notification] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Offer an incoming notification. Returns whether it was kept.
    pub async fn receive(&mut self, notification: Notification) -> Result<bool, ClientError> {
        let id = notification.id();
        if self.items.iter().any(|n| n.id() == id) {
            debug!(notification_id = %id, "duplicate notification ignored");
            return Ok(false);
        }
        if !self.accepts(&notification).await {
            debug!(notification_id = %id, viewer = %self.viewer.user_id, "notification rejected for viewer");
            return Ok(false);
        }

        let mut next = Vec::with_capacity(self.items.len() + 1);
        next.push(notification);
        next.extend(self.items.iter().cloned());
        self.commit(next)?;
        Ok(true)
    }

    /// Drop one notification. Returns whether it was present.
    pub fn remove(&mut self, id: Uuid) -> Result<bool, ClientError> {
        if !self.items.iter().any(|n| n.id() == id) {
            return Ok(false);
        }
        let next = self.items.iter().filter(|n| n.id() != id).cloned().collect();
        self.commit(next)?;
        Ok(true)
    }

    pub fn clear(&mut self) -> Result<(), ClientError> {
        self.commit(Vec::new())
    }

    async fn accepts(&self, notification: &Notification) -> bool {
        let Some(inventory_id) = notification.inventory_id() else {
            return match notification.target_user() {
                Some(target) => target == self.viewer.user_id,
                None => self.viewer.role == Role::Admin,
            };
        };

        match self.viewer.role {
            Role::Admin => true,
            Role::User => false,
            Role::Manager => match self.assignments.my_inventories().await {
                Ok(inventories) => inventories.contains(&inventory_id),
                Err(err) => {
                    warn!(inventory_id = %inventory_id, error = %err, "assignment check failed; alert rejected");
                    false
                }
            },
        }
    }

    /// Write `next` to the slot, then adopt it. On failure the list is unchanged.
    fn commit(&mut self, next: Vec<Notification>) -> Result<(), ClientError> {
        let raw = serde_json::to_string(&next)?;
        self.session.set(NOTIFICATIONS_SLOT, raw)?;
        self.items = next;
        Ok(())
    }
}
