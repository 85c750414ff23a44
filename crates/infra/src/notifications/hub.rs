//! In-process push hub backing the SSE endpoint.
//!
//! Each registered client owns a bounded tokio channel. The hub holds the
//! sending halves; the receiving half is wrapped in a `ClientStream` that
//! removes its registration when dropped (client disconnect).

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::Stream;
use tracing::debug;
use uuid::Uuid;

use stockledger_auth::Role;
use stockledger_core::UserId;
use stockledger_inventory::Notification;

use super::transport::{ClientConnection, PushTransport, TransportError};

#[derive(Debug)]
struct Client {
    connection: ClientConnection,
    tx: mpsc::Sender<Notification>,
}

#[derive(Debug)]
struct HubState {
    open: bool,
    clients: HashMap<Uuid, Client>,
}

#[derive(Debug)]
pub struct ClientHub {
    state: Mutex<HubState>,
    capacity: usize,
}

impl ClientHub {
    /// `capacity` bounds the undelivered notifications buffered per client.
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HubState {
                open: true,
                clients: HashMap::new(),
            }),
            capacity: capacity.max(1),
        })
    }

    pub fn register(self: &Arc<Self>, user_id: UserId, role: Role) -> Result<ClientStream, TransportError> {
        let mut state = self.lock();
        if !state.open {
            return Err(TransportError::Unavailable("hub is closed".to_string()));
        }

        let (tx, rx) = mpsc::channel(self.capacity);
        let connection = ClientConnection {
            connection_id: Uuid::now_v7(),
            user_id,
            role,
        };
        state
            .clients
            .insert(connection.connection_id, Client { connection, tx });
        debug!(connection_id = %connection.connection_id, user_id = %user_id, role = %role, "client connected");

        Ok(ClientStream {
            connection,
            rx,
            hub: Arc::downgrade(self),
        })
    }

    pub fn connection_count(&self) -> usize {
        self.lock().clients.len()
    }

    /// Drop every client and refuse further registrations and sends.
    pub fn close(&self) {
        let mut state = self.lock();
        state.open = false;
        state.clients.clear();
    }

    fn unregister(&self, connection_id: Uuid) {
        if self.lock().clients.remove(&connection_id).is_some() {
            debug!(connection_id = %connection_id, "client disconnected");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PushTransport for ClientHub {
    fn connections(&self) -> Result<Vec<ClientConnection>, TransportError> {
        let state = self.lock();
        if !state.open {
            return Err(TransportError::Unavailable("hub is closed".to_string()));
        }
        Ok(state.clients.values().map(|c| c.connection).collect())
    }

    fn send_to(&self, connection_id: Uuid, notification: &Notification) -> Result<(), TransportError> {
        let mut state = self.lock();
        if !state.open {
            return Err(TransportError::Unavailable("hub is closed".to_string()));
        }
        let client = state
            .clients
            .get(&connection_id)
            .ok_or(TransportError::ConnectionClosed(connection_id))?;

        match client.tx.try_send(notification.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(TransportError::Lagging(connection_id)),
            Err(TrySendError::Closed(_)) => {
                state.clients.remove(&connection_id);
                Err(TransportError::ConnectionClosed(connection_id))
            }
        }
    }

    /// Best effort: closed or lagging connections are skipped, not reported.
    fn send_to_all(&self, notification: &Notification) -> Result<usize, TransportError> {
        let ids: Vec<Uuid> = self.connections()?.iter().map(|c| c.connection_id).collect();
        Ok(ids
            .into_iter()
            .filter(|id| self.send_to(*id, notification).is_ok())
            .count())
    }
}

/// Receiving half of one client registration.
#[derive(Debug)]
pub struct ClientStream {
    connection: ClientConnection,
    rx: mpsc::Receiver<Notification>,
    hub: Weak<ClientHub>,
}

impl ClientStream {
    pub fn connection(&self) -> ClientConnection {
        self.connection
    }

    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }
}

impl Stream for ClientStream {
    type Item = Notification;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for ClientStream {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unregister(self.connection.connection_id);
        }
    }
}
