use thiserror::Error;
use uuid::Uuid;

use stockledger_auth::Role;
use stockledger_core::{LedgerError, UserId};
use stockledger_inventory::Notification;

/// One live client subscription as seen by the push transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConnection {
    pub connection_id: Uuid,
    pub user_id: UserId,
    pub role: Role,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport as a whole cannot deliver anything.
    #[error("push transport unavailable: {0}")]
    Unavailable(String),

    /// The connection went away between listing and sending.
    #[error("connection {0} is closed")]
    ConnectionClosed(Uuid),

    /// The client is not draining its queue; the notification was dropped.
    #[error("connection {0} is not keeping up")]
    Lagging(Uuid),
}

impl From<TransportError> for LedgerError {
    fn from(value: TransportError) -> Self {
        LedgerError::TransportUnavailable(value.to_string())
    }
}

/// Publish/subscribe hub the dispatcher fans notifications out over.
///
/// Sends are fire-and-forget: a successful `send_to` means the notification
/// was queued for the connection, not that the client received it.
pub trait PushTransport: Send + Sync {
    fn connections(&self) -> Result<Vec<ClientConnection>, TransportError>;

    fn send_to(&self, connection_id: Uuid, notification: &Notification) -> Result<(), TransportError>;

    /// Broadcast to every open connection, ignoring roles.
    ///
    /// Alert routing never uses this; the dispatcher decides recipients and
    /// calls `send_to`. This is the boundary's primitive for pushes addressed
    /// to everyone. Returns the number of connections it was queued for.
    fn send_to_all(&self, notification: &Notification) -> Result<usize, TransportError>;
}
