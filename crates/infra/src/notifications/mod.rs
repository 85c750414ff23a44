//! Low-stock notification fan-out.

pub mod dispatcher;
pub mod hub;
pub mod transport;

pub use dispatcher::{DispatchOutcome, NotificationDispatcher};
pub use hub::{ClientHub, ClientStream};
pub use transport::{ClientConnection, PushTransport, TransportError};
