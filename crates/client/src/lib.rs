//! `stockledger-client`
//!
//! Receiving side of the notification channel:
//! - `feed`: reads the server's SSE stream into `Notification`s
//! - `notification_store`: decides which notifications the viewer keeps and
//!   mirrors them into the session slot
//! - `assignments`: the membership query managers use to vet alerts
//!
//! The server stays the authority; everything here is per-session state.

pub mod assignments;
pub mod error;
pub mod feed;
pub mod notification_store;
pub mod session;

pub use assignments::{AssignmentQuery, HttpAssignmentQuery};
pub use error::ClientError;
pub use feed::{NotificationFeed, SseParser};
pub use notification_store::ClientNotificationStore;
pub use session::{MemorySessionStorage, NOTIFICATIONS_SLOT, SessionStorage};
