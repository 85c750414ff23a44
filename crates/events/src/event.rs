use chrono::{DateTime, Utc};

/// A domain-agnostic event.
///
/// Events are immutable facts about something that already committed.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "inventory.stock.decreased").
    fn event_type(&self) -> &'static str;

    /// When the event occurred (commit time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
