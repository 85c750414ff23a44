use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockledger_core::UserId;
use stockledger_events::Event;

use crate::entry::{MutationKind, StockChange, StockEntry, StockKey, StockLevel};

/// Published after a stock mutation committed (entry write + audit record).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationEvent {
    pub event_id: Uuid,
    pub key: StockKey,
    pub kind: MutationKind,
    pub actor: Option<UserId>,
    pub before: Option<StockEntry>,
    pub after: Option<StockEntry>,
    /// Audit record written in the same unit of work.
    pub audit_log_id: i64,
    pub occurred_at: DateTime<Utc>,
}

impl MutationEvent {
    pub fn from_change(
        change: StockChange,
        actor: Option<UserId>,
        audit_log_id: i64,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            key: change.key,
            kind: change.kind,
            actor,
            before: change.before,
            after: change.after,
            audit_log_id,
            occurred_at,
        }
    }

    /// Level the entry was left in (`None` once unlinked).
    pub fn level_after(&self) -> Option<StockLevel> {
        self.after.as_ref().map(StockEntry::level)
    }

    pub fn level_before(&self) -> Option<StockLevel> {
        self.before.as_ref().map(StockEntry::level)
    }
}

impl Event for MutationEvent {
    fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
