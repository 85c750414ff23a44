//! Audit trail query parameters.
//!
//! Filters are conjunctive. Results are ordered by the requested field and
//! direction, with ties broken by `timestamp` then `audit_log_id` (ascending).

use std::cmp::Ordering;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{LedgerError, UserId};

use crate::audit::AuditRecord;

/// Upper bound on records returned by one query.
pub const MAX_AUDIT_LIMIT: u32 = 1000;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuditSortField {
    #[default]
    Timestamp,
    TableName,
    RecordId,
    ActorId,
    ActionType,
}

impl AuditSortField {
    /// Column name in the relational schema.
    pub fn column(&self) -> &'static str {
        match self {
            AuditSortField::Timestamp => "timestamp",
            AuditSortField::TableName => "table_name",
            AuditSortField::RecordId => "record_id",
            AuditSortField::ActorId => "actor_id",
            AuditSortField::ActionType => "action_type",
        }
    }
}

impl FromStr for AuditSortField {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "timestamp" => Ok(AuditSortField::Timestamp),
            "tableName" | "table_name" => Ok(AuditSortField::TableName),
            "recordId" | "record_id" => Ok(AuditSortField::RecordId),
            "actorId" | "actor_id" => Ok(AuditSortField::ActorId),
            "actionType" | "action_type" => Ok(AuditSortField::ActionType),
            other => Err(LedgerError::invalid_argument(format!(
                "cannot sort audit records by '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl FromStr for SortOrder {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(LedgerError::invalid_argument(format!(
                "sort order must be asc or desc, got '{other}'"
            ))),
        }
    }
}

/// Audit trail query. `from` is inclusive, `to` exclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditQuery {
    pub table_name: Option<String>,
    pub record_id: Option<String>,
    pub actor_id: Option<UserId>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub sort: AuditSortField,
    pub order: SortOrder,
    pub limit: Option<u32>,
}

impl AuditQuery {
    pub fn for_record(table_name: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self {
            table_name: Some(table_name.into()),
            record_id: Some(record_id.into()),
            ..Default::default()
        }
    }

    pub fn sorted_by(mut self, sort: AuditSortField, order: SortOrder) -> Self {
        self.sort = sort;
        self.order = order;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(MAX_AUDIT_LIMIT).min(MAX_AUDIT_LIMIT)
    }

    pub fn matches(&self, record: &AuditRecord) -> bool {
        self.table_name.as_ref().is_none_or(|t| &record.table_name == t)
            && self.record_id.as_ref().is_none_or(|r| &record.record_id == r)
            && self.actor_id.is_none_or(|a| record.actor_id == Some(a))
            && self.from.is_none_or(|from| record.timestamp >= from)
            && self.to.is_none_or(|to| record.timestamp < to)
    }

    /// Total order used by stores that sort in process.
    ///
    /// Absent actors sort before present ones in ascending order.
    pub fn compare(&self, a: &AuditRecord, b: &AuditRecord) -> Ordering {
        let primary = match self.sort {
            AuditSortField::Timestamp => a.timestamp.cmp(&b.timestamp),
            AuditSortField::TableName => a.table_name.cmp(&b.table_name),
            AuditSortField::RecordId => a.record_id.cmp(&b.record_id),
            AuditSortField::ActorId => a.actor_id.cmp(&b.actor_id),
            AuditSortField::ActionType => a.action_type.as_str().cmp(b.action_type.as_str()),
        };
        let primary = match self.order {
            SortOrder::Asc => primary,
            SortOrder::Desc => primary.reverse(),
        };

        primary
            .then_with(|| a.timestamp.cmp(&b.timestamp))
            .then_with(|| a.audit_log_id.cmp(&b.audit_log_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditAction;
    use chrono::TimeZone;

    fn record(id: i64, table: &str, actor: Option<i64>, secs: i64) -> AuditRecord {
        AuditRecord {
            audit_log_id: id,
            actor_id: actor.map(UserId::new),
            table_name: table.to_string(),
            record_id: format!("r{id}"),
            action_type: AuditAction::Update,
            old_value: None,
            new_value: None,
            changes: None,
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn time_range_is_half_open() {
        let q = AuditQuery {
            from: Some(Utc.timestamp_opt(10, 0).unwrap()),
            to: Some(Utc.timestamp_opt(20, 0).unwrap()),
            ..Default::default()
        };
        assert!(!q.matches(&record(1, "t", None, 9)));
        assert!(q.matches(&record(2, "t", None, 10)));
        assert!(q.matches(&record(3, "t", None, 19)));
        assert!(!q.matches(&record(4, "t", None, 20)));
    }

    #[test]
    fn ties_break_on_timestamp_then_id_ascending() {
        let q = AuditQuery::default().sorted_by(AuditSortField::TableName, SortOrder::Desc);
        let mut records = vec![
            record(3, "a", None, 5),
            record(2, "b", None, 7),
            record(1, "b", None, 7),
            record(4, "b", None, 6),
        ];
        records.sort_by(|a, b| q.compare(a, b));
        let ids: Vec<i64> = records.iter().map(|r| r.audit_log_id).collect();
        assert_eq!(ids, vec![4, 1, 2, 3]);
    }

    #[test]
    fn parses_sort_parameters() {
        assert_eq!("tableName".parse::<AuditSortField>().unwrap(), AuditSortField::TableName);
        assert_eq!("actor_id".parse::<AuditSortField>().unwrap(), AuditSortField::ActorId);
        assert!("quantity".parse::<AuditSortField>().is_err());
        assert_eq!("ASC".parse::<SortOrder>().unwrap(), SortOrder::Asc);
    }

    #[test]
    fn limit_is_capped() {
        assert_eq!(AuditQuery::default().effective_limit(), MAX_AUDIT_LIMIT);
        assert_eq!(AuditQuery::default().with_limit(5).effective_limit(), 5);
        assert_eq!(AuditQuery::default().with_limit(50_000).effective_limit(), MAX_AUDIT_LIMIT);
    }
}
