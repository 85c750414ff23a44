use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{InventoryId, LedgerError, UserId};
use stockledger_infra::ledger_store::AuditQuery;
use stockledger_inventory::{StockEntry, StockLevel};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct LinkStockRequest {
    pub quantity: i64,
    #[serde(default)]
    pub min_stock_quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct DeltaRequest {
    pub delta: i64,
}

#[derive(Debug, Deserialize)]
pub struct SetQuantityRequest {
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct MinStockRequest {
    pub min_stock_quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct AccountNoticeRequest {
    /// Admins receive the notice when no target is given.
    pub target_user_id: Option<UserId>,
    pub message: String,
}

/// `GET /audit-logs` query string.
#[derive(Debug, Default, Deserialize)]
pub struct AuditLogParams {
    pub table: Option<String>,
    pub record_id: Option<String>,
    pub actor_id: Option<String>,
    /// RFC3339, inclusive.
    pub from: Option<String>,
    /// RFC3339, exclusive.
    pub to: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub limit: Option<u32>,
}

impl AuditLogParams {
    pub fn into_query(self) -> Result<AuditQuery, LedgerError> {
        let mut query = AuditQuery {
            table_name: non_empty(self.table),
            record_id: non_empty(self.record_id),
            actor_id: non_empty(self.actor_id).map(|s| s.parse()).transpose()?,
            from: non_empty(self.from).map(|s| parse_timestamp("from", &s)).transpose()?,
            to: non_empty(self.to).map(|s| parse_timestamp("to", &s)).transpose()?,
            limit: self.limit,
            ..Default::default()
        };
        if let Some(sort) = non_empty(self.sort) {
            query.sort = sort.parse()?;
        }
        if let Some(order) = non_empty(self.order) {
            query.order = order.parse()?;
        }
        if let (Some(from), Some(to)) = (query.from, query.to) {
            if from > to {
                return Err(LedgerError::invalid_argument("'from' must not be after 'to'"));
            }
        }
        Ok(query)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| LedgerError::invalid_argument(format!("'{field}' must be an RFC3339 timestamp")))
}

/// Parse a path segment into one of the ledger id types.
pub fn parse_id<T>(raw: &str) -> Result<T, axum::response::Response>
where
    T: FromStr<Err = LedgerError>,
{
    raw.parse().map_err(errors::ledger_error_to_response)
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct StockEntryResponse {
    #[serde(flatten)]
    pub entry: StockEntry,
    pub level: StockLevel,
}

impl From<StockEntry> for StockEntryResponse {
    fn from(entry: StockEntry) -> Self {
        let level = entry.level();
        Self { entry, level }
    }
}

#[derive(Debug, Serialize)]
pub struct ManagerInventoriesResponse {
    pub manager_id: UserId,
    pub inventory_ids: Vec<InventoryId>,
}

#[derive(Debug, Serialize)]
pub struct InventoryManagersResponse {
    pub inventory_id: InventoryId,
    pub manager_ids: Vec<UserId>,
}
