//! Postgres-backed ledger store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` / `AlreadyExists` | Concurrent link of the same pair / duplicate assignment |
//! | Database (foreign key violation) | `23503` | `NotFound` | Product or inventory missing from the catalog |
//! | Database (check constraint violation) | `23514` | `Backend` | Negative quantity reached the database |
//! | Database (other) | Any other | `Backend` | Other database errors |
//! | PoolClosed | N/A | `Backend` | Connection pool was closed |
//! | Other | N/A | `Backend` | Network errors, connection failures, etc. |
//!
//! Audit insert failures inside a stock or assignment transaction surface as
//! `StoreError::Audit` and roll back the whole transaction.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::instrument;

use stockledger_core::{InventoryId, ProductId, UserId};
use stockledger_inventory::{
    InventoryLabel, ManagerAssignment, ProductLabel, StockEntry, StockKey,
};

use super::query::{AuditQuery, SortOrder};
use super::r#trait::{AssignmentWrite, CommittedStock, LedgerStore, StockWrite, StoreError};
use crate::audit::{AuditEntryRequest, AuditRecord};

// Serializes audit appends so ids and timestamps follow commit order.
const AUDIT_APPEND_LOCK: i64 = 0x5354_4f43_4b4c_4752;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS products (
        id BIGINT PRIMARY KEY,
        sku TEXT NOT NULL,
        name TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS inventories (
        id BIGINT PRIMARY KEY,
        name TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS inventory_products (
        inventory_id BIGINT NOT NULL REFERENCES inventories(id),
        product_id BIGINT NOT NULL REFERENCES products(id),
        quantity BIGINT NOT NULL CHECK (quantity >= 0),
        min_stock_quantity BIGINT NOT NULL CHECK (min_stock_quantity >= 0),
        version BIGINT NOT NULL CHECK (version >= 1),
        PRIMARY KEY (inventory_id, product_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS inventory_managers (
        inventory_id BIGINT NOT NULL REFERENCES inventories(id),
        manager_id BIGINT NOT NULL,
        PRIMARY KEY (inventory_id, manager_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS audit_logs (
        audit_log_id BIGSERIAL PRIMARY KEY,
        actor_id BIGINT,
        table_name TEXT NOT NULL,
        record_id TEXT NOT NULL,
        action_type TEXT NOT NULL,
        old_value JSONB,
        new_value JSONB,
        changes TEXT,
        timestamp TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS audit_logs_record_idx
        ON audit_logs (table_name, record_id)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS audit_logs_timestamp_idx
        ON audit_logs (timestamp, audit_log_id)
    "#,
];

/// Postgres-backed ledger store.
///
/// Every stock write runs in one transaction: a conditional
/// `UPDATE`/`DELETE ... WHERE version = $expected` (or an `INSERT` for a link)
/// followed by the audit insert. Zero affected rows means another writer
/// committed first and the write is reported as `Conflict`.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes when missing.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA.iter().copied() {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    /// Upsert a catalog product.
    #[instrument(skip(self, label), fields(product_id = %product_id), err)]
    pub async fn upsert_product(&self, product_id: ProductId, label: &ProductLabel) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO products (id, sku, name) VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET sku = EXCLUDED.sku, name = EXCLUDED.name
            "#,
        )
        .bind(product_id.get())
        .bind(&label.sku)
        .bind(&label.name)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_product", e))?;
        Ok(())
    }

    /// Upsert a catalog inventory.
    #[instrument(skip(self, label), fields(inventory_id = %inventory_id), err)]
    pub async fn upsert_inventory(&self, inventory_id: InventoryId, label: &InventoryLabel) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO inventories (id, name) VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name
            "#,
        )
        .bind(inventory_id.get())
        .bind(&label.name)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_inventory", e))?;
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(skip(self), fields(inventory_id = %key.inventory_id, product_id = %key.product_id), err)]
    async fn get_stock_entry(&self, key: StockKey) -> Result<Option<StockEntry>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT inventory_id, product_id, quantity, min_stock_quantity, version
            FROM inventory_products
            WHERE inventory_id = $1 AND product_id = $2
            "#,
        )
        .bind(key.inventory_id.get())
        .bind(key.product_id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_stock_entry", e))?;

        row.as_ref().map(stock_entry_from_row).transpose()
    }

    #[instrument(skip(self), fields(inventory_id = %inventory_id), err)]
    async fn list_stock_entries(&self, inventory_id: InventoryId) -> Result<Vec<StockEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT inventory_id, product_id, quantity, min_stock_quantity, version
            FROM inventory_products
            WHERE inventory_id = $1
            ORDER BY product_id ASC
            "#,
        )
        .bind(inventory_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_stock_entries", e))?;

        rows.iter().map(stock_entry_from_row).collect()
    }

    #[instrument(
        skip(self, write),
        fields(
            inventory_id = %write.change.key.inventory_id,
            product_id = %write.change.key.product_id,
            kind = ?write.change.kind,
            expected_version = ?write.change.expected_version()
        ),
        err
    )]
    async fn commit_stock(&self, write: StockWrite) -> Result<CommittedStock, StoreError> {
        let StockWrite { change, audit } = write;
        let key = change.key;

        let mut tx = self.begin().await?;

        let affected = match (&change.before, &change.after) {
            (None, Some(new)) => sqlx::query(
                r#"
                INSERT INTO inventory_products
                    (inventory_id, product_id, quantity, min_stock_quantity, version)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(key.inventory_id.get())
            .bind(key.product_id.get())
            .bind(new.quantity)
            .bind(new.min_stock_quantity)
            .bind(new.version as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict(format!("{key} was linked concurrently"))
                } else if is_foreign_key_violation(&e) {
                    StoreError::NotFound(format!("{key} is not in the catalog"))
                } else {
                    map_sqlx_error("insert_stock_entry", e)
                }
            })?
            .rows_affected(),
            (Some(old), Some(new)) => sqlx::query(
                r#"
                UPDATE inventory_products
                SET quantity = $3, min_stock_quantity = $4, version = $5
                WHERE inventory_id = $1 AND product_id = $2 AND version = $6
                "#,
            )
            .bind(key.inventory_id.get())
            .bind(key.product_id.get())
            .bind(new.quantity)
            .bind(new.min_stock_quantity)
            .bind(new.version as i64)
            .bind(old.version as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_stock_entry", e))?
            .rows_affected(),
            (Some(old), None) => sqlx::query(
                r#"
                DELETE FROM inventory_products
                WHERE inventory_id = $1 AND product_id = $2 AND version = $3
                "#,
            )
            .bind(key.inventory_id.get())
            .bind(key.product_id.get())
            .bind(old.version as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_stock_entry", e))?
            .rows_affected(),
            (None, None) => {
                return Err(StoreError::Backend(format!("{key}: change has neither before nor after state")));
            }
        };

        if affected == 0 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::Conflict(format!(
                "{key}: expected {:?}, row changed concurrently",
                change.expected_version()
            )));
        }

        let record = insert_audit(&mut tx, audit).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(CommittedStock {
            entry: change.after,
            audit: record,
        })
    }

    #[instrument(skip(self), err)]
    async fn list_assignments(&self) -> Result<Vec<ManagerAssignment>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT inventory_id, manager_id
            FROM inventory_managers
            ORDER BY inventory_id ASC, manager_id ASC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_assignments", e))?;

        rows.iter()
            .map(|row| -> Result<ManagerAssignment, StoreError> {
                Ok(ManagerAssignment::new(
                    InventoryId::new(row.try_get("inventory_id").map_err(decode_error)?),
                    UserId::new(row.try_get("manager_id").map_err(decode_error)?),
                ))
            })
            .collect()
    }

    #[instrument(
        skip(self, write),
        fields(
            inventory_id = %write.assignment.inventory_id,
            manager_id = %write.assignment.manager_id
        ),
        err
    )]
    async fn insert_assignment(&self, write: AssignmentWrite) -> Result<AuditRecord, StoreError> {
        let a = write.assignment;
        let mut tx = self.begin().await?;

        sqlx::query("INSERT INTO inventory_managers (inventory_id, manager_id) VALUES ($1, $2)")
            .bind(a.inventory_id.get())
            .bind(a.manager_id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::AlreadyExists(format!(
                        "manager {} is already assigned to inventory {}",
                        a.manager_id, a.inventory_id
                    ))
                } else if is_foreign_key_violation(&e) {
                    StoreError::NotFound(format!("inventory {}", a.inventory_id))
                } else {
                    map_sqlx_error("insert_assignment", e)
                }
            })?;

        let record = insert_audit(&mut tx, write.audit).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(record)
    }

    #[instrument(
        skip(self, write),
        fields(
            inventory_id = %write.assignment.inventory_id,
            manager_id = %write.assignment.manager_id
        ),
        err
    )]
    async fn delete_assignment(&self, write: AssignmentWrite) -> Result<AuditRecord, StoreError> {
        let a = write.assignment;
        let mut tx = self.begin().await?;

        let affected = sqlx::query("DELETE FROM inventory_managers WHERE inventory_id = $1 AND manager_id = $2")
            .bind(a.inventory_id.get())
            .bind(a.manager_id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_assignment", e))?
            .rows_affected();

        if affected == 0 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::NotFound(format!(
                "manager {} is not assigned to inventory {}",
                a.manager_id, a.inventory_id
            )));
        }

        let record = insert_audit(&mut tx, write.audit).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(record)
    }

    #[instrument(skip(self), err)]
    async fn query_audit(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, StoreError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            SELECT audit_log_id, actor_id, table_name, record_id, action_type,
                   old_value, new_value, changes, timestamp
            FROM audit_logs
            WHERE TRUE
            "#,
        );
        if let Some(table) = &query.table_name {
            qb.push(" AND table_name = ").push_bind(table.clone());
        }
        if let Some(record_id) = &query.record_id {
            qb.push(" AND record_id = ").push_bind(record_id.clone());
        }
        if let Some(actor) = query.actor_id {
            qb.push(" AND actor_id = ").push_bind(actor.get());
        }
        if let Some(from) = query.from {
            qb.push(" AND timestamp >= ").push_bind(from);
        }
        if let Some(to) = query.to {
            qb.push(" AND timestamp < ").push_bind(to);
        }

        // Column names come from a closed enum, never from input.
        let direction = match query.order {
            SortOrder::Asc => "ASC NULLS FIRST",
            SortOrder::Desc => "DESC NULLS LAST",
        };
        qb.push(format!(
            " ORDER BY {} {}, timestamp ASC, audit_log_id ASC LIMIT ",
            query.sort.column(),
            direction
        ));
        qb.push_bind(i64::from(query.effective_limit()));

        let rows = qb
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("query_audit", e))?;

        rows.iter().map(audit_record_from_row).collect()
    }

    #[instrument(skip(self), fields(product_id = %product_id), err)]
    async fn product_label(&self, product_id: ProductId) -> Result<Option<ProductLabel>, StoreError> {
        let row = sqlx::query("SELECT sku, name FROM products WHERE id = $1")
            .bind(product_id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("product_label", e))?;

        row.map(|row| -> Result<ProductLabel, StoreError> {
            Ok(ProductLabel::new(
                row.try_get::<String, _>("sku").map_err(decode_error)?,
                row.try_get::<String, _>("name").map_err(decode_error)?,
            ))
        })
        .transpose()
    }

    #[instrument(skip(self), fields(inventory_id = %inventory_id), err)]
    async fn inventory_label(&self, inventory_id: InventoryId) -> Result<Option<InventoryLabel>, StoreError> {
        let row = sqlx::query("SELECT name FROM inventories WHERE id = $1")
            .bind(inventory_id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("inventory_label", e))?;

        row.map(|row| -> Result<InventoryLabel, StoreError> {
            Ok(InventoryLabel::new(
                row.try_get::<String, _>("name").map_err(decode_error)?,
            ))
        })
        .transpose()
    }
}

/// Append an audit record inside `tx`.
///
/// Takes a transaction-scoped advisory lock first, so the timestamp can be
/// clamped to the latest committed record.
async fn insert_audit(
    tx: &mut Transaction<'_, Postgres>,
    request: AuditEntryRequest,
) -> Result<AuditRecord, StoreError> {
    request.validate().map_err(StoreError::Audit)?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(AUDIT_APPEND_LOCK)
        .execute(&mut **tx)
        .await
        .map_err(|e| StoreError::Audit(format!("audit lock: {e}")))?;

    let row = sqlx::query(
        r#"
        INSERT INTO audit_logs
            (actor_id, table_name, record_id, action_type, old_value, new_value, changes, timestamp)
        VALUES (
            $1, $2, $3, $4, $5, $6, $7,
            GREATEST(clock_timestamp(), COALESCE((SELECT MAX(timestamp) FROM audit_logs), '-infinity'::timestamptz))
        )
        RETURNING audit_log_id, timestamp
        "#,
    )
    .bind(request.actor_id.map(|u| u.get()))
    .bind(&request.table_name)
    .bind(&request.record_id)
    .bind(request.action.as_str())
    .bind(&request.old_value)
    .bind(&request.new_value)
    .bind(&request.changes)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| StoreError::Audit(format!("audit insert: {e}")))?;

    let id: i64 = row
        .try_get("audit_log_id")
        .map_err(|e| StoreError::Audit(format!("audit insert returned no id: {e}")))?;
    let timestamp: DateTime<Utc> = row
        .try_get("timestamp")
        .map_err(|e| StoreError::Audit(format!("audit insert returned no timestamp: {e}")))?;

    Ok(request.into_record(id, timestamp))
}

fn stock_entry_from_row(row: &PgRow) -> Result<StockEntry, StoreError> {
    let version: i64 = row.try_get("version").map_err(decode_error)?;
    Ok(StockEntry {
        inventory_id: InventoryId::new(row.try_get("inventory_id").map_err(decode_error)?),
        product_id: ProductId::new(row.try_get("product_id").map_err(decode_error)?),
        quantity: row.try_get("quantity").map_err(decode_error)?,
        min_stock_quantity: row.try_get("min_stock_quantity").map_err(decode_error)?,
        version: version as u64,
    })
}

fn audit_record_from_row(row: &PgRow) -> Result<AuditRecord, StoreError> {
    let action: String = row.try_get("action_type").map_err(decode_error)?;
    let actor: Option<i64> = row.try_get("actor_id").map_err(decode_error)?;
    Ok(AuditRecord {
        audit_log_id: row.try_get("audit_log_id").map_err(decode_error)?,
        actor_id: actor.map(UserId::new),
        table_name: row.try_get("table_name").map_err(decode_error)?,
        record_id: row.try_get("record_id").map_err(decode_error)?,
        action_type: action
            .parse()
            .map_err(|e| StoreError::Backend(format!("stored audit action: {e}")))?,
        old_value: row.try_get("old_value").map_err(decode_error)?,
        new_value: row.try_get("new_value").map_err(decode_error)?,
        changes: row.try_get("changes").map_err(decode_error)?,
        timestamp: row.try_get("timestamp").map_err(decode_error)?,
    })
}

fn decode_error(err: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("failed to decode row: {err}"))
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                Some("23503") => StoreError::NotFound(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Backend(format!("connection pool closed in {operation}")),
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    has_code(err, "23505")
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    has_code(err, "23503")
}

fn has_code(err: &sqlx::Error, code: &str) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().as_deref() == Some(code);
    }
    false
}
