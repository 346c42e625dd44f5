//! Postgres-backed ledger store.
//!
//! Row locks are real `SELECT ... FOR UPDATE` locks; every transaction sets a
//! local `lock_timeout` so a blocked locker fails instead of waiting forever.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|-----------------------|------------|
//! | Database (lock not available) | `55P03` | `LockTimeout` |
//! | Database (deadlock detected) | `40P01` | `LockTimeout` |
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (connection exception / admin shutdown) | `08xxx`, `57P01` | `Unavailable` |
//! | Database (other) | Any other | `Backend` |
//! | PoolClosed / PoolTimedOut / Io / Tls | N/A | `Unavailable` |
//! | Other | N/A | `Backend` |

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use stockroom_core::{
    AlertId, CategoryId, CounterpartyId, DomainError, HistoryEntryId, MovementId, OrderId,
    PrincipalId, ProductId, WarehouseId,
};
use stockroom_inventory::{
    LowStockAlert, MovementState, Product, ProductState, StockMovement, StockReportEntry,
    Warehouse,
};
use stockroom_orders::{Order, OrderHeader, OrderKind, OrderLine, OrderType, StatusHistoryEntry};

use super::r#trait::{AlertStore, LedgerStore, LedgerTx, StoreError};

const PRODUCT_COLUMNS: &str =
    "id, sku, name, category_id, price, quantity, reorder_level, status, created_at, updated_at";

const ORDER_COLUMNS: &str = "id, order_type, warehouse_id, counterparty_id, status, created_by, \
     notes, expected_date, shipped_at, created_at, updated_at";

const MOVEMENT_COLUMNS: &str = "id, product_id, warehouse_id, movement_type, quantity, \
     resulting_quantity, actor_id, notes, created_at";

const ALERT_COLUMNS: &str = "id, product_id, warehouse_id, sku, product_name, \
     quantity, reorder_level, triggered_at, notified_at";

/// Postgres-backed store.
///
/// Cheap to clone; the pool is shared.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    pub async fn connect(
        url: &str,
        max_connections: u32,
        lock_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, lock_timeout))
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    #[instrument(skip(self), err)]
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // Local to this transaction only.
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;

        Ok(Box::new(PgLedgerTx { tx }))
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_product", e))?;
        row.as_ref().map(product_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn product_by_sku(&self, sku: &str) -> Result<Option<Product>, StoreError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE sku = $1");
        let row = sqlx::query(&sql)
            .bind(sku)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_product_by_sku", e))?;
        row.as_ref().map(product_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn low_stock_products(&self) -> Result<Vec<Product>, StoreError> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE quantity <= reorder_level ORDER BY sku"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("low_stock_products", e))?;
        rows.iter().map(product_from_row).collect()
    }

    #[instrument(skip(self), fields(warehouse_id = %id), err)]
    async fn warehouse(&self, id: WarehouseId) -> Result<Option<Warehouse>, StoreError> {
        let row = sqlx::query("SELECT id, code, name FROM warehouses WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_warehouse", e))?;
        row.as_ref().map(warehouse_from_row).transpose()
    }

    #[instrument(skip(self), fields(order_id = %id), err)]
    async fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        load_order(&mut conn, id, false).await
    }

    #[instrument(skip(self), fields(product_id = %product_id), err)]
    async fn movements(
        &self,
        product_id: ProductId,
        limit: usize,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE product_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(*product_id.as_uuid())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_movements", e))?;
        rows.iter().map(movement_from_row).collect()
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    async fn order_history(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<StatusHistoryEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_type, order_id, old_status, new_status, actor_id, changed_at
            FROM order_status_history
            WHERE order_id = $1
            ORDER BY changed_at ASC, id ASC
            "#,
        )
        .bind(*order_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_order_history", e))?;
        rows.iter().map(history_from_row).collect()
    }
}

#[async_trait]
impl AlertStore for PgStore {
    #[instrument(
        skip(self, alert, entry),
        fields(product_id = %alert.product_id, warehouse_id = %alert.warehouse_id),
        err
    )]
    async fn create_alert_if_absent(
        &self,
        alert: &LowStockAlert,
        entry: &StockReportEntry,
    ) -> Result<bool, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO low_stock_alerts (
                id, product_id, warehouse_id, sku, product_name,
                quantity, reorder_level, triggered_at, notified_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (product_id, warehouse_id) DO NOTHING
            "#,
        )
        .bind(*alert.id.as_uuid())
        .bind(*alert.product_id.as_uuid())
        .bind(*alert.warehouse_id.as_uuid())
        .bind(&alert.sku)
        .bind(&alert.product_name)
        .bind(alert.quantity)
        .bind(alert.reorder_level)
        .bind(alert.triggered_at)
        .bind(alert.notified_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_alert", e))?
        .rows_affected()
            == 1;

        if inserted {
            sqlx::query(
                r#"
                INSERT INTO stock_report_entries (
                    alert_id, product_id, product_name, quantity, created_at
                )
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(*entry.alert_id.as_uuid())
            .bind(*entry.product_id.as_uuid())
            .bind(&entry.product_name)
            .bind(entry.quantity)
            .bind(entry.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_report_entry", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(inserted)
    }

    #[instrument(skip(self), err)]
    async fn alert_for(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<Option<LowStockAlert>, StoreError> {
        let sql = format!(
            "SELECT {ALERT_COLUMNS} FROM low_stock_alerts \
             WHERE product_id = $1 AND warehouse_id = $2"
        );
        let row = sqlx::query(&sql)
            .bind(*product_id.as_uuid())
            .bind(*warehouse_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_alert", e))?;

        row.as_ref().map(alert_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn mark_alert_notified(
        &self,
        alert_id: AlertId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE low_stock_alerts
            SET notified_at = $2
            WHERE id = $1 AND notified_at IS NULL
            "#,
        )
        .bind(*alert_id.as_uuid())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_alert_notified", e))?
        .rows_affected();
        Ok(updated == 1)
    }

    #[instrument(skip(self), err)]
    async fn unnotified_alerts(&self, limit: usize) -> Result<Vec<LowStockAlert>, StoreError> {
        let sql = format!(
            "SELECT {ALERT_COLUMNS} FROM low_stock_alerts WHERE notified_at IS NULL \
             ORDER BY triggered_at ASC LIMIT $1"
        );
        let rows = sqlx::query(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_unnotified_alerts", e))?;

        rows.iter().map(alert_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn report_entries(&self) -> Result<Vec<StockReportEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT alert_id, product_id, product_name, quantity, created_at
            FROM stock_report_entries
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_report_entries", e))?;

        rows.iter()
            .map(|row| {
                Ok(StockReportEntry {
                    alert_id: AlertId::from_uuid(get(row, "alert_id")?),
                    product_id: ProductId::from_uuid(get(row, "product_id")?),
                    product_name: get(row, "product_name")?,
                    quantity: get(row, "quantity")?,
                    created_at: get(row, "created_at")?,
                })
            })
            .collect()
    }
}

/// Transaction over `PgStore`. Dropping it rolls back.
pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn lock_product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_product", e))?;
        row.as_ref().map(product_from_row).transpose()
    }

    #[instrument(skip(self), fields(order_id = %id), err)]
    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>, StoreError> {
        load_order(&mut self.tx, id, true).await
    }

    #[instrument(skip(self, product), fields(product_id = %product.id(), sku = product.sku()), err)]
    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO products (
                id, sku, name, category_id, price, quantity, reorder_level,
                status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(*product.id().as_uuid())
        .bind(product.sku())
        .bind(product.name())
        .bind(*product.category_id().as_uuid())
        .bind(to_i64(product.price(), "price")?)
        .bind(product.quantity())
        .bind(product.reorder_level())
        .bind(product.status().as_str())
        .bind(product.created_at())
        .bind(product.updated_at())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_product", e))?;
        Ok(())
    }

    #[instrument(skip(self, product), fields(product_id = %product.id()), err)]
    async fn update_product(&mut self, product: &Product) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE products
            SET quantity = $2, status = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(*product.id().as_uuid())
        .bind(product.quantity())
        .bind(product.status().as_str())
        .bind(product.updated_at())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_product", e))?;
        Ok(())
    }

    #[instrument(skip(self, warehouse), fields(code = %warehouse.code), err)]
    async fn insert_warehouse(&mut self, warehouse: &Warehouse) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO warehouses (id, code, name) VALUES ($1, $2, $3)")
            .bind(*warehouse.id.as_uuid())
            .bind(&warehouse.code)
            .bind(&warehouse.name)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_warehouse", e))?;
        Ok(())
    }

    #[instrument(skip(self, order), fields(order_id = %order.id()), err)]
    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        let header = order.header();
        let (expected_date, shipped_at) = kind_columns(order.kind());
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, order_type, warehouse_id, counterparty_id, status, created_by,
                notes, expected_date, shipped_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(*header.id.as_uuid())
        .bind(order.order_type().as_str())
        .bind(*header.warehouse_id.as_uuid())
        .bind(*order.kind().counterparty_id().as_uuid())
        .bind(header.status.as_str())
        .bind(*header.created_by.as_uuid())
        .bind(header.notes.as_deref())
        .bind(expected_date)
        .bind(shipped_at)
        .bind(header.created_at)
        .bind(header.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_order", e))?;

        insert_lines(&mut self.tx, order).await
    }

    #[instrument(skip(self, order), fields(order_id = %order.id(), status = %order.status()), err)]
    async fn update_order(&mut self, order: &Order) -> Result<(), StoreError> {
        let header = order.header();
        let (expected_date, shipped_at) = kind_columns(order.kind());
        sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, notes = $3, expected_date = $4, shipped_at = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(*header.id.as_uuid())
        .bind(header.status.as_str())
        .bind(header.notes.as_deref())
        .bind(expected_date)
        .bind(shipped_at)
        .bind(header.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_order", e))?;

        sqlx::query("DELETE FROM order_lines WHERE order_id = $1")
            .bind(*header.id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_order_lines", e))?;

        insert_lines(&mut self.tx, order).await
    }

    #[instrument(
        skip(self, movement),
        fields(product_id = %movement.product_id(), kind = %movement.kind(), quantity = movement.quantity()),
        err
    )]
    async fn insert_movement(&mut self, movement: &StockMovement) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO stock_movements (
                id, product_id, warehouse_id, movement_type, quantity,
                resulting_quantity, actor_id, notes, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(*movement.id().as_uuid())
        .bind(*movement.product_id().as_uuid())
        .bind(*movement.warehouse_id().as_uuid())
        .bind(movement.kind().as_str())
        .bind(movement.quantity())
        .bind(movement.resulting_quantity())
        .bind(*movement.actor().as_uuid())
        .bind(movement.notes())
        .bind(movement.created_at())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_movement", e))?;
        Ok(())
    }

    #[instrument(skip(self, entry), fields(order_id = %entry.order_id), err)]
    async fn insert_history(&mut self, entry: &StatusHistoryEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO order_status_history (
                id, order_type, order_id, old_status, new_status, actor_id, changed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(*entry.id.as_uuid())
        .bind(entry.order_type.as_str())
        .bind(*entry.order_id.as_uuid())
        .bind(entry.old_status.as_str())
        .bind(entry.new_status.as_str())
        .bind(*entry.actor.as_uuid())
        .bind(entry.changed_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_history", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

async fn load_order(
    conn: &mut PgConnection,
    id: OrderId,
    for_update: bool,
) -> Result<Option<Order>, StoreError> {
    let lock = if for_update { " FOR UPDATE" } else { "" };
    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1{lock}");
    let Some(row) = sqlx::query(&sql)
        .bind(*id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("load_order", e))?
    else {
        return Ok(None);
    };

    // Lines are only written under the order lock, so they need none of their own.
    let line_rows = sqlx::query(
        r#"
        SELECT line_no, product_id, quantity, unit_price, discount, status
        FROM order_lines
        WHERE order_id = $1
        ORDER BY line_no ASC
        "#,
    )
    .bind(*id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_order_lines", e))?;

    let lines = line_rows
        .iter()
        .map(line_from_row)
        .collect::<Result<Vec<_>, _>>()?;
    order_from_row(&row, lines).map(Some)
}

async fn insert_lines(conn: &mut PgConnection, order: &Order) -> Result<(), StoreError> {
    for line in order.lines() {
        sqlx::query(
            r#"
            INSERT INTO order_lines (
                order_id, line_no, product_id, quantity, unit_price, discount, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(*order.id().as_uuid())
        .bind(i32::try_from(line.line_no).map_err(|_| {
            StoreError::Backend(format!("line number {} out of range", line.line_no))
        })?)
        .bind(*line.product_id.as_uuid())
        .bind(line.quantity)
        .bind(to_i64(line.unit_price, "unit_price")?)
        .bind(to_i64(line.discount, "discount")?)
        .bind(line.status.as_str())
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("insert_order_line", e))?;
    }
    Ok(())
}

fn kind_columns(kind: &OrderKind) -> (Option<NaiveDate>, Option<DateTime<Utc>>) {
    match kind {
        OrderKind::Purchase { expected_date, .. } => (*expected_date, None),
        OrderKind::Sale { shipped_at, .. } => (None, *shipped_at),
    }
}

fn to_i64(value: u64, field: &str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Backend(format!("{field} {value} out of range")))
}

fn to_u64(value: i64, field: &str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative {field}: {value}")))
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Corrupt(format!("column {column}: {e}")))
}

fn parse<T>(raw: String, column: &str) -> Result<T, StoreError>
where
    T: core::str::FromStr<Err = DomainError>,
{
    raw.parse()
        .map_err(|e: DomainError| StoreError::Corrupt(format!("column {column}: {e}")))
}

fn product_from_row(row: &PgRow) -> Result<Product, StoreError> {
    let state = ProductState {
        id: ProductId::from_uuid(get(row, "id")?),
        sku: get(row, "sku")?,
        name: get(row, "name")?,
        category_id: CategoryId::from_uuid(get(row, "category_id")?),
        price: to_u64(get(row, "price")?, "price")?,
        quantity: get(row, "quantity")?,
        reorder_level: get(row, "reorder_level")?,
        status: parse(get(row, "status")?, "status")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    };
    Product::restore(state).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn alert_from_row(row: &PgRow) -> Result<LowStockAlert, StoreError> {
    Ok(LowStockAlert {
        id: AlertId::from_uuid(get(row, "id")?),
        product_id: ProductId::from_uuid(get(row, "product_id")?),
        warehouse_id: WarehouseId::from_uuid(get(row, "warehouse_id")?),
        sku: get(row, "sku")?,
        product_name: get(row, "product_name")?,
        quantity: get(row, "quantity")?,
        reorder_level: get(row, "reorder_level")?,
        triggered_at: get(row, "triggered_at")?,
        notified_at: get(row, "notified_at")?,
    })
}

fn warehouse_from_row(row: &PgRow) -> Result<Warehouse, StoreError> {
    Ok(Warehouse {
        id: WarehouseId::from_uuid(get(row, "id")?),
        code: get(row, "code")?,
        name: get(row, "name")?,
    })
}

fn movement_from_row(row: &PgRow) -> Result<StockMovement, StoreError> {
    let state = MovementState {
        id: MovementId::from_uuid(get(row, "id")?),
        product_id: ProductId::from_uuid(get(row, "product_id")?),
        warehouse_id: WarehouseId::from_uuid(get(row, "warehouse_id")?),
        kind: parse(get(row, "movement_type")?, "movement_type")?,
        quantity: get(row, "quantity")?,
        resulting_quantity: get(row, "resulting_quantity")?,
        actor: PrincipalId::from_uuid(get(row, "actor_id")?),
        notes: get(row, "notes")?,
        created_at: get(row, "created_at")?,
    };
    StockMovement::restore(state).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn line_from_row(row: &PgRow) -> Result<OrderLine, StoreError> {
    let line_no: i32 = get(row, "line_no")?;
    Ok(OrderLine {
        line_no: u32::try_from(line_no)
            .map_err(|_| StoreError::Corrupt(format!("negative line_no: {line_no}")))?,
        product_id: ProductId::from_uuid(get(row, "product_id")?),
        quantity: get(row, "quantity")?,
        unit_price: to_u64(get(row, "unit_price")?, "unit_price")?,
        discount: to_u64(get(row, "discount")?, "discount")?,
        status: parse(get(row, "status")?, "status")?,
    })
}

fn order_from_row(row: &PgRow, lines: Vec<OrderLine>) -> Result<Order, StoreError> {
    let order_type: OrderType = parse(get(row, "order_type")?, "order_type")?;
    let counterparty = CounterpartyId::from_uuid(get(row, "counterparty_id")?);
    let kind = match order_type {
        OrderType::Purchase => OrderKind::Purchase {
            supplier_id: counterparty,
            expected_date: get(row, "expected_date")?,
        },
        OrderType::Sale => OrderKind::Sale {
            customer_id: counterparty,
            shipped_at: get(row, "shipped_at")?,
        },
    };
    let header = OrderHeader {
        id: OrderId::from_uuid(get(row, "id")?),
        warehouse_id: WarehouseId::from_uuid(get(row, "warehouse_id")?),
        status: parse(get(row, "status")?, "status")?,
        created_by: PrincipalId::from_uuid(get(row, "created_by")?),
        notes: get(row, "notes")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    };
    Ok(Order::from_parts(header, kind, lines))
}

fn history_from_row(row: &PgRow) -> Result<StatusHistoryEntry, StoreError> {
    Ok(StatusHistoryEntry {
        id: HistoryEntryId::from_uuid(get(row, "id")?),
        order_type: parse(get(row, "order_type")?, "order_type")?,
        order_id: OrderId::from_uuid(get(row, "order_id")?),
        old_status: parse(get(row, "old_status")?, "old_status")?,
        new_status: parse(get(row, "new_status")?, "new_status")?,
        actor: PrincipalId::from_uuid(get(row, "actor_id")?),
        changed_at: get(row, "changed_at")?,
    })
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) => classify_sqlstate(
            db_err.code().as_deref(),
            format!("database error in {operation}: {}", db_err.message()),
        ),
        sqlx::Error::PoolClosed
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StoreError::Unavailable(format!("{operation}: {err}")),
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}

/// 55P03 lock_not_available, 40P01 deadlock_detected, 23505 unique_violation,
/// class 08 and 57P01 for lost connections.
fn classify_sqlstate(code: Option<&str>, msg: String) -> StoreError {
    match code {
        Some("55P03") | Some("40P01") => StoreError::LockTimeout(msg),
        Some("23505") => StoreError::Conflict(msg),
        Some(code) if code.starts_with("08") || code == "57P01" => StoreError::Unavailable(msg),
        _ => StoreError::Backend(msg),
    }
}
