use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use stockroom_core::{AlertId, DomainError, OrderId, ProductId, WarehouseId};
use stockroom_inventory::{LowStockAlert, Product, StockMovement, StockReportEntry, Warehouse};
use stockroom_orders::{Order, StatusHistoryEntry};

/// Storage operation error.
///
/// These are infrastructure failures, as opposed to domain rejections.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A row lock was not granted within the configured timeout (or the
    /// backend broke a deadlock).
    #[error("lock timeout: {0}")]
    LockTimeout(String),

    /// Unique key collision.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Backend unreachable (pool closed, connection reset).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be mapped back to a domain value.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for DomainError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::LockTimeout(msg) => DomainError::lock_timeout(msg),
            StoreError::Conflict(msg) => DomainError::conflict(msg),
            StoreError::Unavailable(msg) | StoreError::Backend(msg) => {
                DomainError::unavailable(msg)
            }
            StoreError::Corrupt(msg) => DomainError::validation(format!("corrupt stored data: {msg}")),
        }
    }
}

/// Transactional store for products, warehouses, orders and their audit trail.
///
/// Reads on the store itself take no locks; anything that is going to be
/// written must be read through `LedgerTx::lock_*` first.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError>;

    async fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError>;

    /// Lookup by normalized SKU.
    async fn product_by_sku(&self, sku: &str) -> Result<Option<Product>, StoreError>;

    /// Products with `quantity <= reorder_level`, ordered by SKU.
    async fn low_stock_products(&self) -> Result<Vec<Product>, StoreError>;

    async fn warehouse(&self, id: WarehouseId) -> Result<Option<Warehouse>, StoreError>;

    async fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError>;

    /// Movements of one product, newest first.
    async fn movements(
        &self,
        product_id: ProductId,
        limit: usize,
    ) -> Result<Vec<StockMovement>, StoreError>;

    /// Status history of one order, oldest first.
    async fn order_history(&self, order_id: OrderId)
    -> Result<Vec<StatusHistoryEntry>, StoreError>;
}

/// One atomic unit of work.
///
/// Nothing is visible to other transactions before `commit`. Dropping the
/// transaction without committing rolls it back and releases its locks.
#[async_trait]
pub trait LedgerTx: Send {
    /// `SELECT ... FOR UPDATE` on the product row. Blocks until granted or the
    /// lock timeout elapses.
    async fn lock_product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError>;

    /// `SELECT ... FOR UPDATE` on the order row (lines included).
    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>, StoreError>;

    /// Fails with `Conflict` on a duplicate SKU.
    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError>;

    async fn update_product(&mut self, product: &Product) -> Result<(), StoreError>;

    /// Fails with `Conflict` on a duplicate code.
    async fn insert_warehouse(&mut self, warehouse: &Warehouse) -> Result<(), StoreError>;

    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError>;

    /// Writes the header and replaces the lines.
    async fn update_order(&mut self, order: &Order) -> Result<(), StoreError>;

    async fn insert_movement(&mut self, movement: &StockMovement) -> Result<(), StoreError>;

    async fn insert_history(&mut self, entry: &StatusHistoryEntry) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Low-stock alert rows, de-duplicated by the (product, warehouse) key.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Insert the alert and its report entry unless an alert already exists
    /// for the pair. Returns whether this call created it.
    async fn create_alert_if_absent(
        &self,
        alert: &LowStockAlert,
        entry: &StockReportEntry,
    ) -> Result<bool, StoreError>;

    async fn alert_for(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<Option<LowStockAlert>, StoreError>;

    /// Record delivery. Returns false when the alert is unknown or was
    /// already marked.
    async fn mark_alert_notified(
        &self,
        alert_id: AlertId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Alerts whose notification has not been delivered, oldest first.
    async fn unnotified_alerts(&self, limit: usize) -> Result<Vec<LowStockAlert>, StoreError>;

    /// Report entries, oldest first.
    async fn report_entries(&self) -> Result<Vec<StockReportEntry>, StoreError>;
}
