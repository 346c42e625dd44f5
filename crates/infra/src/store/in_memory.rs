use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::hash::Hash;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;

use stockroom_core::{AlertId, OrderId, ProductId, WarehouseId};
use stockroom_inventory::{LowStockAlert, Product, StockMovement, StockReportEntry, Warehouse};
use stockroom_orders::{Order, StatusHistoryEntry};

use super::r#trait::{AlertStore, LedgerStore, LedgerTx, StoreError};

type RowLocks<K> = Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>;

#[derive(Debug, Default)]
struct Tables {
    products: HashMap<ProductId, Product>,
    warehouses: HashMap<WarehouseId, Warehouse>,
    orders: HashMap<OrderId, Order>,
    movements: Vec<StockMovement>,
    history: Vec<StatusHistoryEntry>,
    alerts: HashMap<(ProductId, WarehouseId), LowStockAlert>,
    report_entries: Vec<StockReportEntry>,
}

impl Tables {
    fn sku_taken(&self, product: &Product) -> bool {
        self.products
            .values()
            .any(|p| p.id() != product.id() && p.sku() == product.sku())
    }

    fn code_taken(&self, warehouse: &Warehouse) -> bool {
        self.warehouses
            .values()
            .any(|w| w.id != warehouse.id && w.code == warehouse.code)
    }
}

#[derive(Debug, Default)]
struct Shared {
    tables: RwLock<Tables>,
    product_locks: RowLocks<ProductId>,
    order_locks: RowLocks<OrderId>,
}

impl Shared {
    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables.read().map_err(|_| poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables.write().map_err(|_| poisoned())
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("in-memory store lock poisoned".to_string())
}

/// In-memory transactional store.
///
/// Intended for tests/dev. Row locks are per-row async mutexes held until the
/// transaction ends, which gives the same blocking behavior as
/// `SELECT ... FOR UPDATE`. Writes are staged and applied under one table lock
/// on commit.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
    lock_timeout: Duration,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl InMemoryStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            lock_timeout,
        }
    }

    pub fn arc(lock_timeout: Duration) -> Arc<Self> {
        Arc::new(Self::new(lock_timeout))
    }

    /// Every committed movement, in commit order.
    pub fn all_movements(&self) -> Result<Vec<StockMovement>, StoreError> {
        Ok(self.shared.read()?.movements.clone())
    }
}

async fn acquire<K>(
    locks: &RowLocks<K>,
    key: K,
    timeout: Duration,
    entity: &str,
) -> Result<OwnedMutexGuard<()>, StoreError>
where
    K: Copy + Eq + Hash + Display,
{
    let row = {
        let mut rows = locks.lock().map_err(|_| poisoned())?;
        rows.entry(key).or_default().clone()
    };
    tokio::time::timeout(timeout, row.lock_owned())
        .await
        .map_err(|_| {
            StoreError::LockTimeout(format!(
                "{entity} {key} still locked after {}ms",
                timeout.as_millis()
            ))
        })
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError> {
        Ok(Box::new(InMemoryTx {
            shared: self.shared.clone(),
            lock_timeout: self.lock_timeout,
            product_guards: HashMap::new(),
            order_guards: HashMap::new(),
            products: HashMap::new(),
            new_products: HashSet::new(),
            warehouses: Vec::new(),
            orders: HashMap::new(),
            new_orders: HashSet::new(),
            movements: Vec::new(),
            history: Vec::new(),
        }))
    }

    async fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.shared.read()?.products.get(&id).cloned())
    }

    async fn product_by_sku(&self, sku: &str) -> Result<Option<Product>, StoreError> {
        Ok(self
            .shared
            .read()?
            .products
            .values()
            .find(|p| p.sku() == sku)
            .cloned())
    }

    async fn low_stock_products(&self) -> Result<Vec<Product>, StoreError> {
        let mut low: Vec<_> = self
            .shared
            .read()?
            .products
            .values()
            .filter(|p| p.is_low_stock())
            .cloned()
            .collect();
        low.sort_by(|a, b| a.sku().cmp(b.sku()));
        Ok(low)
    }

    async fn warehouse(&self, id: WarehouseId) -> Result<Option<Warehouse>, StoreError> {
        Ok(self.shared.read()?.warehouses.get(&id).cloned())
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.shared.read()?.orders.get(&id).cloned())
    }

    async fn movements(
        &self,
        product_id: ProductId,
        limit: usize,
    ) -> Result<Vec<StockMovement>, StoreError> {
        Ok(self
            .shared
            .read()?
            .movements
            .iter()
            .rev()
            .filter(|m| m.product_id() == product_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn order_history(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<StatusHistoryEntry>, StoreError> {
        Ok(self
            .shared
            .read()?
            .history
            .iter()
            .filter(|h| h.order_id == order_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AlertStore for InMemoryStore {
    async fn create_alert_if_absent(
        &self,
        alert: &LowStockAlert,
        entry: &StockReportEntry,
    ) -> Result<bool, StoreError> {
        let mut tables = self.shared.write()?;
        if tables.alerts.contains_key(&alert.key()) {
            return Ok(false);
        }
        tables.alerts.insert(alert.key(), alert.clone());
        tables.report_entries.push(entry.clone());
        Ok(true)
    }

    async fn alert_for(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<Option<LowStockAlert>, StoreError> {
        Ok(self
            .shared
            .read()?
            .alerts
            .get(&(product_id, warehouse_id))
            .cloned())
    }

    async fn mark_alert_notified(
        &self,
        alert_id: AlertId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.shared.write()?;
        let alert = tables
            .alerts
            .values_mut()
            .find(|a| a.id == alert_id && a.notified_at.is_none());
        Ok(match alert {
            Some(alert) => {
                alert.notified_at = Some(at);
                true
            }
            None => false,
        })
    }

    async fn unnotified_alerts(&self, limit: usize) -> Result<Vec<LowStockAlert>, StoreError> {
        let tables = self.shared.read()?;
        let mut pending: Vec<_> = tables
            .alerts
            .values()
            .filter(|a| !a.is_notified())
            .cloned()
            .collect();
        pending.sort_by_key(|a| a.triggered_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn report_entries(&self) -> Result<Vec<StockReportEntry>, StoreError> {
        Ok(self.shared.read()?.report_entries.clone())
    }
}

/// Transaction over `InMemoryStore`.
pub struct InMemoryTx {
    shared: Arc<Shared>,
    lock_timeout: Duration,
    product_guards: HashMap<ProductId, OwnedMutexGuard<()>>,
    order_guards: HashMap<OrderId, OwnedMutexGuard<()>>,
    products: HashMap<ProductId, Product>,
    new_products: HashSet<ProductId>,
    warehouses: Vec<Warehouse>,
    orders: HashMap<OrderId, Order>,
    new_orders: HashSet<OrderId>,
    movements: Vec<StockMovement>,
    history: Vec<StatusHistoryEntry>,
}

#[async_trait]
impl LedgerTx for InMemoryTx {
    async fn lock_product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        if !self.product_guards.contains_key(&id) {
            let guard =
                acquire(&self.shared.product_locks, id, self.lock_timeout, "product").await?;
            self.product_guards.insert(id, guard);
        }
        if let Some(staged) = self.products.get(&id) {
            return Ok(Some(staged.clone()));
        }
        Ok(self.shared.read()?.products.get(&id).cloned())
    }

    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>, StoreError> {
        if !self.order_guards.contains_key(&id) {
            let guard = acquire(&self.shared.order_locks, id, self.lock_timeout, "order").await?;
            self.order_guards.insert(id, guard);
        }
        if let Some(staged) = self.orders.get(&id) {
            return Ok(Some(staged.clone()));
        }
        Ok(self.shared.read()?.orders.get(&id).cloned())
    }

    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError> {
        let staged_clash = self
            .products
            .values()
            .any(|p| p.id() != product.id() && p.sku() == product.sku());
        if staged_clash || self.shared.read()?.sku_taken(product) {
            return Err(StoreError::Conflict(format!(
                "sku '{}' already exists",
                product.sku()
            )));
        }
        self.new_products.insert(product.id());
        self.products.insert(product.id(), product.clone());
        Ok(())
    }

    async fn update_product(&mut self, product: &Product) -> Result<(), StoreError> {
        let id = product.id();
        if !self.product_guards.contains_key(&id) && !self.new_products.contains(&id) {
            return Err(StoreError::Backend(format!(
                "product {id} updated without holding its row lock"
            )));
        }
        self.products.insert(id, product.clone());
        Ok(())
    }

    async fn insert_warehouse(&mut self, warehouse: &Warehouse) -> Result<(), StoreError> {
        let staged_clash = self.warehouses.iter().any(|w| w.code == warehouse.code);
        if staged_clash || self.shared.read()?.code_taken(warehouse) {
            return Err(StoreError::Conflict(format!(
                "warehouse code '{}' already exists",
                warehouse.code
            )));
        }
        self.warehouses.push(warehouse.clone());
        Ok(())
    }

    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        self.new_orders.insert(order.id());
        self.orders.insert(order.id(), order.clone());
        Ok(())
    }

    async fn update_order(&mut self, order: &Order) -> Result<(), StoreError> {
        let id = order.id();
        if !self.order_guards.contains_key(&id) && !self.new_orders.contains(&id) {
            return Err(StoreError::Backend(format!(
                "order {id} updated without holding its row lock"
            )));
        }
        self.orders.insert(id, order.clone());
        Ok(())
    }

    async fn insert_movement(&mut self, movement: &StockMovement) -> Result<(), StoreError> {
        self.movements.push(movement.clone());
        Ok(())
    }

    async fn insert_history(&mut self, entry: &StatusHistoryEntry) -> Result<(), StoreError> {
        self.history.push(entry.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        let mut tables = this.shared.write()?;

        // Concurrent inserts may have raced past the staging check.
        for id in &this.new_products {
            if let Some(product) = this.products.get(id) {
                if tables.sku_taken(product) {
                    return Err(StoreError::Conflict(format!(
                        "sku '{}' already exists",
                        product.sku()
                    )));
                }
            }
        }
        if let Some(w) = this.warehouses.iter().find(|w| tables.code_taken(w)) {
            return Err(StoreError::Conflict(format!(
                "warehouse code '{}' already exists",
                w.code
            )));
        }

        tables.products.extend(this.products);
        tables
            .warehouses
            .extend(this.warehouses.into_iter().map(|w| (w.id, w)));
        tables.orders.extend(this.orders);
        tables.movements.extend(this.movements);
        tables.history.extend(this.history);

        // Row locks are released when the guards drop, after the writes land.
        drop(tables);
        drop(this.product_guards);
        drop(this.order_guards);
        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use stockroom_core::{CategoryId, PrincipalId};
    use stockroom_inventory::{MovementRequest, MovementType, NewProduct, StockLevel};

    fn product(sku: &str) -> Product {
        Product::create(
            ProductId::new(),
            NewProduct {
                sku: sku.to_string(),
                name: "Widget".to_string(),
                category_id: CategoryId::new(),
                price: 100,
                reorder_level: Some(2),
            },
            Utc::now(),
        )
        .unwrap()
    }

    async fn seeded(store: &InMemoryStore, sku: &str) -> Product {
        let p = product(sku);
        let mut tx = store.begin().await.unwrap();
        tx.insert_product(&p).await.unwrap();
        tx.commit().await.unwrap();
        p
    }

    #[tokio::test]
    async fn staged_writes_are_invisible_until_commit() {
        let store = InMemoryStore::default();
        let p = seeded(&store, "A-1").await;

        let mut tx = store.begin().await.unwrap();
        let mut locked = tx.lock_product(p.id()).await.unwrap().unwrap();
        let req = MovementRequest::new(
            p.id(),
            WarehouseId::new(),
            MovementType::In,
            5,
            PrincipalId::new(),
        );
        let movement = locked.apply_movement(&req, Utc::now()).unwrap();
        tx.update_product(&locked).await.unwrap();
        tx.insert_movement(&movement).await.unwrap();

        assert_eq!(store.product(p.id()).await.unwrap().unwrap().quantity(), 0);
        tx.commit().await.unwrap();
        assert_eq!(store.product(p.id()).await.unwrap().unwrap().quantity(), 5);
        assert_eq!(store.movements(p.id(), 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dropping_a_transaction_rolls_back_and_unlocks() {
        let store = InMemoryStore::new(Duration::from_millis(50));
        let p = seeded(&store, "A-1").await;

        {
            let mut tx = store.begin().await.unwrap();
            let mut locked = tx.lock_product(p.id()).await.unwrap().unwrap();
            locked.discontinue(Utc::now()).unwrap();
            tx.update_product(&locked).await.unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        let again = tx.lock_product(p.id()).await.unwrap().unwrap();
        assert_eq!(again, p);
    }

    #[tokio::test]
    async fn second_locker_times_out() {
        let store = InMemoryStore::new(Duration::from_millis(20));
        let p = seeded(&store, "A-1").await;

        let mut holder = store.begin().await.unwrap();
        holder.lock_product(p.id()).await.unwrap();

        let mut waiter = store.begin().await.unwrap();
        let err = waiter.lock_product(p.id()).await.unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout(_)));

        holder.commit().await.unwrap();
        assert!(waiter.lock_product(p.id()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unlocked_update_is_refused() {
        let store = InMemoryStore::default();
        let p = seeded(&store, "A-1").await;

        let mut tx = store.begin().await.unwrap();
        assert!(matches!(
            tx.update_product(&p).await,
            Err(StoreError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_sku_conflicts() {
        let store = InMemoryStore::default();
        seeded(&store, "A-1").await;

        let mut tx = store.begin().await.unwrap();
        assert!(matches!(
            tx.insert_product(&product("a-1")).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn alert_is_created_once_per_pair() {
        let store = InMemoryStore::default();
        let p = seeded(&store, "A-1").await;
        let level: StockLevel = p.stock_level(WarehouseId::new());

        let first = LowStockAlert::new(&level, Utc::now());
        let entry = StockReportEntry::for_alert(&first);
        assert!(store.create_alert_if_absent(&first, &entry).await.unwrap());

        let second = LowStockAlert::new(&level, Utc::now());
        let entry = StockReportEntry::for_alert(&second);
        assert!(!store.create_alert_if_absent(&second, &entry).await.unwrap());

        assert_eq!(store.report_entries().await.unwrap().len(), 1);
        let kept = store
            .alert_for(p.id(), level.warehouse_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kept.id, first.id);
    }

    #[tokio::test]
    async fn delivered_alerts_leave_the_pending_set() {
        let store = InMemoryStore::default();
        let p = seeded(&store, "A-1").await;
        let alert = LowStockAlert::new(&p.stock_level(WarehouseId::new()), Utc::now());
        store
            .create_alert_if_absent(&alert, &StockReportEntry::for_alert(&alert))
            .await
            .unwrap();

        let pending = store.unnotified_alerts(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, alert.id);

        assert!(store.mark_alert_notified(alert.id, Utc::now()).await.unwrap());
        assert!(!store.mark_alert_notified(alert.id, Utc::now()).await.unwrap());
        assert!(!store.mark_alert_notified(AlertId::new(), Utc::now()).await.unwrap());
        assert!(store.unnotified_alerts(10).await.unwrap().is_empty());
        let kept = store.alert_for(p.id(), alert.warehouse_id).await.unwrap().unwrap();
        assert!(kept.is_notified());
    }
}
