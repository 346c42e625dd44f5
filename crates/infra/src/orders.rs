//! Order lifecycle: creation, line edits and the status state machine.
//!
//! Every transition runs in one transaction: the order row is locked first,
//! then (for receive/ship) each product row in ascending id order. Two orders
//! touching overlapping products therefore always lock in the same order.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{info, warn};

use stockroom_auth::Authorizer;
use stockroom_core::{CounterpartyId, DomainError, DomainResult, OrderId, PrincipalId, ProductId, WarehouseId};
use stockroom_inventory::{MovementRequest, MovementType, Product};
use stockroom_orders::{
    NewOrderLine, Order, OrderKind, OrderStatus, OrderType, StatusHistoryEntry, Transition,
};

use crate::alerts::AlertPublisher;
use crate::history::StatusHistoryRecorder;
use crate::ledger::apply_locked;
use crate::store::{LedgerStore, LedgerTx};

/// Fields shared by purchase and sale orders at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDraft {
    pub warehouse_id: WarehouseId,
    pub lines: Vec<NewOrderLine>,
    pub notes: Option<String>,
}

impl OrderDraft {
    pub fn new(warehouse_id: WarehouseId, lines: Vec<NewOrderLine>) -> Self {
        Self {
            warehouse_id,
            lines,
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// How a source-state mismatch found under the order lock is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reentry {
    /// Synchronous callers get `InvalidTransition`.
    Reject,
    /// Redelivered jobs find the order already moved on and stop quietly.
    Tolerate,
}

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn LedgerStore>,
    authorizer: Arc<dyn Authorizer>,
    alerts: AlertPublisher,
}

impl OrderService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        authorizer: Arc<dyn Authorizer>,
        alerts: AlertPublisher,
    ) -> Self {
        Self {
            store,
            authorizer,
            alerts,
        }
    }

    pub async fn create_purchase_order(
        &self,
        supplier_id: CounterpartyId,
        expected_date: Option<NaiveDate>,
        draft: OrderDraft,
        actor: PrincipalId,
    ) -> DomainResult<Order> {
        let kind = OrderKind::Purchase {
            supplier_id,
            expected_date,
        };
        self.create(kind, draft, actor).await
    }

    /// Available stock must cover every line at creation time. This is a
    /// point-in-time check, not a reservation; `ship` checks again.
    pub async fn create_sale_order(
        &self,
        customer_id: CounterpartyId,
        draft: OrderDraft,
        actor: PrincipalId,
    ) -> DomainResult<Order> {
        let kind = OrderKind::Sale {
            customer_id,
            shipped_at: None,
        };
        self.create(kind, draft, actor).await
    }

    /// Replace all lines of a draft order.
    pub async fn replace_lines(
        &self,
        order_id: OrderId,
        lines: Vec<NewOrderLine>,
        actor: PrincipalId,
    ) -> DomainResult<Order> {
        let current = self.order(order_id).await?;
        self.authorizer
            .ensure(actor, &current.order_type().change_capability())?;

        let mut tx = self.store.begin().await?;
        let mut order = lock_order(tx.as_mut(), order_id).await?;
        order.replace_lines(lines, Utc::now())?;
        if order.order_type() == OrderType::Sale {
            self.check_available(&order).await?;
        } else {
            self.ensure_products_exist(&order).await?;
        }
        tx.update_order(&order).await?;
        tx.commit().await?;

        info!(order_id = %order_id, lines = order.lines().len(), actor = %actor, "order lines replaced");
        Ok(order)
    }

    pub async fn order(&self, order_id: OrderId) -> DomainResult<Order> {
        self.store
            .order(order_id)
            .await?
            .ok_or_else(|| DomainError::not_found("order", order_id))
    }

    /// Status history, oldest first.
    pub async fn history(&self, order_id: OrderId) -> DomainResult<Vec<StatusHistoryEntry>> {
        self.order(order_id).await?;
        Ok(self.store.order_history(order_id).await?)
    }

    /// Run one named transition. Returns the new status.
    pub async fn transition(
        &self,
        order_id: OrderId,
        transition: Transition,
        actor: PrincipalId,
    ) -> DomainResult<OrderStatus> {
        let order = self.order(order_id).await?;
        let order_type = order.order_type();
        if transition != Transition::Cancel && transition.edge(order_type).is_none() {
            return Err(DomainError::invalid_transition(
                order_type.as_str(),
                transition.as_str(),
                order.status().as_str(),
            ));
        }
        self.authorizer
            .ensure(actor, &transition.capability(order_type))?;

        match self.run_transition(order_id, transition, actor, Reentry::Reject).await {
            Ok(Some(status)) => Ok(status),
            Ok(None) => Err(DomainError::invalid_transition(
                order_type.as_str(),
                transition.as_str(),
                order.status().as_str(),
            )),
            Err(e) => {
                warn!(order_id = %order_id, transition = %transition, error = %e, "order transition rejected");
                Err(e)
            }
        }
    }

    pub async fn confirm(&self, order_id: OrderId, actor: PrincipalId) -> DomainResult<OrderStatus> {
        self.transition(order_id, Transition::Confirm, actor).await
    }

    pub async fn receive(&self, order_id: OrderId, actor: PrincipalId) -> DomainResult<OrderStatus> {
        self.transition(order_id, Transition::Receive, actor).await
    }

    pub async fn ship(&self, order_id: OrderId, actor: PrincipalId) -> DomainResult<OrderStatus> {
        self.transition(order_id, Transition::Ship, actor).await
    }

    pub async fn invoice(&self, order_id: OrderId, actor: PrincipalId) -> DomainResult<OrderStatus> {
        self.transition(order_id, Transition::Invoice, actor).await
    }

    pub async fn complete(&self, order_id: OrderId, actor: PrincipalId) -> DomainResult<OrderStatus> {
        self.transition(order_id, Transition::Complete, actor).await
    }

    pub async fn cancel(&self, order_id: OrderId, actor: PrincipalId) -> DomainResult<OrderStatus> {
        self.transition(order_id, Transition::Cancel, actor).await
    }

    pub(crate) fn authorizer(&self) -> &dyn Authorizer {
        self.authorizer.as_ref()
    }

    /// The transactional part of a transition, without the capability check.
    ///
    /// `Ok(None)` means the order was no longer in the source state and
    /// `reentry` is `Tolerate`.
    pub(crate) async fn run_transition(
        &self,
        order_id: OrderId,
        transition: Transition,
        actor: PrincipalId,
        reentry: Reentry,
    ) -> DomainResult<Option<OrderStatus>> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let mut order = lock_order(tx.as_mut(), order_id).await?;

        if let Err(e) = order.check_transition(transition) {
            if reentry == Reentry::Tolerate && matches!(e, DomainError::InvalidTransition { .. }) {
                info!(
                    order_id = %order_id,
                    transition = %transition,
                    status = %order.status(),
                    "order already processed"
                );
                return Ok(None);
            }
            return Err(e);
        }

        let touched = if transition.touches_ledger() {
            move_stock(tx.as_mut(), &order, transition, actor, now).await?
        } else {
            Vec::new()
        };

        let change = order.apply_transition(transition, now)?;
        tx.update_order(&order).await?;
        StatusHistoryRecorder::record(tx.as_mut(), order.order_type(), order_id, change, actor, now)
            .await?;
        tx.commit().await?;

        info!(
            order_id = %order_id,
            order_type = %order.order_type(),
            from = %change.from,
            to = %change.to,
            actor = %actor,
            "order transition committed"
        );
        self.evaluate_alerts(&touched, order.warehouse_id()).await;
        Ok(Some(change.to))
    }

    /// Move a failed fulfillment to `cancelled`. No-op on terminal orders.
    pub(crate) async fn cancel_after_failure(
        &self,
        order_id: OrderId,
        actor: PrincipalId,
        reason: &str,
    ) -> DomainResult<bool> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let mut order = lock_order(tx.as_mut(), order_id).await?;
        if order.status().is_terminal() {
            return Ok(false);
        }

        let change = order.apply_transition(Transition::Cancel, now)?;
        tx.update_order(&order).await?;
        StatusHistoryRecorder::record(tx.as_mut(), order.order_type(), order_id, change, actor, now)
            .await?;
        tx.commit().await?;

        warn!(order_id = %order_id, from = %change.from, reason = %reason, "order cancelled after failed fulfillment");
        Ok(true)
    }

    async fn create(&self, kind: OrderKind, draft: OrderDraft, actor: PrincipalId) -> DomainResult<Order> {
        let order_type = kind.order_type();
        self.authorizer.ensure(actor, &order_type.create_capability())?;

        if self.store.warehouse(draft.warehouse_id).await?.is_none() {
            return Err(DomainError::not_found("warehouse", draft.warehouse_id));
        }

        let order = Order::create(
            OrderId::new(),
            draft.warehouse_id,
            kind,
            actor,
            draft.lines,
            draft.notes,
            Utc::now(),
        )?;
        if order_type == OrderType::Sale {
            self.check_available(&order).await?;
        } else {
            self.ensure_products_exist(&order).await?;
        }

        let mut tx = self.store.begin().await?;
        tx.insert_order(&order).await?;
        tx.commit().await?;

        info!(
            order_id = %order.id(),
            order_type = %order_type,
            lines = order.lines().len(),
            total = order.total(),
            actor = %actor,
            "order created"
        );
        Ok(order)
    }

    async fn ensure_products_exist(&self, order: &Order) -> DomainResult<()> {
        for product_id in order.stock_demand()?.into_keys() {
            self.load_product(product_id).await?;
        }
        Ok(())
    }

    async fn check_available(&self, order: &Order) -> DomainResult<()> {
        for (product_id, needed) in order.stock_demand()? {
            self.load_product(product_id).await?.ensure_available(needed)?;
        }
        Ok(())
    }

    async fn load_product(&self, product_id: ProductId) -> DomainResult<Product> {
        self.store
            .product(product_id)
            .await?
            .ok_or_else(|| DomainError::not_found("product", product_id))
    }

    async fn evaluate_alerts(&self, products: &[Product], warehouse_id: WarehouseId) {
        for product in products {
            if let Err(e) = self.alerts.evaluate(&product.stock_level(warehouse_id)).await {
                warn!(product_id = %product.id(), error = %e, "low-stock evaluation failed");
            }
        }
    }
}

async fn lock_order(tx: &mut dyn LedgerTx, order_id: OrderId) -> DomainResult<Order> {
    tx.lock_order(order_id)
        .await?
        .ok_or_else(|| DomainError::not_found("order", order_id))
}

/// Lock every product of the order and post one movement per line.
///
/// For ship, every product's total demand is checked before any line is
/// applied. Returns the products as they stand after the movements.
async fn move_stock(
    tx: &mut dyn LedgerTx,
    order: &Order,
    transition: Transition,
    actor: PrincipalId,
    now: DateTime<Utc>,
) -> DomainResult<Vec<Product>> {
    let kind = match transition {
        Transition::Receive => MovementType::In,
        Transition::Ship => MovementType::Out,
        other => {
            return Err(DomainError::validation(format!(
                "transition {other} has no stock effect"
            )));
        }
    };

    // BTreeMap: ascending product id is the lock order.
    let mut locked = BTreeMap::new();
    for (product_id, needed) in order.stock_demand()? {
        let product = tx
            .lock_product(product_id)
            .await?
            .ok_or_else(|| DomainError::not_found("product", product_id))?;
        if kind == MovementType::Out {
            product.ensure_available(needed)?;
        }
        locked.insert(product_id, product);
    }

    for line in order.lines() {
        let product = locked
            .get_mut(&line.product_id)
            .ok_or_else(|| DomainError::not_found("product", line.product_id))?;
        let request = MovementRequest::new(
            line.product_id,
            order.warehouse_id(),
            kind,
            line.quantity,
            actor,
        )
        .with_notes(format!(
            "{} {} line {}",
            order.order_type(),
            order.id(),
            line.line_no
        ));
        apply_locked(tx, product, &request, now).await?;
    }

    Ok(locked.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use stockroom_orders::LineStatus;

    #[tokio::test]
    async fn confirm_records_history() {
        let h = Harness::new().await;
        let product = h.product("P-1", 0, 1).await;
        let order = h.purchase_order(&[(product, 4)]).await;

        assert_eq!(h.orders.confirm(order, h.manager).await.unwrap(), OrderStatus::Confirmed);
        let history = h.orders.history(order).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].old_status, OrderStatus::Draft);
        assert_eq!(history[0].new_status, OrderStatus::Confirmed);
        assert_eq!(history[0].actor, h.manager);
    }

    #[tokio::test]
    async fn illegal_transition_changes_nothing() {
        let h = Harness::new().await;
        let product = h.product("P-1", 10, 1).await;
        let order = h.sale_order(&[(product, 2)]).await;

        let err = h.orders.ship(order, h.manager).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
        let err = h.orders.receive(order, h.manager).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));

        assert_eq!(h.orders.order(order).await.unwrap().status(), OrderStatus::Draft);
        assert_eq!(h.quantity(product).await, 10);
        assert!(h.orders.history(order).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn transition_requires_capability_for_order_type() {
        let h = Harness::new().await;
        let product = h.product("P-1", 10, 1).await;
        let order = h.purchase_order(&[(product, 2)]).await;

        // Salespeople may confirm sale orders, not purchase orders.
        let err = h.orders.confirm(order, h.salesperson).await.unwrap_err();
        assert!(matches!(err, DomainError::PermissionDenied { .. }));
        assert_eq!(h.orders.order(order).await.unwrap().status(), OrderStatus::Draft);
    }

    #[tokio::test]
    async fn sale_creation_checks_available_stock() {
        let h = Harness::new().await;
        let product = h.product("P-1", 3, 1).await;

        let err = h
            .orders
            .create_sale_order(
                CounterpartyId::new(),
                OrderDraft::new(h.warehouse.id, vec![NewOrderLine::new(product, 4, 100)]),
                h.manager,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InsufficientStock { needed: 4, available: 3, .. }));
    }

    #[tokio::test]
    async fn overflowing_line_totals_are_rejected_on_create() {
        let h = Harness::new().await;
        let product = h.product("P-1", 10, 1).await;
        let lines = || {
            vec![
                NewOrderLine::new(product, i64::MAX, 1),
                NewOrderLine::new(product, 2, 1),
            ]
        };

        let err = h
            .orders
            .create_sale_order(
                CounterpartyId::new(),
                OrderDraft::new(h.warehouse.id, lines()),
                h.manager,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidQuantity(_)));

        let err = h
            .orders
            .create_purchase_order(
                CounterpartyId::new(),
                None,
                OrderDraft::new(h.warehouse.id, lines()),
                h.manager,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidQuantity(_)));
        assert_eq!(h.quantity(product).await, 10);
    }

    #[tokio::test]
    async fn lines_are_editable_only_in_draft() {
        let h = Harness::new().await;
        let product = h.product("P-1", 10, 1).await;
        let order = h.sale_order(&[(product, 2)]).await;

        let updated = h
            .orders
            .replace_lines(
                order,
                vec![NewOrderLine::new(product, 3, 100).with_discount(50)],
                h.manager,
            )
            .await
            .unwrap();
        assert_eq!(updated.total(), 250);

        h.orders.confirm(order, h.manager).await.unwrap();
        let err = h
            .orders
            .replace_lines(order, vec![NewOrderLine::new(product, 1, 100)], h.manager)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn cancel_has_no_stock_effect_and_is_final() {
        let h = Harness::new().await;
        let product = h.product("P-1", 10, 1).await;
        let order = h.sale_order(&[(product, 2)]).await;
        h.orders.confirm(order, h.manager).await.unwrap();

        assert_eq!(h.orders.cancel(order, h.manager).await.unwrap(), OrderStatus::Cancelled);
        assert_eq!(h.quantity(product).await, 10);
        let cancelled = h.orders.order(order).await.unwrap();
        assert!(cancelled.lines().iter().all(|l| l.status == LineStatus::Cancelled));

        let err = h.orders.cancel(order, h.manager).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn full_sale_lifecycle() {
        let h = Harness::new().await;
        let a = h.product("A-1", 10, 1).await;
        let b = h.product("B-1", 10, 1).await;
        // Two lines on the same product are checked against their sum.
        let order = h.sale_order(&[(a, 3), (b, 2), (a, 4)]).await;

        h.orders.confirm(order, h.manager).await.unwrap();
        assert_eq!(h.orders.ship(order, h.clerk).await.unwrap(), OrderStatus::Shipped);
        assert_eq!(h.quantity(a).await, 3);
        assert_eq!(h.quantity(b).await, 8);
        let shipped = h.orders.order(order).await.unwrap();
        assert!(shipped.shipped_at().is_some());
        assert!(shipped.lines().iter().all(|l| l.status == LineStatus::Shipped));

        h.orders.invoice(order, h.manager).await.unwrap();
        assert_eq!(h.orders.complete(order, h.manager).await.unwrap(), OrderStatus::Completed);
        assert_eq!(h.quantity(a).await, 3);

        let statuses: Vec<_> = h
            .orders
            .history(order)
            .await
            .unwrap()
            .iter()
            .map(|e| e.new_status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                OrderStatus::Confirmed,
                OrderStatus::Shipped,
                OrderStatus::Invoiced,
                OrderStatus::Completed,
            ]
        );
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let h = Harness::new().await;
        let err = h.orders.confirm(OrderId::new(), h.manager).await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound { entity: "order", .. }));
    }
}
