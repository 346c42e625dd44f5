//! Ledger engine: the only path by which a product's quantity changes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use stockroom_auth::{Authorizer, capabilities};
use stockroom_core::{DomainError, DomainResult, MovementId, PrincipalId, ProductId, WarehouseId};
use stockroom_inventory::{MovementRequest, MovementType, Product, StockMovement};

use crate::alerts::AlertPublisher;
use crate::store::{LedgerStore, LedgerTx};

/// What a committed movement reports back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovementReceipt {
    pub movement_id: MovementId,
    pub new_quantity: i64,
}

#[derive(Clone)]
pub struct LedgerEngine {
    store: Arc<dyn LedgerStore>,
    authorizer: Arc<dyn Authorizer>,
    alerts: AlertPublisher,
}

impl LedgerEngine {
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

    /// Apply one movement in its own transaction.
    ///
    /// The product row is locked before its quantity is read. Movement and
    /// balance commit together; the alert check runs after the commit.
    pub async fn apply_movement(&self, request: MovementRequest) -> DomainResult<MovementReceipt> {
        match self.apply_in_tx(&request).await {
            Ok((movement, product)) => {
                info!(
                    movement_id = %movement.id(),
                    product_id = %movement.product_id(),
                    warehouse_id = %movement.warehouse_id(),
                    kind = %movement.kind(),
                    quantity = movement.quantity(),
                    new_quantity = movement.resulting_quantity(),
                    actor = %movement.actor(),
                    "stock movement committed"
                );
                let level = product.stock_level(request.warehouse_id);
                if let Err(e) = self.alerts.evaluate(&level).await {
                    warn!(product_id = %product.id(), error = %e, "low-stock evaluation failed");
                }
                Ok(MovementReceipt {
                    movement_id: movement.id(),
                    new_quantity: movement.resulting_quantity(),
                })
            }
            Err(e) => {
                warn!(
                    product_id = %request.product_id,
                    kind = %request.kind,
                    quantity = request.quantity,
                    error = %e,
                    "stock movement rejected"
                );
                Err(e)
            }
        }
    }

    pub async fn increase(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        quantity: i64,
        actor: PrincipalId,
    ) -> DomainResult<MovementReceipt> {
        self.apply_movement(MovementRequest::new(
            product_id,
            warehouse_id,
            MovementType::In,
            quantity,
            actor,
        ))
        .await
    }

    pub async fn decrease(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        quantity: i64,
        actor: PrincipalId,
    ) -> DomainResult<MovementReceipt> {
        self.apply_movement(MovementRequest::new(
            product_id,
            warehouse_id,
            MovementType::Out,
            quantity,
            actor,
        ))
        .await
    }

    /// Set the balance to `quantity`.
    pub async fn adjust(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        quantity: i64,
        actor: PrincipalId,
    ) -> DomainResult<MovementReceipt> {
        self.apply_movement(MovementRequest::new(
            product_id,
            warehouse_id,
            MovementType::Adjust,
            quantity,
            actor,
        ))
        .await
    }

    /// Movements of one product, newest first.
    pub async fn stock_history(
        &self,
        product_id: ProductId,
        limit: usize,
    ) -> DomainResult<Vec<StockMovement>> {
        if self.store.product(product_id).await?.is_none() {
            return Err(DomainError::not_found("product", product_id));
        }
        Ok(self.store.movements(product_id, limit).await?)
    }

    async fn apply_in_tx(&self, request: &MovementRequest) -> DomainResult<(StockMovement, Product)> {
        request.kind.validate_quantity(request.quantity)?;
        let capability = match request.kind {
            MovementType::Adjust => capabilities::ADJUST_STOCK,
            MovementType::In | MovementType::Out => capabilities::TRANSACT_STOCK,
        };
        self.authorizer.ensure(request.actor, &capability)?;

        if self.store.warehouse(request.warehouse_id).await?.is_none() {
            return Err(DomainError::not_found("warehouse", request.warehouse_id));
        }

        let mut tx = self.store.begin().await?;
        let mut product = tx
            .lock_product(request.product_id)
            .await?
            .ok_or_else(|| DomainError::not_found("product", request.product_id))?;
        let movement = apply_locked(tx.as_mut(), &mut product, request, Utc::now()).await?;
        tx.commit().await?;
        Ok((movement, product))
    }
}

/// Apply a movement to a product already locked by `tx` and stage both writes.
pub(crate) async fn apply_locked(
    tx: &mut dyn LedgerTx,
    product: &mut Product,
    request: &MovementRequest,
    now: DateTime<Utc>,
) -> DomainResult<StockMovement> {
    let movement = product.apply_movement(request, now)?;
    tx.insert_movement(&movement).await?;
    tx.update_product(product).await?;
    Ok(movement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{InMemoryJobStore, RetryPolicy};
    use crate::store::InMemoryStore;
    use stockroom_auth::{DirectoryAuthorizer, Principal, RolePolicy, Role};
    use stockroom_core::CategoryId;
    use stockroom_inventory::{NewProduct, Warehouse};

    struct Fixture {
        ledger: LedgerEngine,
        store: InMemoryStore,
        admin: PrincipalId,
        clerk: PrincipalId,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    }

    async fn fixture(initial: i64) -> Fixture {
        let store = InMemoryStore::default();
        let authorizer = Arc::new(DirectoryAuthorizer::new(RolePolicy::standard()));
        let admin = PrincipalId::new();
        let clerk = PrincipalId::new();
        authorizer.register(Principal::new(admin).with_role(Role::ADMIN));
        authorizer.register(Principal::new(clerk).with_role(Role::WAREHOUSE));

        let warehouse = Warehouse::new(WarehouseId::new(), "main", "Main").unwrap();
        let mut product = Product::create(
            ProductId::new(),
            NewProduct {
                sku: "w-1".to_string(),
                name: "Widget".to_string(),
                category_id: CategoryId::new(),
                price: 250,
                reorder_level: Some(5),
            },
            Utc::now(),
        )
        .unwrap();
        if initial > 0 {
            let seed = MovementRequest::new(
                product.id(),
                warehouse.id,
                MovementType::In,
                initial,
                admin,
            );
            product.apply_movement(&seed, Utc::now()).unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        tx.insert_warehouse(&warehouse).await.unwrap();
        tx.insert_product(&product).await.unwrap();
        tx.commit().await.unwrap();

        let alerts = AlertPublisher::new(
            Arc::new(store.clone()),
            InMemoryJobStore::arc(),
            RetryPolicy::default(),
            vec![],
        );
        let ledger = LedgerEngine::new(Arc::new(store.clone()), authorizer, alerts);
        Fixture {
            ledger,
            store,
            admin,
            clerk,
            product_id: product.id(),
            warehouse_id: warehouse.id,
        }
    }

    async fn quantity(f: &Fixture) -> i64 {
        f.store.product(f.product_id).await.unwrap().unwrap().quantity()
    }

    #[tokio::test]
    async fn movement_and_balance_commit_together() {
        let f = fixture(10).await;

        let receipt = f
            .ledger
            .decrease(f.product_id, f.warehouse_id, 4, f.clerk)
            .await
            .unwrap();
        assert_eq!(receipt.new_quantity, 6);
        assert_eq!(quantity(&f).await, 6);

        let history = f.ledger.stock_history(f.product_id, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id(), receipt.movement_id);
        assert_eq!(history[0].resulting_quantity(), 6);
    }

    #[tokio::test]
    async fn adjust_sets_absolute_balance() {
        let f = fixture(10).await;

        let receipt = f.ledger.adjust(f.product_id, f.warehouse_id, 3, f.admin).await.unwrap();
        assert_eq!(receipt.new_quantity, 3);
        let receipt = f.ledger.adjust(f.product_id, f.warehouse_id, 3, f.admin).await.unwrap();
        assert_eq!(receipt.new_quantity, 3);
    }

    #[tokio::test]
    async fn negative_adjust_is_invalid_quantity() {
        let f = fixture(10).await;

        let err = f
            .ledger
            .adjust(f.product_id, f.warehouse_id, -1, f.admin)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidQuantity(_)));
        assert_eq!(quantity(&f).await, 10);
    }

    #[tokio::test]
    async fn unknown_warehouse_and_product_are_not_found() {
        let f = fixture(10).await;

        let err = f
            .ledger
            .increase(f.product_id, WarehouseId::new(), 1, f.clerk)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound { entity: "warehouse", .. }));

        let err = f
            .ledger
            .increase(ProductId::new(), f.warehouse_id, 1, f.clerk)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound { entity: "product", .. }));
        assert!(f.store.all_movements().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unregistered_actor_cannot_transact() {
        let f = fixture(10).await;

        let err = f
            .ledger
            .increase(f.product_id, f.warehouse_id, 1, PrincipalId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::PermissionDenied { .. }));
    }
}
