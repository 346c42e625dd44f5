//! Product and warehouse registration.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use stockroom_auth::{Authorizer, capabilities};
use stockroom_core::{DomainError, DomainResult, PrincipalId, ProductId, WarehouseId};
use stockroom_inventory::{NewProduct, Product, Warehouse, normalize_sku};

use crate::store::{LedgerStore, StoreError};

#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn LedgerStore>,
    authorizer: Arc<dyn Authorizer>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn LedgerStore>, authorizer: Arc<dyn Authorizer>) -> Self {
        Self { store, authorizer }
    }

    /// New products start with nothing on hand.
    pub async fn create_product(&self, input: NewProduct, actor: PrincipalId) -> DomainResult<Product> {
        self.authorizer.ensure(actor, &capabilities::ADD_PRODUCT)?;
        let product = Product::create(ProductId::new(), input, Utc::now())?;

        if self.store.product_by_sku(product.sku()).await?.is_some() {
            return Err(duplicate_sku(product.sku()));
        }

        let mut tx = self.store.begin().await?;
        tx.insert_product(&product).await.map_err(|e| match e {
            StoreError::Conflict(_) => duplicate_sku(product.sku()),
            other => other.into(),
        })?;
        tx.commit().await.map_err(|e| match e {
            StoreError::Conflict(_) => duplicate_sku(product.sku()),
            other => other.into(),
        })?;

        info!(product_id = %product.id(), sku = product.sku(), actor = %actor, "product created");
        Ok(product)
    }

    pub async fn product(&self, id: ProductId) -> DomainResult<Product> {
        self.store
            .product(id)
            .await?
            .ok_or_else(|| DomainError::not_found("product", id))
    }

    pub async fn product_by_sku(&self, sku: &str) -> DomainResult<Product> {
        let sku = normalize_sku(sku);
        self.store
            .product_by_sku(&sku)
            .await?
            .ok_or_else(|| DomainError::not_found("product", sku))
    }

    /// Only allowed once nothing is on hand. Discontinued is final.
    pub async fn discontinue_product(&self, id: ProductId, actor: PrincipalId) -> DomainResult<Product> {
        self.authorizer.ensure(actor, &capabilities::DISCONTINUE_PRODUCT)?;

        let mut tx = self.store.begin().await?;
        let mut product = tx
            .lock_product(id)
            .await?
            .ok_or_else(|| DomainError::not_found("product", id))?;
        product.discontinue(Utc::now())?;
        tx.update_product(&product).await?;
        tx.commit().await?;

        info!(product_id = %id, actor = %actor, "product discontinued");
        Ok(product)
    }

    pub async fn register_warehouse(
        &self,
        code: &str,
        name: &str,
        actor: PrincipalId,
    ) -> DomainResult<Warehouse> {
        self.authorizer.ensure(actor, &capabilities::ADD_WAREHOUSE)?;
        let warehouse = Warehouse::new(WarehouseId::new(), code, name)?;

        let mut tx = self.store.begin().await?;
        tx.insert_warehouse(&warehouse).await?;
        tx.commit().await?;

        info!(warehouse_id = %warehouse.id, code = %warehouse.code, "warehouse registered");
        Ok(warehouse)
    }
}

fn duplicate_sku(sku: &str) -> DomainError {
    DomainError::conflict(format!("product with SKU '{sku}' already exists"))
}
