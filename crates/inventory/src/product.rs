use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{CategoryId, DomainError, DomainResult, MovementId, ProductId, WarehouseId};

use crate::alert::StockLevel;
use crate::movement::{MovementRequest, MovementType, StockMovement};

/// Reorder level applied when a product is created without one.
pub const DEFAULT_REORDER_LEVEL: i64 = 1;

/// Product status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Active,
    Discontinued,
    OutOfStock,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Active => "active",
            ProductStatus::Discontinued => "discontinued",
            ProductStatus::OutOfStock => "out_of_stock",
        }
    }
}

impl FromStr for ProductStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ProductStatus::Active),
            "discontinued" => Ok(ProductStatus::Discontinued),
            "out_of_stock" => Ok(ProductStatus::OutOfStock),
            other => Err(DomainError::validation(format!(
                "unknown product status '{other}'"
            ))),
        }
    }
}

/// SKUs are compared trimmed and upper-cased.
pub fn normalize_sku(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Input for registering a new product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub category_id: CategoryId,
    /// Price in smallest currency unit (e.g., cents).
    pub price: u64,
    pub reorder_level: Option<i64>,
}

/// Persisted shape of a product, used by storage adapters to rehydrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductState {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub category_id: CategoryId,
    pub price: u64,
    pub quantity: i64,
    pub reorder_level: i64,
    pub status: ProductStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Product: owner of the on-hand ledger balance.
///
/// `quantity` has no setter. It only changes through `apply_movement` (or the
/// order fulfillment paths that go through it), which keeps it non-negative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    sku: String,
    name: String,
    category_id: CategoryId,
    price: u64,
    quantity: i64,
    reorder_level: i64,
    status: ProductStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Product {
    pub fn create(id: ProductId, input: NewProduct, now: DateTime<Utc>) -> DomainResult<Self> {
        let sku = normalize_sku(&input.sku);
        if sku.is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if sku.len() > 100 {
            return Err(DomainError::validation("sku cannot exceed 100 characters"));
        }
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        let reorder_level = input.reorder_level.unwrap_or(DEFAULT_REORDER_LEVEL);
        if reorder_level < 0 {
            return Err(DomainError::validation("reorder_level cannot be negative"));
        }

        Ok(Self {
            id,
            sku,
            name,
            category_id: input.category_id,
            price: input.price,
            quantity: 0,
            reorder_level,
            status: ProductStatus::Active,
            created_at: now,
            updated_at: now,
        })
    }

    /// Rehydrate from storage. The stored balance must already satisfy the invariant.
    pub fn restore(state: ProductState) -> DomainResult<Self> {
        if state.quantity < 0 {
            return Err(DomainError::validation(format!(
                "stored quantity for product {} is negative ({})",
                state.id, state.quantity
            )));
        }
        Ok(Self {
            id: state.id,
            sku: state.sku,
            name: state.name,
            category_id: state.category_id,
            price: state.price,
            quantity: state.quantity,
            reorder_level: state.reorder_level,
            status: state.status,
            created_at: state.created_at,
            updated_at: state.updated_at,
        })
    }

    pub fn to_state(&self) -> ProductState {
        ProductState {
            id: self.id,
            sku: self.sku.clone(),
            name: self.name.clone(),
            category_id: self.category_id,
            price: self.price,
            quantity: self.quantity,
            reorder_level: self.reorder_level,
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn id(&self) -> ProductId {
        self.id
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category_id(&self) -> CategoryId {
        self.category_id
    }

    pub fn price(&self) -> u64 {
        self.price
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn reorder_level(&self) -> i64 {
        self.reorder_level
    }

    pub fn status(&self) -> ProductStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_low_stock(&self) -> bool {
        self.quantity <= self.reorder_level
    }

    /// One line of the scheduled low-stock digest.
    pub fn digest_line(&self) -> String {
        format!("{} (SKU: {}) -> {} left", self.name, self.sku, self.quantity)
    }

    /// Snapshot handed to the alert publisher after a movement commits.
    pub fn stock_level(&self, warehouse_id: WarehouseId) -> StockLevel {
        StockLevel {
            product_id: self.id,
            warehouse_id,
            sku: self.sku.clone(),
            product_name: self.name.clone(),
            quantity: self.quantity,
            reorder_level: self.reorder_level,
        }
    }

    /// Fails with `InsufficientStock` unless `needed` units are on hand.
    pub fn ensure_available(&self, needed: i64) -> DomainResult<()> {
        if needed > self.quantity {
            return Err(DomainError::insufficient_stock(self.id, needed, self.quantity));
        }
        Ok(())
    }

    /// Apply one movement and return the ledger entry describing it.
    ///
    /// On error the product is left exactly as it was.
    pub fn apply_movement(
        &mut self,
        request: &MovementRequest,
        now: DateTime<Utc>,
    ) -> DomainResult<StockMovement> {
        if request.product_id != self.id {
            return Err(DomainError::validation("product_id mismatch"));
        }
        request.kind.validate_quantity(request.quantity)?;

        let new_quantity = match request.kind {
            MovementType::In => self
                .quantity
                .checked_add(request.quantity)
                .ok_or_else(|| DomainError::invalid_quantity("quantity overflow"))?,
            MovementType::Out => {
                self.ensure_available(request.quantity)?;
                self.quantity - request.quantity
            }
            MovementType::Adjust => request.quantity,
        };

        self.quantity = new_quantity;
        self.sync_stock_status();
        self.updated_at = now;

        Ok(StockMovement {
            id: MovementId::new(),
            product_id: self.id,
            warehouse_id: request.warehouse_id,
            kind: request.kind,
            quantity: request.quantity,
            resulting_quantity: new_quantity,
            actor: request.actor,
            notes: request.notes.clone(),
            created_at: now,
        })
    }

    /// Discontinuing is only allowed once nothing is on hand.
    pub fn discontinue(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status == ProductStatus::Discontinued {
            return Err(DomainError::invalid_transition(
                "product",
                "discontinue",
                self.status.as_str(),
            ));
        }
        if self.quantity != 0 {
            return Err(DomainError::validation(format!(
                "cannot discontinue product {} with {} units on hand",
                self.sku, self.quantity
            )));
        }
        self.status = ProductStatus::Discontinued;
        self.updated_at = now;
        Ok(())
    }

    fn sync_stock_status(&mut self) {
        self.status = match (self.status, self.quantity) {
            (ProductStatus::Discontinued, _) => ProductStatus::Discontinued,
            (_, 0) => ProductStatus::OutOfStock,
            _ => ProductStatus::Active,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockroom_core::PrincipalId;

    fn new_product(reorder_level: i64) -> Product {
        Product::create(
            ProductId::new(),
            NewProduct {
                sku: "  ssd-001 ".to_string(),
                name: "SSD".to_string(),
                category_id: CategoryId::new(),
                price: 10_000,
                reorder_level: Some(reorder_level),
            },
            Utc::now(),
        )
        .unwrap()
    }

    fn request(product: &Product, kind: MovementType, quantity: i64) -> MovementRequest {
        MovementRequest::new(
            product.id(),
            WarehouseId::new(),
            kind,
            quantity,
            PrincipalId::new(),
        )
    }

    fn stocked(quantity: i64, reorder_level: i64) -> Product {
        let mut product = new_product(reorder_level);
        let req = request(&product, MovementType::In, quantity);
        product.apply_movement(&req, Utc::now()).unwrap();
        product
    }

    #[test]
    fn create_normalizes_sku_and_starts_empty() {
        let product = new_product(5);
        assert_eq!(product.sku(), "SSD-001");
        assert_eq!(product.quantity(), 0);
        assert_eq!(product.status(), ProductStatus::Active);
    }

    #[test]
    fn create_rejects_blank_sku_and_negative_reorder_level() {
        let mut input = NewProduct {
            sku: "   ".to_string(),
            name: "Widget".to_string(),
            category_id: CategoryId::new(),
            price: 0,
            reorder_level: None,
        };
        assert!(matches!(
            Product::create(ProductId::new(), input.clone(), Utc::now()),
            Err(DomainError::Validation(_))
        ));

        input.sku = "W-1".to_string();
        input.reorder_level = Some(-1);
        assert!(matches!(
            Product::create(ProductId::new(), input, Utc::now()),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn default_reorder_level_is_one() {
        let product = Product::create(
            ProductId::new(),
            NewProduct {
                sku: "W-1".to_string(),
                name: "Widget".to_string(),
                category_id: CategoryId::new(),
                price: 100,
                reorder_level: None,
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(product.reorder_level(), DEFAULT_REORDER_LEVEL);
    }

    #[test]
    fn out_beyond_balance_is_rejected_without_change() {
        let mut product = stocked(10, 5);
        let before = product.clone();

        let err = product
            .apply_movement(&request(&product, MovementType::Out, 15), Utc::now())
            .unwrap_err();

        assert_eq!(err, DomainError::insufficient_stock(product.id(), 15, 10));
        assert_eq!(product, before);
    }

    #[test]
    fn out_of_full_balance_reaches_zero_and_marks_out_of_stock() {
        let mut product = stocked(10, 5);
        let movement = product
            .apply_movement(&request(&product, MovementType::Out, 10), Utc::now())
            .unwrap();

        assert_eq!(product.quantity(), 0);
        assert_eq!(movement.resulting_quantity(), 0);
        assert_eq!(product.status(), ProductStatus::OutOfStock);
        assert!(product.is_low_stock());
    }

    #[test]
    fn digest_line_format() {
        let product = stocked(2, 5);
        assert_eq!(product.digest_line(), "SSD (SKU: SSD-001) -> 2 left");
    }

    #[test]
    fn adjust_sets_absolute_balance() {
        let mut product = stocked(42, 5);
        product
            .apply_movement(&request(&product, MovementType::Adjust, 7), Utc::now())
            .unwrap();
        assert_eq!(product.quantity(), 7);
        assert_eq!(product.status(), ProductStatus::Active);
    }

    #[test]
    fn movement_for_other_product_is_rejected() {
        let mut product = stocked(3, 1);
        let other = new_product(1);
        let err = product
            .apply_movement(&request(&other, MovementType::In, 1), Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(product.quantity(), 3);
    }

    #[test]
    fn discontinue_requires_empty_balance() {
        let mut product = stocked(2, 1);
        assert!(matches!(
            product.discontinue(Utc::now()),
            Err(DomainError::Validation(_))
        ));

        product
            .apply_movement(&request(&product, MovementType::Out, 2), Utc::now())
            .unwrap();
        product.discontinue(Utc::now()).unwrap();
        assert_eq!(product.status(), ProductStatus::Discontinued);

        // Stock movements never resurrect a discontinued product.
        product
            .apply_movement(&request(&product, MovementType::In, 1), Utc::now())
            .unwrap();
        assert_eq!(product.status(), ProductStatus::Discontinued);
        assert!(matches!(
            product.discontinue(Utc::now()),
            Err(DomainError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn restore_rejects_negative_balance() {
        let mut state = stocked(1, 1).to_state();
        state.quantity = -1;
        assert!(Product::restore(state).is_err());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn movement() -> impl Strategy<Value = (MovementType, i64)> {
            prop_oneof![
                (Just(MovementType::In), -5i64..50),
                (Just(MovementType::Out), -5i64..50),
                (Just(MovementType::Adjust), -5i64..50),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 500,
                ..ProptestConfig::default()
            })]

            /// Property: no sequence of movements drives the balance negative,
            /// and a rejected movement leaves the product untouched.
            #[test]
            fn quantity_never_negative(moves in proptest::collection::vec(movement(), 0..60)) {
                let mut product = new_product(3);
                for (kind, quantity) in moves {
                    let before = product.clone();
                    let req = request(&product, kind, quantity);
                    match product.apply_movement(&req, Utc::now()) {
                        Ok(m) => prop_assert_eq!(m.resulting_quantity(), product.quantity()),
                        Err(_) => prop_assert_eq!(&product, &before),
                    }
                    prop_assert!(product.quantity() >= 0);
                }
            }

            /// Property: ADJUST to V always yields V regardless of prior balance.
            #[test]
            fn adjust_is_absolute(start in 1i64..1_000, target in 0i64..1_000) {
                let mut product = stocked(start, 0);
                let req = request(&product, MovementType::Adjust, target);
                product.apply_movement(&req, Utc::now()).unwrap();
                prop_assert_eq!(product.quantity(), target);
            }
        }
    }
}
