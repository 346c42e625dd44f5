//! Inventory ledger domain.
//!
//! Pure, deterministic rules for products and stock movements (no IO, no
//! storage). Persisting and locking live in `stockroom-infra`.

pub mod alert;
pub mod movement;
pub mod product;
pub mod warehouse;

pub use alert::{LowStockAlert, StockLevel, StockReportEntry};
pub use movement::{MovementRequest, MovementState, MovementType, StockMovement};
pub use product::{
    DEFAULT_REORDER_LEVEL, NewProduct, Product, ProductState, ProductStatus, normalize_sku,
};
pub use warehouse::Warehouse;
