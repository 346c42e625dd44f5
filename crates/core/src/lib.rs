//! `stockroom-core`: ids and the error model shared by every ledger and order crate.
//!
//! Pure domain; no IO.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{
    AlertId, CategoryId, CounterpartyId, HistoryEntryId, MovementId, OrderId, PrincipalId,
    ProductId, WarehouseId,
};
