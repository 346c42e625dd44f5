//! Persistence for the ledger, orders and alerts.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryStore;
pub use postgres::{PgLedgerTx, PgStore};
pub use r#trait::{AlertStore, LedgerStore, LedgerTx, StoreError};
