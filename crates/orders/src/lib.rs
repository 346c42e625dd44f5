//! Order fulfillment domain.
//!
//! Purchase and sale orders share one `Order` aggregate; the `OrderKind` tag
//! decides which transitions exist. Ledger effects of receive/ship are applied
//! by `stockroom-infra`, which drives these rules inside one transaction.

pub mod history;
pub mod order;
pub mod status;

pub use history::StatusHistoryEntry;
pub use order::{NewOrderLine, Order, OrderHeader, OrderKind, OrderLine, StatusChange};
pub use status::{LineStatus, OrderStatus, OrderType, Transition};
