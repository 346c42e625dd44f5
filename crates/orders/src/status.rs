use core::str::FromStr;

use serde::{Deserialize, Serialize};

use stockroom_auth::{Permission, capabilities};
use stockroom_core::DomainError;

/// Which order aggregate a value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Purchase,
    Sale,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Purchase => "purchase_order",
            OrderType::Sale => "sale_order",
        }
    }

    pub fn create_capability(&self) -> Permission {
        match self {
            OrderType::Purchase => capabilities::CREATE_PURCHASE_ORDER,
            OrderType::Sale => capabilities::CREATE_SALE_ORDER,
        }
    }

    pub fn change_capability(&self) -> Permission {
        match self {
            OrderType::Purchase => capabilities::CHANGE_PURCHASE_ORDER,
            OrderType::Sale => capabilities::CHANGE_SALE_ORDER,
        }
    }
}

impl core::fmt::Display for OrderType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase_order" => Ok(OrderType::Purchase),
            "sale_order" => Ok(OrderType::Sale),
            other => Err(DomainError::validation(format!("unknown order type '{other}'"))),
        }
    }
}

/// Order status lifecycle.
///
/// `draft -> confirmed -> {received | shipped -> invoiced} -> completed`, with
/// `cancelled` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Draft,
    Confirmed,
    Received,
    Shipped,
    Invoiced,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Draft => "draft",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Received => "received",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Invoiced => "invoiced",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(OrderStatus::Draft),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "received" => Ok(OrderStatus::Received),
            "shipped" => Ok(OrderStatus::Shipped),
            "invoiced" => Ok(OrderStatus::Invoiced),
            "completed" => Ok(OrderStatus::Completed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown order status '{other}'"
            ))),
        }
    }
}

/// Named lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Confirm,
    Receive,
    Ship,
    Invoice,
    Complete,
    Cancel,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Confirm => "confirm",
            Transition::Receive => "receive",
            Transition::Ship => "ship",
            Transition::Invoice => "invoice",
            Transition::Complete => "complete",
            Transition::Cancel => "cancel",
        }
    }

    /// Receive and ship move stock; everything else is status only.
    pub fn touches_ledger(&self) -> bool {
        matches!(self, Transition::Receive | Transition::Ship)
    }

    /// Source and target status for this transition on the given order type.
    ///
    /// `None` when the transition does not exist for the type (e.g. shipping a
    /// purchase order). Cancel is handled separately since its source is any
    /// non-terminal state.
    pub fn edge(&self, order_type: OrderType) -> Option<(OrderStatus, OrderStatus)> {
        use OrderStatus::*;
        match (self, order_type) {
            (Transition::Confirm, _) => Some((Draft, Confirmed)),
            (Transition::Receive, OrderType::Purchase) => Some((Confirmed, Received)),
            (Transition::Complete, OrderType::Purchase) => Some((Received, Completed)),
            (Transition::Ship, OrderType::Sale) => Some((Confirmed, Shipped)),
            (Transition::Invoice, OrderType::Sale) => Some((Shipped, Invoiced)),
            (Transition::Complete, OrderType::Sale) => Some((Invoiced, Completed)),
            _ => None,
        }
    }

    /// Capability the acting principal needs, scoped to the order type.
    pub fn capability(&self, order_type: OrderType) -> Permission {
        match (self, order_type) {
            (Transition::Confirm, OrderType::Purchase) => capabilities::CONFIRM_PURCHASE_ORDER,
            (Transition::Receive, OrderType::Purchase) => capabilities::RECEIVE_PURCHASE_ORDER,
            (Transition::Complete, OrderType::Purchase) => capabilities::COMPLETE_PURCHASE_ORDER,
            (Transition::Cancel, OrderType::Purchase) => capabilities::CANCEL_PURCHASE_ORDER,
            (Transition::Confirm, OrderType::Sale) => capabilities::CONFIRM_SALE_ORDER,
            (Transition::Ship, OrderType::Sale) => capabilities::SHIP_SALE_ORDER,
            (Transition::Invoice, OrderType::Sale) => capabilities::INVOICE_SALE_ORDER,
            (Transition::Complete, OrderType::Sale) => capabilities::COMPLETE_SALE_ORDER,
            (Transition::Cancel, OrderType::Sale) => capabilities::CANCEL_SALE_ORDER,
            // Nonexistent edges still need a name to deny against.
            (t, ty) => Permission::new(format!("orders.{}_{}", t.as_str(), ty.as_str())),
        }
    }
}

impl core::fmt::Display for Transition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transition {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "confirm" => Ok(Transition::Confirm),
            "receive" => Ok(Transition::Receive),
            "ship" => Ok(Transition::Ship),
            "invoice" => Ok(Transition::Invoice),
            "complete" => Ok(Transition::Complete),
            "cancel" => Ok(Transition::Cancel),
            other => Err(DomainError::validation(format!(
                "unknown transition '{other}'"
            ))),
        }
    }
}

/// Per-line fulfillment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineStatus {
    Pending,
    Received,
    Shipped,
    Cancelled,
}

impl LineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineStatus::Pending => "pending",
            LineStatus::Received => "received",
            LineStatus::Shipped => "shipped",
            LineStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for LineStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LineStatus::Pending),
            "received" => Ok(LineStatus::Received),
            "shipped" => Ok(LineStatus::Shipped),
            "cancelled" => Ok(LineStatus::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown line status '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_specific_edges() {
        assert_eq!(Transition::Receive.edge(OrderType::Sale), None);
        assert_eq!(Transition::Ship.edge(OrderType::Purchase), None);
        assert_eq!(Transition::Invoice.edge(OrderType::Purchase), None);
        assert_eq!(
            Transition::Complete.edge(OrderType::Sale),
            Some((OrderStatus::Invoiced, OrderStatus::Completed))
        );
    }

    #[test]
    fn capabilities_are_scoped_by_order_type() {
        assert_eq!(
            Transition::Confirm.capability(OrderType::Purchase).as_str(),
            "orders.confirm_purchase_order"
        );
        assert_eq!(
            Transition::Confirm.capability(OrderType::Sale).as_str(),
            "orders.confirm_sale_order"
        );
        assert_eq!(
            Transition::Ship.capability(OrderType::Sale).as_str(),
            "orders.ship_sale_order"
        );
    }

    #[test]
    fn transition_names_parse_case_insensitively() {
        assert_eq!(" Ship ".parse::<Transition>().unwrap(), Transition::Ship);
        assert!("teleport".parse::<Transition>().is_err());
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            OrderStatus::Draft,
            OrderStatus::Confirmed,
            OrderStatus::Received,
            OrderStatus::Shipped,
            OrderStatus::Invoiced,
            OrderStatus::Completed,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
    }
}
