use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Capability name such as `"inventory.adjust_stock"`. `"*"` grants everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Capabilities checked by the ledger and the order state machine.
pub mod capabilities {
    use super::Permission;

    pub const WILDCARD: Permission = Permission::from_static("*");

    /// IN / OUT movements.
    pub const TRANSACT_STOCK: Permission =
        Permission::from_static("inventory.create_stock_transaction");
    /// ADJUST movements (administrative).
    pub const ADJUST_STOCK: Permission = Permission::from_static("inventory.adjust_stock");
    pub const ADD_PRODUCT: Permission = Permission::from_static("inventory.add_product");
    pub const DISCONTINUE_PRODUCT: Permission =
        Permission::from_static("inventory.discontinue_product");
    pub const ADD_WAREHOUSE: Permission = Permission::from_static("inventory.add_warehouse");

    pub const CREATE_PURCHASE_ORDER: Permission =
        Permission::from_static("orders.create_purchaseorder");
    pub const CHANGE_PURCHASE_ORDER: Permission =
        Permission::from_static("orders.change_purchaseorder");
    pub const CONFIRM_PURCHASE_ORDER: Permission =
        Permission::from_static("orders.confirm_purchase_order");
    pub const RECEIVE_PURCHASE_ORDER: Permission =
        Permission::from_static("orders.receive_purchase_order");
    pub const COMPLETE_PURCHASE_ORDER: Permission =
        Permission::from_static("orders.complete_purchase_order");
    pub const CANCEL_PURCHASE_ORDER: Permission =
        Permission::from_static("orders.cancel_purchase_order");

    pub const CREATE_SALE_ORDER: Permission = Permission::from_static("orders.create_saleorder");
    pub const CHANGE_SALE_ORDER: Permission = Permission::from_static("orders.change_saleorder");
    pub const CONFIRM_SALE_ORDER: Permission =
        Permission::from_static("orders.confirm_sale_order");
    pub const SHIP_SALE_ORDER: Permission = Permission::from_static("orders.ship_sale_order");
    pub const INVOICE_SALE_ORDER: Permission =
        Permission::from_static("orders.invoice_sale_order");
    pub const COMPLETE_SALE_ORDER: Permission =
        Permission::from_static("orders.complete_sale_order");
    pub const CANCEL_SALE_ORDER: Permission = Permission::from_static("orders.cancel_sale_order");
}
