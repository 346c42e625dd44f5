use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{
    CounterpartyId, DomainError, DomainResult, OrderId, PrincipalId, ProductId, WarehouseId,
};

use crate::status::{LineStatus, OrderStatus, OrderType, Transition};

/// Line input for create / replace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderLine {
    pub product_id: ProductId,
    pub quantity: i64,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: u64,
    /// Sale lines only.
    pub discount: u64,
}

impl NewOrderLine {
    pub fn new(product_id: ProductId, quantity: i64, unit_price: u64) -> Self {
        Self {
            product_id,
            quantity,
            unit_price,
            discount: 0,
        }
    }

    pub fn with_discount(mut self, discount: u64) -> Self {
        self.discount = discount;
        self
    }
}

/// Order line: product, quantity, unit price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: u64,
    pub discount: u64,
    pub status: LineStatus,
}

impl OrderLine {
    /// `quantity * unit_price - discount`, floored at zero.
    pub fn line_total(&self) -> u64 {
        let gross = u64::try_from(self.quantity)
            .unwrap_or(0)
            .saturating_mul(self.unit_price);
        gross.saturating_sub(self.discount)
    }
}

/// Fields shared by purchase and sale orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderHeader {
    pub id: OrderId,
    pub warehouse_id: WarehouseId,
    pub status: OrderStatus,
    pub created_by: PrincipalId,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Kind-specific data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderKind {
    Purchase {
        supplier_id: CounterpartyId,
        expected_date: Option<NaiveDate>,
    },
    Sale {
        customer_id: CounterpartyId,
        shipped_at: Option<DateTime<Utc>>,
    },
}

impl OrderKind {
    pub fn order_type(&self) -> OrderType {
        match self {
            OrderKind::Purchase { .. } => OrderType::Purchase,
            OrderKind::Sale { .. } => OrderType::Sale,
        }
    }

    pub fn counterparty_id(&self) -> CounterpartyId {
        match self {
            OrderKind::Purchase { supplier_id, .. } => *supplier_id,
            OrderKind::Sale { customer_id, .. } => *customer_id,
        }
    }
}

/// Result of a successful transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub from: OrderStatus,
    pub to: OrderStatus,
}

/// Order aggregate: shared header, kind tag, owned lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    header: OrderHeader,
    kind: OrderKind,
    lines: Vec<OrderLine>,
}

impl Order {
    pub fn create(
        id: OrderId,
        warehouse_id: WarehouseId,
        kind: OrderKind,
        created_by: PrincipalId,
        lines: Vec<NewOrderLine>,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let lines = build_lines(kind.order_type(), lines)?;
        Ok(Self {
            header: OrderHeader {
                id,
                warehouse_id,
                status: OrderStatus::Draft,
                created_by,
                notes,
                created_at: now,
                updated_at: now,
            },
            kind,
            lines,
        })
    }

    /// Rehydrate from storage.
    pub fn from_parts(header: OrderHeader, kind: OrderKind, lines: Vec<OrderLine>) -> Self {
        Self {
            header,
            kind,
            lines,
        }
    }

    pub fn id(&self) -> OrderId {
        self.header.id
    }

    pub fn header(&self) -> &OrderHeader {
        &self.header
    }

    pub fn kind(&self) -> &OrderKind {
        &self.kind
    }

    pub fn order_type(&self) -> OrderType {
        self.kind.order_type()
    }

    pub fn status(&self) -> OrderStatus {
        self.header.status
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.header.warehouse_id
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn shipped_at(&self) -> Option<DateTime<Utc>> {
        match &self.kind {
            OrderKind::Sale { shipped_at, .. } => *shipped_at,
            OrderKind::Purchase { .. } => None,
        }
    }

    pub fn total(&self) -> u64 {
        self.lines
            .iter()
            .fold(0u64, |acc, line| acc.saturating_add(line.line_total()))
    }

    pub fn is_modifiable(&self) -> bool {
        self.header.status == OrderStatus::Draft
    }

    /// Units per product, ascending by product id (the lock order).
    pub fn stock_demand(&self) -> DomainResult<BTreeMap<ProductId, i64>> {
        let mut demand = BTreeMap::new();
        for line in &self.lines {
            let total: &mut i64 = demand.entry(line.product_id).or_insert(0);
            *total = total.checked_add(line.quantity).ok_or_else(|| {
                DomainError::invalid_quantity(format!(
                    "combined quantity for product {} overflows",
                    line.product_id
                ))
            })?;
        }
        Ok(demand)
    }

    /// Replace all lines. Draft orders only.
    pub fn replace_lines(&mut self, lines: Vec<NewOrderLine>, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.is_modifiable() {
            return Err(self.invalid("update"));
        }
        self.lines = build_lines(self.order_type(), lines)?;
        self.header.updated_at = now;
        Ok(())
    }

    /// Target status if `transition` is legal from the current status.
    ///
    /// Pure check; nothing changes.
    pub fn check_transition(&self, transition: Transition) -> DomainResult<OrderStatus> {
        let current = self.header.status;
        if transition == Transition::Cancel {
            if current.is_terminal() {
                return Err(self.invalid(transition.as_str()));
            }
            return Ok(OrderStatus::Cancelled);
        }
        match transition.edge(self.order_type()) {
            Some((from, to)) if from == current => Ok(to),
            _ => Err(self.invalid(transition.as_str())),
        }
    }

    /// Move to the next status. Line statuses follow receive, ship and cancel.
    ///
    /// On error the order is left untouched.
    pub fn apply_transition(
        &mut self,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> DomainResult<StatusChange> {
        let to = self.check_transition(transition)?;
        let from = self.header.status;

        let line_status = match transition {
            Transition::Receive => Some(LineStatus::Received),
            Transition::Ship => Some(LineStatus::Shipped),
            Transition::Cancel => Some(LineStatus::Cancelled),
            _ => None,
        };
        if let Some(line_status) = line_status {
            for line in &mut self.lines {
                line.status = line_status;
            }
        }
        if transition == Transition::Ship {
            if let OrderKind::Sale { shipped_at, .. } = &mut self.kind {
                *shipped_at = Some(now);
            }
        }

        self.header.status = to;
        self.header.updated_at = now;
        Ok(StatusChange { from, to })
    }

    fn invalid(&self, transition: &str) -> DomainError {
        DomainError::invalid_transition(
            self.order_type().as_str(),
            transition,
            self.header.status.as_str(),
        )
    }
}

fn build_lines(order_type: OrderType, lines: Vec<NewOrderLine>) -> DomainResult<Vec<OrderLine>> {
    if lines.is_empty() {
        return Err(DomainError::validation("order must have at least one line"));
    }

    lines
        .into_iter()
        .enumerate()
        .map(|(idx, line)| {
            let line_no = idx as u32 + 1;
            if line.quantity <= 0 {
                return Err(DomainError::invalid_quantity(format!(
                    "line {line_no}: quantity must be greater than zero, got {}",
                    line.quantity
                )));
            }
            if order_type == OrderType::Purchase && line.discount != 0 {
                return Err(DomainError::validation(format!(
                    "line {line_no}: discounts apply to sale lines only"
                )));
            }
            Ok(OrderLine {
                line_no,
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price: line.unit_price,
                discount: line.discount,
                status: LineStatus::Pending,
            })
        })
        .collect()
}
