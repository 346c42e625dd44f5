use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{DomainError, DomainResult, MovementId, PrincipalId, ProductId, WarehouseId};

/// Kind of ledger movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MovementType {
    /// Adds `quantity` to the balance.
    In,
    /// Removes `quantity` from the balance.
    Out,
    /// Sets the balance to `quantity`.
    Adjust,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::In => "IN",
            MovementType::Out => "OUT",
            MovementType::Adjust => "ADJUST",
        }
    }

    /// IN/OUT carry a positive magnitude; ADJUST carries a non-negative target.
    pub fn validate_quantity(&self, quantity: i64) -> DomainResult<()> {
        match self {
            MovementType::In | MovementType::Out if quantity <= 0 => {
                Err(DomainError::invalid_quantity(format!(
                    "{} quantity must be greater than zero, got {quantity}",
                    self.as_str()
                )))
            }
            MovementType::Adjust if quantity < 0 => Err(DomainError::invalid_quantity(format!(
                "ADJUST target must not be negative, got {quantity}"
            ))),
            _ => Ok(()),
        }
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN" => Ok(MovementType::In),
            "OUT" => Ok(MovementType::Out),
            "ADJUST" | "ADJ" => Ok(MovementType::Adjust),
            other => Err(DomainError::validation(format!(
                "unknown movement type '{other}'"
            ))),
        }
    }
}

/// Request to move stock for one product in one warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRequest {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub kind: MovementType,
    pub quantity: i64,
    pub actor: PrincipalId,
    pub notes: Option<String>,
}

impl MovementRequest {
    pub fn new(
        product_id: ProductId,
        warehouse_id: WarehouseId,
        kind: MovementType,
        quantity: i64,
        actor: PrincipalId,
    ) -> Self {
        Self {
            product_id,
            warehouse_id,
            kind,
            quantity,
            actor,
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Persisted shape of a movement, used by storage adapters to rehydrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementState {
    pub id: MovementId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub kind: MovementType,
    pub quantity: i64,
    pub resulting_quantity: i64,
    pub actor: PrincipalId,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Immutable ledger entry.
///
/// Only produced by `Product::apply_movement` or restored from storage;
/// creating one is the act of applying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockMovement {
    pub(crate) id: MovementId,
    pub(crate) product_id: ProductId,
    pub(crate) warehouse_id: WarehouseId,
    pub(crate) kind: MovementType,
    pub(crate) quantity: i64,
    pub(crate) resulting_quantity: i64,
    pub(crate) actor: PrincipalId,
    pub(crate) notes: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
}

impl StockMovement {
    /// Rehydrate a stored entry. Rejects rows no movement could have produced.
    pub fn restore(state: MovementState) -> DomainResult<Self> {
        state.kind.validate_quantity(state.quantity)?;
        if state.resulting_quantity < 0 {
            return Err(DomainError::validation(format!(
                "stored movement {} has negative resulting quantity ({})",
                state.id, state.resulting_quantity
            )));
        }
        if state.kind == MovementType::Adjust && state.resulting_quantity != state.quantity {
            return Err(DomainError::validation(format!(
                "stored ADJUST {} does not land on its target",
                state.id
            )));
        }
        Ok(Self {
            id: state.id,
            product_id: state.product_id,
            warehouse_id: state.warehouse_id,
            kind: state.kind,
            quantity: state.quantity,
            resulting_quantity: state.resulting_quantity,
            actor: state.actor,
            notes: state.notes,
            created_at: state.created_at,
        })
    }

    pub fn id(&self) -> MovementId {
        self.id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn kind(&self) -> MovementType {
        self.kind
    }

    /// Magnitude for IN/OUT, target balance for ADJUST.
    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    /// Balance right after this movement was applied.
    pub fn resulting_quantity(&self) -> i64 {
        self.resulting_quantity
    }

    pub fn actor(&self) -> PrincipalId {
        self.actor
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_and_out_reject_zero_and_negative() {
        for kind in [MovementType::In, MovementType::Out] {
            assert!(matches!(
                kind.validate_quantity(0),
                Err(DomainError::InvalidQuantity(_))
            ));
            assert!(matches!(
                kind.validate_quantity(-3),
                Err(DomainError::InvalidQuantity(_))
            ));
            assert!(kind.validate_quantity(1).is_ok());
        }
    }

    #[test]
    fn adjust_accepts_zero_but_not_negative() {
        assert!(MovementType::Adjust.validate_quantity(0).is_ok());
        assert!(matches!(
            MovementType::Adjust.validate_quantity(-1),
            Err(DomainError::InvalidQuantity(_))
        ));
    }

    fn state(kind: MovementType, quantity: i64, resulting_quantity: i64) -> MovementState {
        MovementState {
            id: MovementId::new(),
            product_id: ProductId::new(),
            warehouse_id: WarehouseId::new(),
            kind,
            quantity,
            resulting_quantity,
            actor: PrincipalId::new(),
            notes: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn restore_accepts_well_formed_rows() {
        let movement = StockMovement::restore(state(MovementType::Out, 4, 6)).unwrap();
        assert_eq!(movement.kind(), MovementType::Out);
        assert_eq!(movement.quantity(), 4);
        assert_eq!(movement.resulting_quantity(), 6);
    }

    #[test]
    fn restore_rejects_impossible_rows() {
        assert!(matches!(
            StockMovement::restore(state(MovementType::In, 0, 3)),
            Err(DomainError::InvalidQuantity(_))
        ));
        assert!(matches!(
            StockMovement::restore(state(MovementType::Out, 2, -1)),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            StockMovement::restore(state(MovementType::Adjust, 5, 7)),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn parses_legacy_adj_code() {
        assert_eq!("ADJ".parse::<MovementType>().unwrap(), MovementType::Adjust);
        assert!("SIDEWAYS".parse::<MovementType>().is_err());
    }
}
