//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Every variant names the invariant that was violated so callers can report
/// it verbatim. `LockTimeout` and `Unavailable` are transient; everything else
/// is a deterministic rejection that leaves state untouched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A movement or line quantity was out of range.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    /// The acting principal lacks the capability for this operation.
    #[error("permission denied: missing capability '{capability}'")]
    PermissionDenied { capability: String },

    /// Not enough on-hand stock to satisfy an outbound movement.
    #[error("insufficient stock for product {product}: needed {needed}, available {available}")]
    InsufficientStock {
        product: String,
        needed: i64,
        available: i64,
    },

    /// A lifecycle transition was attempted from an illegal source state.
    #[error("invalid transition: cannot {transition} {entity} in status '{from}'")]
    InvalidTransition {
        entity: String,
        transition: String,
        from: String,
    },

    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A uniqueness constraint was hit (e.g. duplicate SKU).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A row lock could not be acquired in time (transient).
    #[error("lock timeout: {0}")]
    LockTimeout(String),

    /// A collaborator (store, queue, notification sink) is unreachable (transient).
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl DomainError {
    pub fn invalid_quantity(msg: impl Into<String>) -> Self {
        Self::InvalidQuantity(msg.into())
    }

    pub fn permission_denied(capability: impl Into<String>) -> Self {
        Self::PermissionDenied {
            capability: capability.into(),
        }
    }

    pub fn insufficient_stock(product: impl ToString, needed: i64, available: i64) -> Self {
        Self::InsufficientStock {
            product: product.to_string(),
            needed,
            available,
        }
    }

    pub fn invalid_transition(
        entity: impl Into<String>,
        transition: impl Into<String>,
        from: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            entity: entity.into(),
            transition: transition.into(),
            from: from.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn lock_timeout(msg: impl Into<String>) -> Self {
        Self::LockTimeout(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::LockTimeout(_) | Self::Unavailable(_))
    }
}
