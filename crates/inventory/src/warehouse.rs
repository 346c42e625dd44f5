use serde::{Deserialize, Serialize};

use stockroom_core::{DomainError, DomainResult, WarehouseId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: WarehouseId,
    pub code: String,
    pub name: String,
}

impl Warehouse {
    pub fn new(id: WarehouseId, code: &str, name: &str) -> DomainResult<Self> {
        let code = code.trim().to_uppercase();
        if code.is_empty() || code.len() > 10 {
            return Err(DomainError::validation(
                "warehouse code must be 1 to 10 characters",
            ));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("warehouse name cannot be empty"));
        }
        Ok(Self {
            id,
            code,
            name: name.to_string(),
        })
    }
}
