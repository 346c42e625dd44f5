use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{HistoryEntryId, OrderId, PrincipalId};

use crate::order::StatusChange;
use crate::status::{OrderStatus, OrderType};

/// Append-only audit row for one status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub id: HistoryEntryId,
    pub order_type: OrderType,
    pub order_id: OrderId,
    pub old_status: OrderStatus,
    pub new_status: OrderStatus,
    pub actor: PrincipalId,
    pub changed_at: DateTime<Utc>,
}

impl StatusHistoryEntry {
    pub fn new(
        order_type: OrderType,
        order_id: OrderId,
        change: StatusChange,
        actor: PrincipalId,
        changed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: HistoryEntryId::new(),
            order_type,
            order_id,
            old_status: change.from,
            new_status: change.to,
            actor,
            changed_at,
        }
    }
}
