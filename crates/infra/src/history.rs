//! Status history recorder.

use chrono::{DateTime, Utc};

use stockroom_core::{DomainResult, OrderId, PrincipalId};
use stockroom_orders::{OrderType, StatusChange, StatusHistoryEntry};

use crate::store::LedgerTx;

/// Writes one history row per successful transition.
///
/// Takes the transaction that carries the status change; there is no way to
/// record a change outside of one.
pub struct StatusHistoryRecorder;

impl StatusHistoryRecorder {
    pub async fn record(
        tx: &mut dyn LedgerTx,
        order_type: OrderType,
        order_id: OrderId,
        change: StatusChange,
        actor: PrincipalId,
        changed_at: DateTime<Utc>,
    ) -> DomainResult<StatusHistoryEntry> {
        let entry = StatusHistoryEntry::new(order_type, order_id, change, actor, changed_at);
        tx.insert_history(&entry).await?;
        Ok(entry)
    }
}
