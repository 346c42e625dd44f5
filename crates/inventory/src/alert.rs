use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{AlertId, ProductId, WarehouseId};

/// Post-commit balance snapshot for one (product, warehouse) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub sku: String,
    pub product_name: String,
    pub quantity: i64,
    pub reorder_level: i64,
}

impl StockLevel {
    /// At or below the reorder level.
    pub fn is_low(&self) -> bool {
        self.quantity <= self.reorder_level
    }
}

/// At most one alert exists per (product, warehouse); storage enforces it.
///
/// The alert keeps what its notification needs, so an undelivered one can be
/// rebuilt from the row alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockAlert {
    pub id: AlertId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub sku: String,
    pub product_name: String,
    pub quantity: i64,
    pub reorder_level: i64,
    pub triggered_at: DateTime<Utc>,
    /// Set once the notification has been delivered.
    pub notified_at: Option<DateTime<Utc>>,
}

impl LowStockAlert {
    pub fn new(level: &StockLevel, triggered_at: DateTime<Utc>) -> Self {
        Self {
            id: AlertId::new(),
            product_id: level.product_id,
            warehouse_id: level.warehouse_id,
            sku: level.sku.clone(),
            product_name: level.product_name.clone(),
            quantity: level.quantity,
            reorder_level: level.reorder_level,
            triggered_at,
            notified_at: None,
        }
    }

    pub fn key(&self) -> (ProductId, WarehouseId) {
        (self.product_id, self.warehouse_id)
    }

    pub fn is_notified(&self) -> bool {
        self.notified_at.is_some()
    }

    /// Subject/body for the single notification sent per alert.
    pub fn message(&self) -> (String, String) {
        let subject = format!("Low stock alert: {}", self.product_name);
        let body = format!(
            "{} (SKU: {}) has {} units left, at or below its reorder level of {}.",
            self.product_name, self.sku, self.quantity, self.reorder_level
        );
        (subject, body)
    }
}

/// Report row materialized once, when the alert is first created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReportEntry {
    pub alert_id: AlertId,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: i64,
    pub created_at: DateTime<Utc>,
}

impl StockReportEntry {
    pub fn for_alert(alert: &LowStockAlert) -> Self {
        Self {
            alert_id: alert.id,
            product_id: alert.product_id,
            product_name: alert.product_name.clone(),
            quantity: alert.quantity,
            created_at: alert.triggered_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(quantity: i64, reorder_level: i64) -> StockLevel {
        StockLevel {
            product_id: ProductId::new(),
            warehouse_id: WarehouseId::new(),
            sku: "SSD-001".to_string(),
            product_name: "SSD".to_string(),
            quantity,
            reorder_level,
        }
    }

    #[test]
    fn threshold_is_inclusive() {
        assert!(level(5, 5).is_low());
        assert!(level(0, 5).is_low());
        assert!(!level(6, 5).is_low());
    }

    #[test]
    fn report_entry_snapshots_trigger_values() {
        let lvl = level(1, 5);
        let alert = LowStockAlert::new(&lvl, Utc::now());
        let entry = StockReportEntry::for_alert(&alert);
        assert_eq!(entry.alert_id, alert.id);
        assert_eq!(entry.quantity, 1);
        assert_eq!(entry.product_name, "SSD");
    }

    #[test]
    fn message_is_built_from_the_alert() {
        let alert = LowStockAlert::new(&level(2, 5), Utc::now());
        assert!(!alert.is_notified());
        let (subject, body) = alert.message();
        assert_eq!(subject, "Low stock alert: SSD");
        assert!(body.contains("SKU: SSD-001"));
        assert!(body.contains("2 units left"));
    }
}
