//! Low-stock alert publisher.
//!
//! Runs after the triggering movement has committed. The alert row is keyed by
//! (product, warehouse); the store's uniqueness check is what keeps a second
//! evaluation from creating a second alert or report entry. The notification
//! job shares the alert's id, so the queue holds at most one per alert, and an
//! alert stays pending until its delivery is recorded.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use stockroom_core::{AlertId, DomainResult};
use stockroom_inventory::{LowStockAlert, StockLevel, StockReportEntry};

use crate::jobs::{Job, JobId, JobKind, JobStore, JobStoreError, RetryPolicy};
use crate::notify::Notification;
use crate::store::AlertStore;

/// Upper bound on alerts requeued by one sweep.
const RESEND_BATCH: usize = 500;

/// Result of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    /// Quantity is above the reorder level.
    NotLow,
    /// An alert for the pair already exists; no new alert was written.
    AlreadyAlerted,
    Created(AlertId),
}

#[derive(Clone)]
pub struct AlertPublisher {
    alerts: Arc<dyn AlertStore>,
    jobs: Arc<dyn JobStore>,
    retry_policy: RetryPolicy,
    recipients: Vec<String>,
}

impl AlertPublisher {
    pub fn new(
        alerts: Arc<dyn AlertStore>,
        jobs: Arc<dyn JobStore>,
        retry_policy: RetryPolicy,
        recipients: Vec<String>,
    ) -> Self {
        Self {
            alerts,
            jobs,
            retry_policy,
            recipients,
        }
    }

    /// Find-or-create the alert for a post-commit stock snapshot.
    ///
    /// A new alert enqueues its notification. An existing one is requeued
    /// only while its delivery has not been recorded. Queue failures are
    /// logged; the alert stays and a later evaluation or sweep retries.
    pub async fn evaluate(&self, level: &StockLevel) -> DomainResult<AlertOutcome> {
        if !level.is_low() {
            return Ok(AlertOutcome::NotLow);
        }

        let alert = LowStockAlert::new(level, Utc::now());
        let entry = StockReportEntry::for_alert(&alert);
        if !self.alerts.create_alert_if_absent(&alert, &entry).await? {
            debug!(
                product_id = %level.product_id,
                warehouse_id = %level.warehouse_id,
                "low-stock alert already exists"
            );
            if let Some(existing) = self
                .alerts
                .alert_for(level.product_id, level.warehouse_id)
                .await?
                .filter(|a| !a.is_notified())
            {
                self.enqueue_notification(&existing);
            }
            return Ok(AlertOutcome::AlreadyAlerted);
        }

        info!(
            alert_id = %alert.id,
            product_id = %level.product_id,
            warehouse_id = %level.warehouse_id,
            quantity = level.quantity,
            reorder_level = level.reorder_level,
            "low-stock alert created"
        );
        self.enqueue_notification(&alert);
        Ok(AlertOutcome::Created(alert.id))
    }

    /// Requeue every undelivered alert whose job is missing from the queue.
    /// Returns how many were queued.
    pub async fn resend_unnotified(&self) -> DomainResult<usize> {
        let pending = self.alerts.unnotified_alerts(RESEND_BATCH).await?;
        let queued = pending
            .iter()
            .filter(|alert| self.enqueue_notification(alert))
            .count();
        if queued > 0 {
            info!(queued, "requeued undelivered low-stock notifications");
        }
        Ok(queued)
    }

    /// True when this call put the job on the queue.
    fn enqueue_notification(&self, alert: &LowStockAlert) -> bool {
        let (subject, body) = alert.message();
        let notification = Notification {
            subject,
            body,
            recipients: self.recipients.clone(),
        };
        let payload = match serde_json::to_value(&notification) {
            Ok(p) => p,
            Err(e) => {
                warn!(alert_id = %alert.id, error = %e, "could not encode notification");
                return false;
            }
        };

        // Same id as the alert: the queue refuses a second copy.
        let job = Job::new(JobKind::LowStockNotification, payload)
            .with_id(JobId::from_uuid(*alert.id.as_uuid()))
            .with_retry_policy(self.retry_policy.clone());
        match self.jobs.enqueue(job) {
            Ok(_) => true,
            Err(JobStoreError::AlreadyExists(_)) => false,
            Err(e) => {
                warn!(alert_id = %alert.id, error = %e, "failed to enqueue low-stock notification");
                false
            }
        }
    }
}
