//! Outbound notifications: the sink contract plus the job handlers that feed it.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use stockroom_core::{AlertId, DomainError};

use crate::jobs::{Job, JobHandler, JobKind, JobResult, RetryPolicy};
use crate::store::{AlertStore, LedgerStore};

/// One message to deliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub subject: String,
    pub body: String,
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotificationError {
    #[error("notification sink unavailable: {0}")]
    Unavailable(String),
}

impl From<NotificationError> for DomainError {
    fn from(value: NotificationError) -> Self {
        match value {
            NotificationError::Unavailable(msg) => DomainError::unavailable(msg),
        }
    }
}

/// Delivery channel (mail, chat, pager).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError>;
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        info!(
            subject = %notification.subject,
            recipients = ?notification.recipients,
            body = %notification.body,
            "notification sent"
        );
        Ok(())
    }
}

/// Records every delivered notification. Can be switched to fail.
#[derive(Debug, Default)]
pub struct InMemorySink {
    sent: Mutex<Vec<Notification>>,
    failing: Mutex<bool>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut flag) = self.failing.lock() {
            *flag = failing;
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl NotificationSink for InMemorySink {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        let failing = self
            .failing
            .lock()
            .map_err(|_| NotificationError::Unavailable("sink lock poisoned".to_string()))?;
        if *failing {
            return Err(NotificationError::Unavailable("sink switched off".to_string()));
        }
        drop(failing);

        self.sent
            .lock()
            .map_err(|_| NotificationError::Unavailable("sink lock poisoned".to_string()))?
            .push(notification.clone());
        Ok(())
    }
}

/// Delivers `notification.low_stock` jobs. Sink failures are retried.
///
/// The job id is the alert id; a delivered notification marks its alert.
pub struct NotificationJobHandler {
    sink: Arc<dyn NotificationSink>,
    alerts: Arc<dyn AlertStore>,
}

impl NotificationJobHandler {
    pub fn new(sink: Arc<dyn NotificationSink>, alerts: Arc<dyn AlertStore>) -> Self {
        Self { sink, alerts }
    }

    async fn record_delivery(&self, job: &Job) {
        let alert_id = AlertId::from_uuid(job.id.0);
        match self.alerts.mark_alert_notified(alert_id, Utc::now()).await {
            Ok(true) => {}
            Ok(false) => debug!(%alert_id, "no pending alert to mark delivered"),
            // Delivered but unmarked: a later sweep may send it again.
            Err(e) => warn!(%alert_id, error = %e, "failed to record notification delivery"),
        }
    }
}

#[async_trait]
impl JobHandler for NotificationJobHandler {
    async fn handle(&self, job: &Job) -> JobResult {
        let notification: Notification = match job.payload_as() {
            Ok(n) => n,
            Err(e) => return JobResult::Failure(format!("malformed notification payload: {e}")),
        };

        match self.sink.send(&notification).await {
            Ok(()) => {
                self.record_delivery(job).await;
                JobResult::Success
            }
            Err(e) => {
                warn!(job_id = %job.id, attempt = job.attempt, error = %e, "notification delivery failed");
                JobResult::Retry(e.to_string())
            }
        }
    }
}

/// Subject of the scheduled digest.
pub const DIGEST_SUBJECT: &str = "Daily Low Stock Report";

/// Sends one summary of every product at or below its reorder level.
pub struct LowStockDigestHandler {
    store: Arc<dyn LedgerStore>,
    sink: Arc<dyn NotificationSink>,
    recipients: Vec<String>,
}

impl LowStockDigestHandler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        sink: Arc<dyn NotificationSink>,
        recipients: Vec<String>,
    ) -> Self {
        Self {
            store,
            sink,
            recipients,
        }
    }

    /// The digest for the current ledger, or `None` when nothing is low.
    pub async fn build(&self) -> Result<Option<Notification>, DomainError> {
        let low = self.store.low_stock_products().await?;
        if low.is_empty() {
            return Ok(None);
        }

        let body = low
            .iter()
            .map(|p| p.digest_line())
            .collect::<Vec<_>>()
            .join("\n");
        Ok(Some(Notification {
            subject: DIGEST_SUBJECT.to_string(),
            body: format!("The following products are running low:\n{body}"),
            recipients: self.recipients.clone(),
        }))
    }
}

#[async_trait]
impl JobHandler for LowStockDigestHandler {
    async fn handle(&self, job: &Job) -> JobResult {
        let notification = match self.build().await {
            Ok(Some(n)) => n,
            Ok(None) => {
                info!(job_id = %job.id, "no low-stock products, digest skipped");
                return JobResult::Success;
            }
            Err(e) if e.is_transient() => return JobResult::Retry(e.to_string()),
            Err(e) => return JobResult::Failure(e.to_string()),
        };

        match self.sink.send(&notification).await {
            Ok(()) => {
                info!(job_id = %job.id, "low-stock digest sent");
                JobResult::Success
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "low-stock digest delivery failed");
                JobResult::Retry(e.to_string())
            }
        }
    }
}

/// A fresh `report.low_stock_digest` job.
pub fn digest_job(policy: RetryPolicy) -> Job {
    Job::new(JobKind::LowStockDigest, serde_json::Value::Null).with_retry_policy(policy)
}
