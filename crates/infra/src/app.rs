//! Wiring of the services over one store, one queue and one authorizer.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use stockroom_auth::Authorizer;
use stockroom_core::DomainResult;

use crate::alerts::AlertPublisher;
use crate::catalog::CatalogService;
use crate::config::Config;
use crate::fulfillment::FulfillmentWorker;
use crate::jobs::{Job, JobExecutor, JobKind, JobStore, RetryPolicy};
use crate::ledger::LedgerEngine;
use crate::notify::{self, LowStockDigestHandler, NotificationJobHandler, NotificationSink};
use crate::orders::OrderService;
use crate::store::{AlertStore, LedgerStore};

#[derive(Clone)]
pub struct Stockroom {
    pub catalog: CatalogService,
    pub ledger: LedgerEngine,
    pub orders: OrderService,
    pub fulfillment: FulfillmentWorker,
    pub alerts: AlertPublisher,
    store: Arc<dyn LedgerStore>,
    alert_store: Arc<dyn AlertStore>,
    jobs: Arc<dyn JobStore>,
    retry_policy: RetryPolicy,
    recipients: Vec<String>,
    job_retention: Duration,
}

/// What one maintenance pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Maintenance {
    pub notifications_requeued: usize,
    pub jobs_pruned: usize,
}

impl Stockroom {
    pub fn new<S>(
        store: Arc<S>,
        jobs: Arc<dyn JobStore>,
        authorizer: Arc<dyn Authorizer>,
        config: &Config,
    ) -> Self
    where
        S: LedgerStore + AlertStore + 'static,
    {
        let ledger_store: Arc<dyn LedgerStore> = store.clone();
        let alert_store: Arc<dyn AlertStore> = store;
        let retry_policy = config.retry_policy();
        let recipients = config.alert_recipients.clone();

        let alerts = AlertPublisher::new(
            alert_store.clone(),
            jobs.clone(),
            retry_policy.clone(),
            recipients.clone(),
        );
        let orders = OrderService::new(ledger_store.clone(), authorizer.clone(), alerts.clone());
        Self {
            catalog: CatalogService::new(ledger_store.clone(), authorizer.clone()),
            ledger: LedgerEngine::new(ledger_store.clone(), authorizer, alerts.clone()),
            fulfillment: FulfillmentWorker::new(orders.clone(), jobs.clone(), retry_policy.clone()),
            orders,
            alerts,
            store: ledger_store,
            alert_store,
            jobs,
            retry_policy,
            recipients,
            job_retention: config.job_retention(),
        }
    }

    /// Register the fulfillment, notification and digest handlers.
    pub fn register_handlers<J>(&self, executor: &mut JobExecutor<J>, sink: Arc<dyn NotificationSink>)
    where
        J: JobStore + 'static,
    {
        executor.register_handler("fulfillment.*", Arc::new(self.fulfillment.clone()));
        executor.register_handler(
            JobKind::LowStockNotification.type_name(),
            Arc::new(NotificationJobHandler::new(sink.clone(), self.alert_store.clone())),
        );
        executor.register_handler(
            JobKind::LowStockDigest.type_name(),
            Arc::new(LowStockDigestHandler::new(
                self.store.clone(),
                sink,
                self.recipients.clone(),
            )),
        );
    }

    pub fn digest_job(&self) -> Job {
        notify::digest_job(self.retry_policy.clone())
    }

    /// Requeue undelivered alert notifications and prune finished jobs past
    /// retention. Run once at startup and then periodically.
    pub async fn maintain(&self) -> DomainResult<Maintenance> {
        let notifications_requeued = self.alerts.resend_unnotified().await?;

        let jobs_pruned = match chrono::Duration::from_std(self.job_retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
        {
            Some(cutoff) => self.jobs.prune_finished(cutoff)?,
            None => {
                warn!(retention = ?self.job_retention, "job retention out of range, nothing pruned");
                0
            }
        };
        if jobs_pruned > 0 {
            info!(jobs_pruned, "pruned finished jobs");
        }

        Ok(Maintenance {
            notifications_requeued,
            jobs_pruned,
        })
    }
}
