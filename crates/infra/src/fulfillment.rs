//! Asynchronous receive/ship.
//!
//! Enqueue checks the source state for fast feedback only. The handler locks
//! the order and checks again; a redelivered job that finds the order already
//! moved on succeeds without touching stock.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use stockroom_core::{DomainError, DomainResult, OrderId, PrincipalId};
use stockroom_orders::{OrderStatus, Transition};

use crate::jobs::{Job, JobHandler, JobId, JobKind, JobResult, JobStore, RetryPolicy};
use crate::orders::{OrderService, Reentry};

/// Job payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentRequest {
    pub order_id: OrderId,
    pub actor: PrincipalId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FulfillmentOutcome {
    Applied(OrderStatus),
    /// The order had already left the source state.
    AlreadyProcessed,
}

#[derive(Clone)]
pub struct FulfillmentWorker {
    orders: OrderService,
    jobs: Arc<dyn JobStore>,
    retry_policy: RetryPolicy,
}

impl FulfillmentWorker {
    pub fn new(orders: OrderService, jobs: Arc<dyn JobStore>, retry_policy: RetryPolicy) -> Self {
        Self {
            orders,
            jobs,
            retry_policy,
        }
    }

    /// Queue a receive or ship. Returns as soon as the job is stored.
    pub async fn enqueue(
        &self,
        order_id: OrderId,
        transition: Transition,
        actor: PrincipalId,
    ) -> DomainResult<JobId> {
        let kind = job_kind(transition)?;
        let order = self.orders.order(order_id).await?;
        self.orders
            .authorizer()
            .ensure(actor, &transition.capability(order.order_type()))?;
        order.check_transition(transition)?;

        let payload = serde_json::to_value(FulfillmentRequest { order_id, actor })
            .map_err(|e| DomainError::validation(format!("unencodable fulfillment request: {e}")))?;
        let job = Job::new(kind, payload).with_retry_policy(self.retry_policy.clone());
        let job_id = self.jobs.enqueue(job)?;

        info!(job_id = %job_id, order_id = %order_id, kind = kind.type_name(), "fulfillment enqueued");
        Ok(job_id)
    }

    pub async fn enqueue_receive(&self, order_id: OrderId, actor: PrincipalId) -> DomainResult<JobId> {
        self.enqueue(order_id, Transition::Receive, actor).await
    }

    pub async fn enqueue_ship(&self, order_id: OrderId, actor: PrincipalId) -> DomainResult<JobId> {
        self.enqueue(order_id, Transition::Ship, actor).await
    }

    /// Execute one request under the order lock.
    pub async fn process(
        &self,
        request: &FulfillmentRequest,
        transition: Transition,
    ) -> DomainResult<FulfillmentOutcome> {
        job_kind(transition)?;
        let order = self.orders.order(request.order_id).await?;
        if let Err(denied) = self
            .orders
            .authorizer()
            .ensure(request.actor, &transition.capability(order.order_type()))
        {
            // Jobs are queued from the source state and statuses only move
            // forward, so an order that can no longer take the transition has
            // already had it applied.
            if matches!(
                order.check_transition(transition),
                Err(DomainError::InvalidTransition { .. })
            ) {
                info!(
                    order_id = %request.order_id,
                    transition = %transition,
                    status = %order.status(),
                    "order already processed"
                );
                return Ok(FulfillmentOutcome::AlreadyProcessed);
            }
            return Err(denied);
        }

        let outcome = self
            .orders
            .run_transition(request.order_id, transition, request.actor, Reentry::Tolerate)
            .await?;
        Ok(match outcome {
            Some(status) => FulfillmentOutcome::Applied(status),
            None => FulfillmentOutcome::AlreadyProcessed,
        })
    }

    /// Domain failure: cancel the order, then fail the job.
    async fn fail(&self, request: &FulfillmentRequest, error: DomainError) -> JobResult {
        // The order is not at fault when the actor lost the capability.
        if matches!(error, DomainError::PermissionDenied { .. }) {
            return JobResult::Failure(error.to_string());
        }

        let reason = error.to_string();
        match self
            .orders
            .cancel_after_failure(request.order_id, request.actor, &reason)
            .await
        {
            Ok(_) => JobResult::Failure(reason),
            Err(e) if e.is_transient() => JobResult::Retry(format!("{reason}; cancel pending: {e}")),
            Err(e) => {
                warn!(order_id = %request.order_id, error = %e, "could not cancel order after failed fulfillment");
                JobResult::Failure(reason)
            }
        }
    }
}

#[async_trait]
impl JobHandler for FulfillmentWorker {
    async fn handle(&self, job: &Job) -> JobResult {
        let transition = match job.kind {
            JobKind::FulfillmentReceive => Transition::Receive,
            JobKind::FulfillmentShip => Transition::Ship,
            other => return JobResult::Failure(format!("not a fulfillment job: {}", other.type_name())),
        };
        let request: FulfillmentRequest = match job.payload_as() {
            Ok(r) => r,
            Err(e) => return JobResult::Failure(format!("malformed fulfillment payload: {e}")),
        };

        match self.process(&request, transition).await {
            Ok(outcome) => {
                info!(job_id = %job.id, order_id = %request.order_id, outcome = ?outcome, "fulfillment done");
                JobResult::Success
            }
            Err(e) if e.is_transient() => {
                warn!(job_id = %job.id, attempt = job.attempt, error = %e, "fulfillment will be retried");
                JobResult::Retry(e.to_string())
            }
            Err(e) => self.fail(&request, e).await,
        }
    }
}

fn job_kind(transition: Transition) -> DomainResult<JobKind> {
    match transition {
        Transition::Receive => Ok(JobKind::FulfillmentReceive),
        Transition::Ship => Ok(JobKind::FulfillmentShip),
        other => Err(DomainError::validation(format!(
            "only receive and ship run as fulfillment jobs, not {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use stockroom_auth::Principal;

    #[tokio::test]
    async fn only_receive_and_ship_can_be_queued() {
        let h = Harness::new().await;
        let product = h.product("P-1", 0, 1).await;
        let order = h.purchase_order(&[(product, 1)]).await;

        let err = h
            .fulfillment
            .enqueue(order, Transition::Confirm, h.manager)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[tokio::test]
    async fn enqueue_checks_source_state() {
        let h = Harness::new().await;
        let product = h.product("P-1", 0, 1).await;
        let order = h.purchase_order(&[(product, 1)]).await;

        let err = h.fulfillment.enqueue_receive(order, h.manager).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));

        h.orders.confirm(order, h.manager).await.unwrap();
        let job_id = h.fulfillment.enqueue_receive(order, h.manager).await.unwrap();
        let job = h.jobs.get(job_id).unwrap().unwrap();
        assert_eq!(job.kind, JobKind::FulfillmentReceive);
        // Nothing moves until the job runs.
        assert_eq!(h.quantity(product).await, 0);
    }

    #[tokio::test]
    async fn redelivery_after_role_revocation_is_already_processed() {
        let h = Harness::new().await;
        let product = h.product("P-1", 0, 1).await;
        let order = h.purchase_order(&[(product, 3)]).await;
        h.orders.confirm(order, h.manager).await.unwrap();
        let job_id = h.fulfillment.enqueue_receive(order, h.clerk).await.unwrap();
        let job = h.jobs.get(job_id).unwrap().unwrap();
        assert_eq!(h.fulfillment.handle(&job).await, JobResult::Success);

        h.authorizer.register(Principal::new(h.clerk));
        assert_eq!(h.fulfillment.handle(&job).await, JobResult::Success);
        assert_eq!(h.quantity(product).await, 3);
        assert_eq!(h.orders.order(order).await.unwrap().status(), OrderStatus::Received);

        // Outstanding work is still refused.
        let pending = h.purchase_order(&[(product, 1)]).await;
        h.orders.confirm(pending, h.manager).await.unwrap();
        let request = FulfillmentRequest {
            order_id: pending,
            actor: h.clerk,
        };
        let err = h
            .fulfillment
            .process(&request, Transition::Receive)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::PermissionDenied { .. }));
        assert_eq!(h.orders.order(pending).await.unwrap().status(), OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn malformed_payload_fails_without_retry() {
        let h = Harness::new().await;
        let job = Job::new(JobKind::FulfillmentShip, serde_json::json!({"order": "x"}));

        assert!(matches!(h.fulfillment.handle(&job).await, JobResult::Failure(_)));
    }
}
