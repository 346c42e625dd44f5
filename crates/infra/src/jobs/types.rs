//! Job records, kinds and retry policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Deterministic id: enqueuing twice with the same source id is rejected
    /// by the store.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// What a job does. Handlers are registered against `type_name()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Receive a confirmed purchase order.
    FulfillmentReceive,
    /// Ship a confirmed sale order.
    FulfillmentShip,
    /// Deliver the notification of one low-stock alert.
    LowStockNotification,
    /// Scheduled summary of every product at or below its reorder level.
    LowStockDigest,
}

impl JobKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            JobKind::FulfillmentReceive => "fulfillment.receive",
            JobKind::FulfillmentShip => "fulfillment.ship",
            JobKind::LowStockNotification => "notification.low_stock",
            JobKind::LowStockDigest => "report.low_stock_digest",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    /// Transient failure; claimable again once `scheduled_at` passes.
    Failed { error: String, attempt: u32 },
    /// Permanent failure or attempts used up.
    DeadLettered { error: String, attempts: u32 },
    /// Dropped before it started.
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::DeadLettered { .. } | JobStatus::Cancelled
        )
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, JobStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    /// `base * 2^(attempt - 1)`, capped at `max_delay`.
    #[default]
    Exponential,
}

/// Bounded retries for transient failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total executions allowed, first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_secs(10), Duration::from_secs(300))
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: max_delay.max(base_delay),
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Wait after the `attempt`-th execution failed (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match (self.strategy, attempt) {
            (_, 0) => Duration::ZERO,
            (BackoffStrategy::Fixed, _) => self.base_delay,
            (BackoffStrategy::Exponential, n) => {
                let factor = 1u32 << (n - 1).min(20);
                self.base_delay
                    .checked_mul(factor)
                    .map_or(self.max_delay, |d| d.min(self.max_delay))
            }
        }
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// One finished execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    pub number: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// `None` when the attempt succeeded.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub retry_policy: RetryPolicy,
    /// Executions started so far.
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Not claimable before this instant.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub attempt_log: Vec<Attempt>,
}

impl Job {
    pub fn new(kind: JobKind, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            kind,
            payload,
            status: JobStatus::Pending,
            retry_policy: RetryPolicy::default(),
            attempt: 0,
            created_at: now,
            updated_at: now,
            scheduled_at: None,
            attempt_log: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// Decode the payload into the handler's request type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    pub fn is_ready(&self) -> bool {
        self.scheduled_at.is_none_or(|at| Utc::now() >= at)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.attempt_log.last().and_then(|a| a.error.as_deref())
    }

    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.attempt += 1;
        self.updated_at = Utc::now();
    }

    pub fn mark_completed(&mut self, started_at: DateTime<Utc>) {
        self.finish(started_at, None);
        self.status = JobStatus::Completed;
    }

    /// Transient failure: schedule a retry with backoff, or dead-letter once
    /// the attempts are used up.
    pub fn mark_failed(&mut self, error: String, started_at: DateTime<Utc>) {
        let now = self.finish(started_at, Some(error.clone()));
        if self.retry_policy.should_retry(self.attempt) {
            let delay = self.retry_policy.delay_for_attempt(self.attempt);
            self.scheduled_at = Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
            self.status = JobStatus::Failed {
                error,
                attempt: self.attempt,
            };
        } else {
            self.status = JobStatus::DeadLettered {
                error,
                attempts: self.attempt,
            };
        }
    }

    /// Permanent failure: no retry regardless of the policy.
    pub fn mark_dead(&mut self, error: String, started_at: DateTime<Utc>) {
        self.finish(started_at, Some(error.clone()));
        self.status = JobStatus::DeadLettered {
            error,
            attempts: self.attempt,
        };
    }

    pub fn mark_cancelled(&mut self) {
        self.status = JobStatus::Cancelled;
        self.updated_at = Utc::now();
    }

    fn finish(&mut self, started_at: DateTime<Utc>, error: Option<String>) -> DateTime<Utc> {
        let now = Utc::now();
        self.attempt_log.push(Attempt {
            number: self.attempt,
            started_at,
            finished_at: now,
            error,
        });
        self.updated_at = now;
        now
    }
}

/// What a handler reports back to the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Success,
    /// Permanent failure; dead-lettered at once.
    Failure(String),
    /// Transient failure; retried with backoff while attempts remain.
    Retry(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub job: Job,
    pub dead_lettered_at: DateTime<Utc>,
    pub reason: String,
}

impl DeadLetterEntry {
    pub fn new(job: Job, reason: String) -> Self {
        Self {
            job,
            dead_lettered_at: Utc::now(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_until_cap() {
        let policy = RetryPolicy::exponential(
            5,
            Duration::from_millis(100),
            Duration::from_millis(500),
        );

        let delays: Vec<_> = (0..=4).map(|n| policy.delay_for_attempt(n).as_millis()).collect();
        assert_eq!(delays, vec![0, 100, 200, 400, 500]);
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(500));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(1), policy.delay_for_attempt(3));
    }

    #[test]
    fn attempts_are_bounded_by_policy() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!RetryPolicy::no_retry().should_retry(1));
    }

    #[test]
    fn payload_decodes_into_request_type() {
        #[derive(Deserialize)]
        struct Request {
            order: String,
        }

        let job = Job::new(JobKind::FulfillmentShip, serde_json::json!({"order": "so-1"}));
        assert_eq!(job.payload_as::<Request>().unwrap().order, "so-1");
        assert!(job.payload_as::<u32>().is_err());
    }

    #[test]
    fn transient_failures_exhaust_into_dead_letter() {
        let mut job = Job::new(JobKind::FulfillmentShip, serde_json::Value::Null)
            .with_retry_policy(RetryPolicy::fixed(2, Duration::from_millis(10)));

        job.mark_running();
        job.mark_failed("lock timeout".to_string(), Utc::now());
        assert!(job.status.is_retriable());
        assert!(!job.is_ready());

        job.mark_running();
        job.mark_failed("lock timeout".to_string(), Utc::now());
        assert!(matches!(job.status, JobStatus::DeadLettered { attempts: 2, .. }));
        assert_eq!(job.attempt_log.len(), 2);
        assert_eq!(job.last_error(), Some("lock timeout"));
    }

    #[test]
    fn permanent_failure_skips_retries() {
        let mut job = Job::new(JobKind::FulfillmentShip, serde_json::Value::Null);
        job.mark_running();
        job.mark_dead("insufficient stock".to_string(), Utc::now());
        assert!(matches!(job.status, JobStatus::DeadLettered { attempts: 1, .. }));
    }

    #[test]
    fn success_is_logged() {
        let mut job = Job::new(JobKind::LowStockDigest, serde_json::Value::Null);
        job.mark_running();
        job.mark_completed(Utc::now());
        assert!(job.status.is_terminal());
        assert_eq!(job.attempt_log[0].number, 1);
        assert_eq!(job.last_error(), None);
    }
}
