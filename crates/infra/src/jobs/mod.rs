//! Background job system with retry, backoff, and dead-letter handling.
//!
//! - `Job`: payload plus retry metadata
//! - `JobStore`: the durable task queue contract (in-memory implementation here)
//! - `JobExecutor`: pool of tokio tasks running jobs through `JobHandler`s
//! - dead-lettered jobs are kept for inspection and replay

pub mod executor;
pub mod store;
pub mod types;

pub use executor::{Execution, JobExecutor, JobExecutorConfig, JobExecutorHandle, JobHandler};
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use types::{
    BackoffStrategy, DeadLetterEntry, Job, JobId, JobKind, JobResult, JobStatus, RetryPolicy,
};
