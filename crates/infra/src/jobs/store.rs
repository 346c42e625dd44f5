//! Job storage.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use stockroom_core::DomainError;

use super::types::{DeadLetterEntry, Job, JobId, JobKind, JobStatus};

/// Durable task queue contract (at-least-once delivery).
pub trait JobStore: Send + Sync {
    /// Enqueue a new job. Fails with `AlreadyExists` for a known id, including
    /// completed and dead-lettered ones.
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError>;

    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    fn update(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Claim the oldest pending job that is ready to execute and mark it running.
    fn claim_next(&self) -> Result<Option<Job>, JobStoreError>;

    fn list_by_status(&self, status: Option<JobStatus>, limit: usize)
    -> Result<Vec<Job>, JobStoreError>;

    fn list_by_kind(&self, kind: JobKind, limit: usize) -> Result<Vec<Job>, JobStoreError>;

    fn dead_letter(&self, job: Job, reason: String) -> Result<(), JobStoreError>;

    fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, JobStoreError>;

    /// Move a dead-lettered job back to pending with a fresh attempt count.
    fn retry_dead_letter(&self, job_id: JobId) -> Result<Job, JobStoreError>;

    /// Drop a job that has not started yet.
    fn cancel(&self, job_id: JobId) -> Result<(), JobStoreError>;

    fn stats(&self) -> Result<JobStats, JobStoreError>;

    /// Remove completed and cancelled jobs last touched before `older_than`.
    /// A pruned id can be enqueued again. Returns how many were removed.
    fn prune_finished(&self, older_than: DateTime<Utc>) -> Result<usize, JobStoreError>;
}

impl<S> JobStore for Arc<S>
where
    S: JobStore + ?Sized,
{
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        (**self).enqueue(job)
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        (**self).get(job_id)
    }

    fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        (**self).update(job)
    }

    fn claim_next(&self) -> Result<Option<Job>, JobStoreError> {
        (**self).claim_next()
    }

    fn list_by_status(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError> {
        (**self).list_by_status(status, limit)
    }

    fn list_by_kind(&self, kind: JobKind, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        (**self).list_by_kind(kind, limit)
    }

    fn dead_letter(&self, job: Job, reason: String) -> Result<(), JobStoreError> {
        (**self).dead_letter(job, reason)
    }

    fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, JobStoreError> {
        (**self).list_dead_letters(limit)
    }

    fn retry_dead_letter(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        (**self).retry_dead_letter(job_id)
    }

    fn cancel(&self, job_id: JobId) -> Result<(), JobStoreError> {
        (**self).cancel(job_id)
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        (**self).stats()
    }

    fn prune_finished(&self, older_than: DateTime<Utc>) -> Result<usize, JobStoreError> {
        (**self).prune_finished(older_than)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("job {0} already started")]
    AlreadyStarted(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<JobStoreError> for DomainError {
    fn from(value: JobStoreError) -> Self {
        match value {
            JobStoreError::NotFound(id) => DomainError::not_found("job", id),
            JobStoreError::AlreadyExists(id) => {
                DomainError::conflict(format!("job {id} already enqueued"))
            }
            JobStoreError::AlreadyStarted(id) => {
                DomainError::conflict(format!("job {id} already started"))
            }
            JobStoreError::Storage(msg) => DomainError::unavailable(format!("job queue: {msg}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub dead_lettered: usize,
    pub cancelled: usize,
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    dead_letters: RwLock<HashMap<JobId, DeadLetterEntry>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn jobs_read(&self) -> Result<RwLockReadGuard<'_, HashMap<JobId, Job>>, JobStoreError> {
        self.jobs.read().map_err(|_| poisoned())
    }

    fn jobs_write(&self) -> Result<RwLockWriteGuard<'_, HashMap<JobId, Job>>, JobStoreError> {
        self.jobs.write().map_err(|_| poisoned())
    }

    fn dls_write(
        &self,
    ) -> Result<RwLockWriteGuard<'_, HashMap<JobId, DeadLetterEntry>>, JobStoreError> {
        self.dead_letters.write().map_err(|_| poisoned())
    }
}

fn poisoned() -> JobStoreError {
    JobStoreError::Storage("job store lock poisoned".to_string())
}

impl JobStore for InMemoryJobStore {
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        let mut jobs = self.jobs_write()?;
        let dls = self.dead_letters.read().map_err(|_| poisoned())?;
        if jobs.contains_key(&job.id) || dls.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    /// Dead-lettered jobs are found too.
    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        if let Some(job) = self.jobs_read()?.get(&job_id) {
            return Ok(Some(job.clone()));
        }
        let dls = self.dead_letters.read().map_err(|_| poisoned())?;
        Ok(dls.get(&job_id).map(|entry| entry.job.clone()))
    }

    fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs_write()?;
        if !jobs.contains_key(&job.id) {
            return Err(JobStoreError::NotFound(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    fn claim_next(&self) -> Result<Option<Job>, JobStoreError> {
        let mut jobs = self.jobs_write()?;

        // Oldest ready job first.
        let next = jobs
            .values()
            .filter(|j| {
                matches!(j.status, JobStatus::Pending | JobStatus::Failed { .. }) && j.is_ready()
            })
            .min_by_key(|j| (j.created_at, j.id.0))
            .map(|j| j.id);

        Ok(next.and_then(|id| {
            jobs.get_mut(&id).map(|job| {
                job.mark_running();
                job.clone()
            })
        }))
    }

    fn list_by_status(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.jobs_read()?;
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| {
                status.as_ref().is_none_or(|s| {
                    std::mem::discriminant(&j.status) == std::mem::discriminant(s)
                })
            })
            .cloned()
            .collect();

        result.sort_by_key(|j| j.created_at);
        result.truncate(limit);
        Ok(result)
    }

    fn list_by_kind(&self, kind: JobKind, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.jobs_read()?;
        let mut result: Vec<_> = jobs.values().filter(|j| j.kind == kind).cloned().collect();

        result.sort_by_key(|j| j.created_at);
        result.truncate(limit);
        Ok(result)
    }

    fn dead_letter(&self, mut job: Job, reason: String) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs_write()?;
        let mut dls = self.dls_write()?;

        job.status = JobStatus::DeadLettered {
            error: reason.clone(),
            attempts: job.attempt,
        };
        job.updated_at = Utc::now();

        jobs.remove(&job.id);
        dls.insert(job.id, DeadLetterEntry::new(job, reason));

        Ok(())
    }

    fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, JobStoreError> {
        let dls = self.dead_letters.read().map_err(|_| poisoned())?;
        let mut result: Vec<_> = dls.values().cloned().collect();

        result.sort_by_key(|e| e.dead_lettered_at);
        result.truncate(limit);
        Ok(result)
    }

    fn retry_dead_letter(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        let mut jobs = self.jobs_write()?;
        let mut dls = self.dls_write()?;

        let entry = dls.remove(&job_id).ok_or(JobStoreError::NotFound(job_id))?;

        let mut job = entry.job;
        job.status = JobStatus::Pending;
        job.attempt = 0;
        job.scheduled_at = None;
        job.updated_at = Utc::now();
        job.attempt_log.clear();

        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    fn cancel(&self, job_id: JobId) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs_write()?;
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;
        if !matches!(job.status, JobStatus::Pending | JobStatus::Failed { .. }) {
            return Err(JobStoreError::AlreadyStarted(job_id));
        }
        job.mark_cancelled();
        Ok(())
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        let jobs = self.jobs_read()?;
        let dls = self.dead_letters.read().map_err(|_| poisoned())?;

        let mut stats = JobStats::default();

        for job in jobs.values() {
            match &job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed { .. } => stats.failed += 1,
                JobStatus::DeadLettered { .. } => stats.dead_lettered += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats.dead_lettered += dls.len();

        Ok(stats)
    }

    fn prune_finished(&self, older_than: DateTime<Utc>) -> Result<usize, JobStoreError> {
        let mut jobs = self.jobs_write()?;
        let before = jobs.len();
        jobs.retain(|_, job| {
            !(matches!(job.status, JobStatus::Completed | JobStatus::Cancelled)
                && job.updated_at < older_than)
        });
        Ok(before - jobs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(JobKind::LowStockDigest, serde_json::json!({}))
    }

    #[test]
    fn enqueue_and_claim() {
        let store = InMemoryJobStore::new();

        let job_id = store.enqueue(job()).unwrap();

        let claimed = store.claim_next().unwrap().unwrap();
        assert_eq!(claimed.id, job_id);
        assert!(matches!(claimed.status, JobStatus::Running));
        assert_eq!(claimed.attempt, 1);

        assert!(store.claim_next().unwrap().is_none());
    }

    #[test]
    fn duplicate_id_is_rejected_even_after_completion() {
        let store = InMemoryJobStore::new();
        let first = job();
        let id = first.id;
        store.enqueue(first).unwrap();

        let mut claimed = store.claim_next().unwrap().unwrap();
        claimed.mark_completed(Utc::now());
        store.update(&claimed).unwrap();

        assert_eq!(
            store.enqueue(job().with_id(id)),
            Err(JobStoreError::AlreadyExists(id))
        );
    }

    #[test]
    fn scheduled_jobs_wait() {
        let store = InMemoryJobStore::new();
        store
            .enqueue(job().scheduled_at(Utc::now() + chrono::Duration::hours(1)))
            .unwrap();
        assert!(store.claim_next().unwrap().is_none());
    }

    #[test]
    fn dead_letter_flow() {
        let store = InMemoryJobStore::new();

        let job = job();
        let job_id = job.id;
        store.enqueue(job).unwrap();

        let mut claimed = store.claim_next().unwrap().unwrap();
        claimed.mark_dead("boom".to_string(), Utc::now());
        store.dead_letter(claimed, "boom".to_string()).unwrap();

        let dead = store.get(job_id).unwrap().unwrap();
        assert!(matches!(dead.status, JobStatus::DeadLettered { .. }));
        assert!(store.claim_next().unwrap().is_none());
        let dls = store.list_dead_letters(10).unwrap();
        assert_eq!(dls.len(), 1);
        assert_eq!(dls[0].job.id, job_id);

        let retried = store.retry_dead_letter(job_id).unwrap();
        assert!(matches!(retried.status, JobStatus::Pending));
        assert!(store.list_dead_letters(10).unwrap().is_empty());
    }

    #[test]
    fn only_unstarted_jobs_can_be_cancelled() {
        let store = InMemoryJobStore::new();
        let waiting = store.enqueue(job()).unwrap();
        store.cancel(waiting).unwrap();
        assert!(store.claim_next().unwrap().is_none());

        let running = store.enqueue(job()).unwrap();
        store.claim_next().unwrap();
        assert_eq!(
            store.cancel(running),
            Err(JobStoreError::AlreadyStarted(running))
        );
    }

    #[test]
    fn prune_drops_only_old_finished_jobs() {
        let store = InMemoryJobStore::new();
        let done = store.enqueue(job()).unwrap();
        let mut claimed = store.claim_next().unwrap().unwrap();
        claimed.mark_completed(Utc::now());
        store.update(&claimed).unwrap();
        let cancelled = store.enqueue(job()).unwrap();
        store.cancel(cancelled).unwrap();
        let waiting = store.enqueue(job()).unwrap();

        let earlier = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(store.prune_finished(earlier).unwrap(), 0);

        let later = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(store.prune_finished(later).unwrap(), 2);
        assert!(store.get(done).unwrap().is_none());
        assert!(store.get(cancelled).unwrap().is_none());
        assert!(store.get(waiting).unwrap().is_some());

        assert_eq!(store.enqueue(job().with_id(done)), Ok(done));
    }

    #[test]
    fn stats_tracking() {
        let store = InMemoryJobStore::new();

        for _ in 0..5 {
            store.enqueue(job()).unwrap();
        }
        assert_eq!(store.stats().unwrap().pending, 5);

        store.claim_next().unwrap();
        store.claim_next().unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.pending, 3);
        assert_eq!(stats.running, 2);
    }
}
