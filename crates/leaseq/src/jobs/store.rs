use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::QueueError;
use crate::jobs::model::{ClaimRequest, Job, JobView, PayloadRef, QueueStats};

/// The job table as seen by the queue manager.
///
/// Every mutating method must be a single atomic step against the backing
/// store. In particular `claim` selects and leases a job indivisibly: two
/// concurrent callers can never both receive the same job.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a fresh job for `payload` (retries 0, not done, claimable now).
    async fn insert_job(&self, payload: &PayloadRef) -> Result<Job, QueueError>;

    /// Lease the oldest claimable job, or `None` when nothing qualifies.
    async fn claim(&self, req: &ClaimRequest) -> Result<Option<JobView>, QueueError>;

    /// Mark a job done, recording `error` when given. `None` if no such job.
    async fn finish(&self, job_id: Uuid, error: Option<&str>)
        -> Result<Option<JobView>, QueueError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, QueueError>;

    /// Remove done jobs and jobs whose retries exceed `max_retries`.
    async fn delete_finished(&self, max_retries: i32) -> Result<u64, QueueError>;

    async fn delete_all(&self) -> Result<u64, QueueError>;

    async fn stats(&self, max_retries: i32) -> Result<QueueStats, QueueError>;
}

#[async_trait]
impl<T: JobStore + ?Sized> JobStore for Arc<T> {
    async fn insert_job(&self, payload: &PayloadRef) -> Result<Job, QueueError> {
        (**self).insert_job(payload).await
    }

    async fn claim(&self, req: &ClaimRequest) -> Result<Option<JobView>, QueueError> {
        (**self).claim(req).await
    }

    async fn finish(
        &self,
        job_id: Uuid,
        error: Option<&str>,
    ) -> Result<Option<JobView>, QueueError> {
        (**self).finish(job_id, error).await
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, QueueError> {
        (**self).get(job_id).await
    }

    async fn delete_finished(&self, max_retries: i32) -> Result<u64, QueueError> {
        (**self).delete_finished(max_retries).await
    }

    async fn delete_all(&self) -> Result<u64, QueueError> {
        (**self).delete_all().await
    }

    async fn stats(&self, max_retries: i32) -> Result<QueueStats, QueueError> {
        (**self).stats(max_retries).await
    }
}
