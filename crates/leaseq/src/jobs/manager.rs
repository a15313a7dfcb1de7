use serde_json::Value;
use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::jobs::model::{ClaimRequest, Job, JobView, PayloadRef, QueueStats};
use crate::jobs::repo::PgJobStore;
use crate::jobs::schema::validate_identifier;
use crate::jobs::store::JobStore;

/// Coordinates one worker's use of a queue.
///
/// Holds only read-only settings; all shared state lives in the store, and
/// every operation is one round-trip to it. Instances are cheap and need no
/// coordination with each other, so run one per worker.
#[derive(Clone)]
pub struct QueueManager<S = PgJobStore> {
    store: S,
    worker_id: String,
    hostname: String,
    cfg: QueueConfig,
}

impl QueueManager<PgJobStore> {
    /// Postgres-backed manager for `cfg.queue_collection`, whose jobs reference
    /// rows of `payload_collection`.
    pub fn postgres(
        pool: PgPool,
        payload_collection: &str,
        worker_id: impl Into<String>,
        cfg: QueueConfig,
    ) -> Result<Self, QueueError> {
        let store = PgJobStore::new(pool, payload_collection, &cfg)?;
        Self::new(store, payload_collection, worker_id, cfg)
    }
}

impl<S: JobStore> QueueManager<S> {
    pub fn new(
        store: S,
        payload_collection: &str,
        worker_id: impl Into<String>,
        cfg: QueueConfig,
    ) -> Result<Self, QueueError> {
        validate_identifier(payload_collection)?;
        cfg.validate()?;

        Ok(Self {
            store,
            worker_id: worker_id.into(),
            hostname: local_hostname(),
            cfg,
        })
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.cfg
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Enqueue a job for a persisted payload document.
    ///
    /// The document must carry an `id` attribute of the configured reference
    /// type. Returns the new job id.
    pub async fn enqueue(&self, payload: &Value) -> Result<String, QueueError> {
        if payload.is_null() {
            return Err(QueueError::payload_missing());
        }
        let payload_ref = self
            .cfg
            .payload_ref_type
            .ref_from_document(payload)
            .ok_or_else(QueueError::not_a_reference)?;

        self.enqueue_ref(payload_ref).await
    }

    pub async fn enqueue_ref(&self, payload: PayloadRef) -> Result<String, QueueError> {
        if payload.ref_type() != self.cfg.payload_ref_type {
            return Err(QueueError::not_a_reference());
        }

        let job = self.store.insert_job(&payload).await?;
        debug!(
            queue = %self.cfg.queue_collection,
            job_id = %job.id,
            payload = %payload,
            "job enqueued"
        );
        Ok(job.id.to_string())
    }

    /// Lease the oldest claimable job for this worker.
    ///
    /// `None` means nothing is claimable right now. A claimed job stays hidden
    /// from other claims for `block_duration_ms`, after which it can be
    /// claimed again unless it was acknowledged or failed.
    pub async fn claim(&self) -> Result<Option<JobView>, QueueError> {
        let req = ClaimRequest {
            worker_id: self.worker_id.clone(),
            worker_hostname: self.hostname.clone(),
            block_for: self.cfg.block_duration(),
            max_retries: self.cfg.max_retries,
        };

        let claimed = self.store.claim(&req).await?;
        if let Some(job) = &claimed {
            debug!(
                queue = %self.cfg.queue_collection,
                worker_id = %self.worker_id,
                job_id = %job.id,
                retries = job.retries,
                blocked_until = %job.blocked_until,
                "job claimed"
            );
        }
        Ok(claimed)
    }

    /// Mark a job successfully done.
    pub async fn acknowledge(&self, job_id: &str) -> Result<JobView, QueueError> {
        let view = self.finish(job_id, None).await?;
        debug!(queue = %self.cfg.queue_collection, job_id = %view.id, "job acknowledged");
        Ok(view)
    }

    /// Mark a job done with an error. Repeated calls keep the latest message.
    pub async fn fail(&self, job_id: &str, message: &str) -> Result<JobView, QueueError> {
        let view = self.finish(job_id, Some(message)).await?;
        warn!(
            queue = %self.cfg.queue_collection,
            job_id = %view.id,
            error = message,
            "job failed"
        );
        Ok(view)
    }

    async fn finish(&self, job_id: &str, error: Option<&str>) -> Result<JobView, QueueError> {
        // A malformed id cannot match any row.
        let id = Uuid::parse_str(job_id.trim()).map_err(|_| QueueError::job_not_found())?;

        self.store
            .finish(id, error)
            .await?
            .ok_or_else(QueueError::job_not_found)
    }

    pub async fn get(&self, job_id: &str) -> Result<Option<Job>, QueueError> {
        let Ok(id) = Uuid::parse_str(job_id.trim()) else {
            return Ok(None);
        };
        self.store.get(id).await
    }

    /// Delete done and exhausted jobs. Returns how many were removed.
    pub async fn clean(&self) -> Result<u64, QueueError> {
        let removed = self.store.delete_finished(self.cfg.max_retries).await?;
        if removed > 0 {
            info!(queue = %self.cfg.queue_collection, removed, "cleaned finished jobs");
        }
        Ok(removed)
    }

    /// Delete every job in the queue.
    pub async fn reset(&self) -> Result<u64, QueueError> {
        let removed = self.store.delete_all().await?;
        info!(queue = %self.cfg.queue_collection, removed, "queue reset");
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        self.store.stats(self.cfg.max_retries).await
    }
}

/// Best-effort host name: `$HOSTNAME`, then `/etc/hostname`, then "unknown".
pub fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
