//! In-process job table for tests and local experiments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::QueueError;
use crate::jobs::clock::{Clock, SystemClock};
use crate::jobs::model::{ClaimRequest, Job, JobView, PayloadRef, QueueStats};
use crate::jobs::store::JobStore;

#[derive(Default)]
struct MemoryState {
    /// Insertion order doubles as the tie-break for equal `created_at`.
    jobs: Vec<Job>,
    payloads: HashMap<PayloadRef, Value>,
}

impl MemoryState {
    fn view(&self, job: &Job) -> JobView {
        let doc = self.payloads.get(&job.payload).cloned().unwrap_or(Value::Null);
        JobView::from_job(job, doc)
    }
}

/// A job table held behind one async mutex.
///
/// Each operation runs entirely under the lock, which gives the same
/// select-and-mutate atomicity the SQL store gets from row locks.
pub struct MemoryJobStore {
    state: Mutex<MemoryState>,
    clock: Arc<dyn Clock>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            clock,
        }
    }

    /// Store a payload document under `id`, replacing any previous one.
    /// Jobs may only reference documents stored this way.
    pub async fn put_payload(&self, id: PayloadRef, document: Value) {
        self.state.lock().await.payloads.insert(id, document);
    }

    /// Remove a payload document and, like a cascading foreign key, its jobs.
    pub async fn remove_payload(&self, id: &PayloadRef) -> bool {
        let mut state = self.state.lock().await;
        state.jobs.retain(|j| &j.payload != id);
        state.payloads.remove(id).is_some()
    }

    /// Insert a job row as-is, bypassing enqueue defaults.
    pub async fn insert_raw(&self, job: Job) {
        self.state.lock().await.jobs.push(job);
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert_job(&self, payload: &PayloadRef) -> Result<Job, QueueError> {
        let mut state = self.state.lock().await;
        if !state.payloads.contains_key(payload) {
            return Err(QueueError::Storage(format!(
                "payload {payload} does not exist"
            )));
        }

        let now = self.clock.now();
        let job = Job {
            id: Uuid::new_v4(),
            created_at: now,
            payload: payload.clone(),
            blocked_until: now,
            worker_id: None,
            worker_hostname: None,
            retries: 0,
            done: false,
            error: None,
        };
        state.jobs.push(job.clone());
        Ok(job)
    }

    async fn claim(&self, req: &ClaimRequest) -> Result<Option<JobView>, QueueError> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();

        let picked = state
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| j.is_claimable(now, req.max_retries))
            .min_by_key(|(_, j)| j.created_at)
            .map(|(idx, _)| idx);

        let Some(idx) = picked else {
            return Ok(None);
        };

        let job = &mut state.jobs[idx];
        let retries = job.retries.checked_add(1).ok_or_else(|| {
            QueueError::Storage(format!("retry counter of job {} overflowed", job.id))
        })?;
        job.blocked_until = now + req.block_for;
        job.worker_id = Some(req.worker_id.clone());
        job.worker_hostname = Some(req.worker_hostname.clone());
        job.retries = retries;

        let job = job.clone();
        Ok(Some(state.view(&job)))
    }

    async fn finish(
        &self,
        job_id: Uuid,
        error: Option<&str>,
    ) -> Result<Option<JobView>, QueueError> {
        let mut state = self.state.lock().await;

        let Some(job) = state.jobs.iter_mut().find(|j| j.id == job_id) else {
            return Ok(None);
        };
        job.done = true;
        if let Some(msg) = error {
            job.error = Some(msg.to_string());
        }

        let job = job.clone();
        Ok(Some(state.view(&job)))
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, QueueError> {
        let state = self.state.lock().await;
        Ok(state.jobs.iter().find(|j| j.id == job_id).cloned())
    }

    async fn delete_finished(&self, max_retries: i32) -> Result<u64, QueueError> {
        let mut state = self.state.lock().await;
        let before = state.jobs.len();
        state
            .jobs
            .retain(|j| !(j.done || j.is_exhausted(max_retries)));
        Ok((before - state.jobs.len()) as u64)
    }

    async fn delete_all(&self) -> Result<u64, QueueError> {
        let mut state = self.state.lock().await;
        let removed = state.jobs.len();
        state.jobs.clear();
        Ok(removed as u64)
    }

    async fn stats(&self, max_retries: i32) -> Result<QueueStats, QueueError> {
        let state = self.state.lock().await;
        let now = self.clock.now();

        let mut stats = QueueStats {
            total: state.jobs.len() as i64,
            ..QueueStats::default()
        };
        for job in &state.jobs {
            match (job.done, job.error.is_some()) {
                (true, false) => stats.done += 1,
                (true, true) => stats.failed += 1,
                (false, _) if job.is_exhausted(max_retries) => stats.exhausted += 1,
                (false, _) if job.blocked_until < now => stats.claimable += 1,
                (false, _) => stats.leased += 1,
            }
        }
        Ok(stats)
    }
}
