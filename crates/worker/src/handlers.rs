//! Job handlers, routed by the `kind` field of the resolved payload document.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use leaseq::JobView;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::info;

/// Why a handler gave up on a job. The display text is what `fail` records.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("bad payload: {0}")]
    BadPayload(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("no handler for kind {0:?}")]
    UnknownKind(String),

    #[error("handler timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),

    #[error("worker shutting down")]
    ShuttingDown,
}

impl JobError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadPayload(_) => "BAD_PAYLOAD",
            Self::Rejected(_) => "REJECTED",
            Self::UnknownKind(_) => "UNKNOWN_KIND",
            Self::TimedOut(_) => "TIMED_OUT",
            Self::ShuttingDown => "SHUTTING_DOWN",
        }
    }
}

#[derive(Clone, Debug)]
pub struct JobContext {
    pub worker_id: String,
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &JobView, ctx: &JobContext) -> Result<(), JobError>;
}

/// A handler plus the limits it runs under.
#[derive(Clone)]
pub struct Route {
    handler: Arc<dyn JobHandler>,
    permits: Option<Arc<Semaphore>>,
    timeout: Option<Duration>,
}

impl Route {
    pub fn new(handler: impl JobHandler + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
            permits: None,
            timeout: None,
        }
    }

    /// At most `n` jobs of this kind run at once across all claim loops.
    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.permits = Some(Arc::new(Semaphore::new(n.max(1))));
        self
    }

    /// The lease keeps running while the handler does, so keep this below
    /// the queue's block duration.
    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    pub async fn run(&self, job: &JobView, ctx: &JobContext) -> Result<(), JobError> {
        let _permit = match &self.permits {
            Some(permits) => Some(permits.acquire().await.map_err(|_| JobError::ShuttingDown)?),
            None => None,
        };

        let work = self.handler.handle(job, ctx);
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| JobError::TimedOut(limit))?,
            None => work.await,
        }
    }
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    routes: HashMap<String, Route>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, kind: impl Into<String>, route: Route) -> Self {
        self.routes.insert(kind.into(), route);
        self
    }

    pub fn get(&self, kind: &str) -> Option<&Route> {
        self.routes.get(kind)
    }
}

/// Fields of a payload row live either at the top level or, for tables
/// created by `leaseqctl init`, inside its `body` column.
fn document_body(job: &JobView) -> &Value {
    job.payload.get("body").unwrap_or(&job.payload)
}

pub fn payload_kind(job: &JobView) -> Option<&str> {
    job.payload
        .get("kind")
        .or_else(|| document_body(job).get("kind"))
        .and_then(Value::as_str)
}

fn parse_body<T: DeserializeOwned>(job: &JobView) -> Result<T, JobError> {
    T::deserialize(document_body(job)).map_err(|e| JobError::BadPayload(e.to_string()))
}

/// Logs the job and its payload reference.
struct Echo;

#[async_trait]
impl JobHandler for Echo {
    async fn handle(&self, job: &JobView, ctx: &JobContext) -> Result<(), JobError> {
        info!(
            job_id = %job.id,
            worker_id = %ctx.worker_id,
            payload_id = ?job.payload_id(),
            retries = job.retries,
            "echo"
        );
        Ok(())
    }
}

#[derive(Deserialize)]
struct SleepBody {
    ms: u64,
}

/// Holds the job for `body.ms` milliseconds.
struct Sleep;

#[async_trait]
impl JobHandler for Sleep {
    async fn handle(&self, job: &JobView, _ctx: &JobContext) -> Result<(), JobError> {
        let body: SleepBody = parse_body(job)?;
        tokio::time::sleep(Duration::from_millis(body.ms)).await;
        Ok(())
    }
}

#[derive(Deserialize)]
struct RejectBody {
    #[serde(default)]
    reason: Option<String>,
}

/// Always fails, recording `body.reason`.
struct Reject;

#[async_trait]
impl JobHandler for Reject {
    async fn handle(&self, job: &JobView, _ctx: &JobContext) -> Result<(), JobError> {
        let body: RejectBody = parse_body(job)?;
        Err(JobError::Rejected(
            body.reason.unwrap_or_else(|| "no reason given".to_string()),
        ))
    }
}

pub fn build_registry() -> Arc<HandlerRegistry> {
    let registry = HandlerRegistry::new()
        .route("echo", Route::new(Echo).timeout(Duration::from_secs(5)))
        .route(
            "sleep",
            Route::new(Sleep)
                .max_concurrency(4)
                .timeout(Duration::from_secs(20)),
        )
        .route("reject", Route::new(Reject));

    Arc::new(registry)
}
