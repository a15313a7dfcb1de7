use std::sync::Arc;
use std::time::Duration;

use leaseq::{JobStore, QueueError, QueueManager};
use rand::Rng;
use tracing::{debug, error, warn};

use crate::handlers::{payload_kind, HandlerRegistry, JobContext, JobError};

/// What one pass through the claim loop did.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Idle,
    Acknowledged(String),
    Failed { job_id: String, error: String },
}

/// Claim one job, dispatch it on its payload `kind`, and record the result.
///
/// An `Err` means a queue call failed. If that was the final `acknowledge`
/// or `fail`, the lease lapses and the job is handed out again.
pub async fn step<S: JobStore>(
    queue: &QueueManager<S>,
    registry: &HandlerRegistry,
    ctx: &JobContext,
) -> Result<Outcome, QueueError> {
    let Some(job) = queue.claim().await? else {
        return Ok(Outcome::Idle);
    };
    let job_id = job.id.to_string();
    let kind = payload_kind(&job).unwrap_or("");
    debug!(job_id = %job_id, kind, retries = job.retries, "processing job");

    let result = match registry.get(kind) {
        Some(route) => route.run(&job, ctx).await,
        None => Err(JobError::UnknownKind(kind.to_string())),
    };

    match result {
        Ok(()) => {
            queue.acknowledge(&job_id).await?;
            Ok(Outcome::Acknowledged(job_id))
        }
        Err(err) => {
            let message = err.to_string();
            queue.fail(&job_id, &message).await?;
            warn!(job_id = %job_id, code = err.code(), "job failed");
            Ok(Outcome::Failed {
                job_id,
                error: message,
            })
        }
    }
}

pub async fn run_loop<S: JobStore>(
    slot: usize,
    queue: QueueManager<S>,
    registry: Arc<HandlerRegistry>,
    ctx: JobContext,
    poll_interval: Duration,
) -> anyhow::Result<()> {
    loop {
        match step(&queue, &registry, &ctx).await {
            Ok(Outcome::Idle) => idle(poll_interval).await,
            Ok(Outcome::Acknowledged(job_id)) => debug!(slot, job_id = %job_id, "job succeeded"),
            Ok(Outcome::Failed { job_id, error }) => {
                debug!(slot, job_id = %job_id, error = %error, "job marked failed")
            }
            Err(e) => {
                error!(slot, error = %e, "queue call failed");
                idle(poll_interval * 4).await;
            }
        }
    }
}

/// Sleep for `base` plus up to 25% jitter so idle workers don't poll in lockstep.
async fn idle(base: Duration) {
    let jitter_ms = (base.as_millis() as u64) / 4;
    let extra = if jitter_ms > 0 {
        rand::thread_rng().gen_range(0..=jitter_ms)
    } else {
        0
    };
    tokio::time::sleep(base + Duration::from_millis(extra)).await;
}
