use leaseq::config::Config;
use leaseq::jobs::schema::ensure_queue_table;
use leaseq::{db, observability, QueueManager};

use std::time::Duration;
use tracing::{error, info};

mod handlers;
mod runner;

use handlers::{build_registry, JobContext};
use runner::run_loop;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = Config::from_env()?;

    let concurrency: usize = std::env::var("LEASEQ_WORKER_CONCURRENCY")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1)
        .clamp(1, 64);
    let poll_interval = Duration::from_millis(cfg.poll_interval_ms);
    let clean_interval = Duration::from_secs(cfg.clean_interval_secs.max(1));

    info!(
        worker_id = %cfg.worker_id,
        queue = %cfg.queue.queue_collection,
        payload_table = %cfg.payload_table,
        block_duration_ms = cfg.queue.block_duration_ms,
        max_retries = cfg.queue.max_retries,
        concurrency,
        poll_interval_ms = cfg.poll_interval_ms,
        clean_interval_secs = cfg.clean_interval_secs,
        "leaseq worker starting"
    );

    let pool = db::make_pool(&cfg.database_url).await?;
    if cfg.ensure_schema {
        ensure_queue_table(&pool, &cfg.payload_table, &cfg.queue).await?;
    }

    let queue = QueueManager::postgres(
        pool.clone(),
        &cfg.payload_table,
        cfg.worker_id.clone(),
        cfg.queue.clone(),
    )?;
    let registry = build_registry();
    let ctx = JobContext {
        worker_id: cfg.worker_id.clone(),
    };

    // ---- Clean task ----
    let clean_handle = {
        let queue = queue.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(clean_interval).await;
                if let Err(e) = queue.clean().await {
                    error!(error = %e, "clean failed");
                }
            }
        })
    };

    // ---- Worker loops ----
    let mut workers = tokio::task::JoinSet::new();
    for slot in 0..concurrency {
        let queue = queue.clone();
        let registry = registry.clone();
        let ctx = ctx.clone();
        workers.spawn(async move { run_loop(slot, queue, registry, ctx, poll_interval).await });
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested, leaving leased jobs to expire");
        }
        Some(res) = workers.join_next() => {
            res??;
        }
    }

    clean_handle.abort();
    workers.abort_all();
    Ok(())
}
