use leaseq::config::Config;
use leaseq::jobs::schema::{ensure_payload_table, ensure_queue_table, quote_identifier};
use leaseq::{db, observability, QueueManager};
use serde_json::Value;
use sqlx::PgPool;
use std::env;

const USAGE: &str = "leaseqctl <command>\n\
     Commands:\n\
     - init                   create payload + queue tables\n\
     - enqueue <body-json>    store a payload document and enqueue it\n\
     - seed <n>               enqueue n demo payloads\n\
     - claim                  lease the next job\n\
     - ack <job_id>\n\
     - fail <job_id> <message>\n\
     - show <job_id>\n\
     - stats\n\
     - clean                  delete done and exhausted jobs\n\
     - reset                  delete every job\n\
     \n\
     Uses DATABASE_URL and the LEASEQ_* settings.\n";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("{USAGE}");
        std::process::exit(2);
    }

    let cfg = Config::from_env()?;
    let pool = db::make_pool(&cfg.database_url).await?;
    let worker_id = if cfg.worker_id.is_empty() {
        "leaseqctl".to_string()
    } else {
        cfg.worker_id.clone()
    };
    let queue = QueueManager::postgres(
        pool.clone(),
        &cfg.payload_table,
        worker_id,
        cfg.queue.clone(),
    )?;

    match args[1].as_str() {
        "init" => {
            ensure_payload_table(&pool, &cfg.payload_table, &cfg.queue).await?;
            ensure_queue_table(&pool, &cfg.payload_table, &cfg.queue).await?;
            println!(
                "init OK: payloads={} queue={}",
                cfg.payload_table, cfg.queue.queue_collection
            );
        }
        "enqueue" => {
            let raw = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("usage: leaseqctl enqueue <body-json>"))?;
            let body: Value = serde_json::from_str(raw)?;
            let doc = insert_payload(&pool, &cfg.payload_table, &body).await?;
            let job_id = queue.enqueue(&doc).await?;
            println!("+ enqueued job id={job_id} payload={}", doc["id"]);
        }
        "seed" => {
            let n: i64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(10);
            seed(&queue, &pool, &cfg.payload_table, n).await?;
        }
        "claim" => match queue.claim().await? {
            Some(job) => println!("{}", serde_json::to_string_pretty(&job)?),
            None => println!("no claimable job"),
        },
        "ack" => {
            let id = job_id_arg(&args, "ack")?;
            let job = queue.acknowledge(id).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        "fail" => {
            let id = job_id_arg(&args, "fail")?;
            let message = args[3..].join(" ");
            if message.is_empty() {
                anyhow::bail!("usage: leaseqctl fail <job_id> <message>");
            }
            let job = queue.fail(id, &message).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        "show" => {
            let id = job_id_arg(&args, "show")?;
            match queue.get(id).await? {
                Some(job) => println!("{}", serde_json::to_string_pretty(&job)?),
                None => println!("job {id} not found"),
            }
        }
        "stats" => {
            let s = queue.stats().await?;
            println!(
                "jobs: total={} claimable={} leased={} done={} failed={} exhausted={}",
                s.total, s.claimable, s.leased, s.done, s.failed, s.exhausted
            );
        }
        "clean" => {
            let removed = queue.clean().await?;
            println!("clean OK: removed={removed}");
        }
        "reset" => {
            let removed = queue.reset().await?;
            println!("reset OK: removed={removed}");
        }
        other => {
            eprintln!("Unknown command: {other}\n\n{USAGE}");
            std::process::exit(2);
        }
    }

    Ok(())
}

fn job_id_arg<'a>(args: &'a [String], cmd: &str) -> anyhow::Result<&'a str> {
    args.get(2)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("usage: leaseqctl {cmd} <job_id>"))
}

/// Insert into the ctl-managed payload table (see `init`) and return the row
/// as a document.
async fn insert_payload(pool: &PgPool, payload_table: &str, body: &Value) -> anyhow::Result<Value> {
    let doc: Value = sqlx::query_scalar(&format!(
        "INSERT INTO {} AS p (body) VALUES ($1) RETURNING to_jsonb(p)",
        quote_identifier(payload_table)
    ))
    .bind(body)
    .fetch_one(pool)
    .await?;
    Ok(doc)
}

async fn seed(queue: &QueueManager, pool: &PgPool, payload_table: &str, n: i64) -> anyhow::Result<()> {
    for i in 0..n {
        let (kind, body) = if i % 2 == 0 {
            ("echo", serde_json::json!({ "kind": "echo", "n": i }))
        } else {
            ("reject", serde_json::json!({ "kind": "reject", "n": i, "reason": "seeded failure" }))
        };
        let doc = insert_payload(pool, payload_table, &body).await?;
        let job_id = queue.enqueue(&doc).await?;
        println!("+ enqueued {kind} job id={job_id}");
    }
    Ok(())
}
