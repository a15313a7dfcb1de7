// tests/leasing.rs
mod common;

use common::{insert_job_with, insert_payload, manager, setup_db, test_config};

use std::collections::HashSet;
use std::time::Duration;

use serial_test::serial;

#[tokio::test]
#[serial]
#[ignore = "requires TEST_DATABASE_URL"]
async fn two_workers_never_claim_same_job() {
    let pool = setup_db().await;
    let worker_a = manager(&pool, "worker-a", test_config());
    let worker_b = manager(&pool, "worker-b", test_config());

    let payload = insert_payload(&pool, "only").await;
    let job_id = worker_a.enqueue(&payload).await.unwrap();

    let (a, b) = tokio::join!(
        async { worker_a.claim().await.unwrap() },
        async { worker_b.claim().await.unwrap() },
    );

    // XOR: exactly one worker should win the lease
    assert!(
        a.is_some() ^ b.is_some(),
        "expected exactly one worker to claim, a={a:?} b={b:?}"
    );

    let job = worker_a.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.retries, 1);
    assert!(
        job.worker_id.as_deref() == Some("worker-a") || job.worker_id.as_deref() == Some("worker-b")
    );
}

#[tokio::test]
#[serial]
#[ignore = "requires TEST_DATABASE_URL"]
async fn concurrent_workers_drain_queue_without_duplicates() {
    let pool = setup_db().await;
    let producer = manager(&pool, "producer", test_config());

    for n in 0..20 {
        let payload = insert_payload(&pool, &format!("job-{n}")).await;
        producer.enqueue(&payload).await.unwrap();
    }

    let mut set = tokio::task::JoinSet::new();
    for w in 0..5 {
        let worker = manager(&pool, &format!("worker-{w}"), test_config());
        set.spawn(async move {
            let mut mine = Vec::new();
            while let Some(job) = worker.claim().await.unwrap() {
                mine.push(job.id);
            }
            mine
        });
    }

    let mut all = Vec::new();
    while let Some(res) = set.join_next().await {
        all.extend(res.unwrap());
    }

    let unique: HashSet<_> = all.iter().collect();
    assert_eq!(all.len(), 20);
    assert_eq!(unique.len(), 20, "a job was claimed twice");
}

#[tokio::test]
#[serial]
#[ignore = "requires TEST_DATABASE_URL"]
async fn claim_returns_resolved_payload_and_lease() {
    let pool = setup_db().await;
    let queue = manager(&pool, "worker-a", test_config());

    let payload = insert_payload(&pool, "email").await;
    let job_id = queue.enqueue(&payload).await.unwrap();

    let before = chrono::Utc::now();
    let job = queue.claim().await.unwrap().expect("job");
    assert_eq!(job.id.to_string(), job_id);
    assert_eq!(job.payload_id(), Some(&payload["id"]));
    assert_eq!(job.payload["body"]["kind"], "email");
    assert_eq!(job.retries, 1);
    assert!(!job.done);
    assert!(job.blocked_until > before);

    let stored = queue.get(&job_id).await.unwrap().unwrap();
    assert_eq!(stored.worker_id.as_deref(), Some("worker-a"));
    assert_eq!(stored.worker_hostname.as_deref(), Some(queue.hostname()));
}

#[tokio::test]
#[serial]
#[ignore = "requires TEST_DATABASE_URL"]
async fn claims_oldest_first() {
    let pool = setup_db().await;
    let queue = manager(&pool, "worker-a", test_config());

    let newer = insert_job_with(&pool, 0, false, -1_000, -1_000).await;
    let older = insert_job_with(&pool, 0, false, -5_000, -5_000).await;

    let first = queue.claim().await.unwrap().unwrap();
    let second = queue.claim().await.unwrap().unwrap();
    assert_eq!(first.id, older);
    assert_eq!(second.id, newer);
    assert!(queue.claim().await.unwrap().is_none());
}

#[tokio::test]
#[serial]
#[ignore = "requires TEST_DATABASE_URL"]
async fn blocked_job_is_passed_over() {
    let pool = setup_db().await;
    let queue = manager(&pool, "worker-a", test_config());

    let blocked = insert_job_with(&pool, 0, false, -5_000, 100_000_000).await;
    let open = insert_job_with(&pool, 0, false, -1_000, -1_000).await;

    let job = queue.claim().await.unwrap().unwrap();
    assert_eq!(job.id, open);
    assert_ne!(job.id, blocked);
    assert!(queue.claim().await.unwrap().is_none());
}

#[tokio::test]
#[serial]
#[ignore = "requires TEST_DATABASE_URL"]
async fn exhausted_and_done_jobs_are_never_claimed() {
    let pool = setup_db().await;
    let cfg = test_config();
    let queue = manager(&pool, "worker-a", cfg.clone());

    insert_job_with(&pool, cfg.max_retries + 1, false, -5_000, -5_000).await;
    insert_job_with(&pool, 0, true, -5_000, -5_000).await;

    assert!(queue.claim().await.unwrap().is_none());

    let at_ceiling = insert_job_with(&pool, cfg.max_retries, false, -1_000, -1_000).await;
    let job = queue.claim().await.unwrap().unwrap();
    assert_eq!(job.id, at_ceiling);
    assert_eq!(job.retries, cfg.max_retries + 1);
}

#[tokio::test]
#[serial]
#[ignore = "requires TEST_DATABASE_URL"]
async fn lease_expires_then_other_worker_can_claim() {
    let pool = setup_db().await;
    let cfg = test_config().with_block_duration_ms(500);
    let worker_a = manager(&pool, "worker-a", cfg.clone());
    let worker_b = manager(&pool, "worker-b", cfg);

    let payload = insert_payload(&pool, "slow").await;
    let job_id = worker_a.enqueue(&payload).await.unwrap();

    let leased = worker_a.claim().await.unwrap().expect("worker-a should claim");
    assert_eq!(leased.id.to_string(), job_id);

    // Simulate worker A dying: no ack, the lease runs out.
    assert!(worker_b.claim().await.unwrap().is_none());
    tokio::time::sleep(Duration::from_millis(700)).await;

    let again = worker_b.claim().await.unwrap().expect("worker-b claims after expiry");
    assert_eq!(again.id.to_string(), job_id);
    assert_eq!(again.retries, 2);

    let stored = worker_b.get(&job_id).await.unwrap().unwrap();
    assert_eq!(stored.worker_id.as_deref(), Some("worker-b"));
}
