mod common;

use common::{count_jobs, insert_job_with, insert_payload, manager, setup_db, test_config};

use serial_test::serial;

#[tokio::test]
#[serial]
#[ignore = "requires TEST_DATABASE_URL"]
async fn clean_removes_done_and_exhausted_jobs() {
    let pool = setup_db().await;
    let cfg = test_config();
    let queue = manager(&pool, "janitor", cfg.clone());

    let done = insert_job_with(&pool, 1, true, -5_000, -5_000).await;
    let exhausted = insert_job_with(&pool, cfg.max_retries + 1, false, -5_000, -5_000).await;
    let at_ceiling = insert_job_with(&pool, cfg.max_retries, false, -5_000, -5_000).await;
    let leased = insert_job_with(&pool, 1, false, -5_000, 60_000).await;

    let payload = insert_payload(&pool, "failing").await;
    let failed = queue.enqueue(&payload).await.unwrap();
    queue.fail(&failed, "nope").await.unwrap();

    let removed = queue.clean().await.unwrap();
    assert_eq!(removed, 3);

    assert!(queue.get(&done.to_string()).await.unwrap().is_none());
    assert!(queue.get(&exhausted.to_string()).await.unwrap().is_none());
    assert!(queue.get(&failed).await.unwrap().is_none());
    assert!(queue.get(&at_ceiling.to_string()).await.unwrap().is_some());
    assert!(queue.get(&leased.to_string()).await.unwrap().is_some());

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.done + stats.failed + stats.exhausted, 0);
    assert_eq!(stats.claimable, 1);
    assert_eq!(stats.leased, 1);
}

#[tokio::test]
#[serial]
#[ignore = "requires TEST_DATABASE_URL"]
async fn reset_empties_queue() {
    let pool = setup_db().await;
    let queue = manager(&pool, "janitor", test_config());

    for kind in ["a", "b", "c"] {
        let payload = insert_payload(&pool, kind).await;
        queue.enqueue(&payload).await.unwrap();
    }
    insert_job_with(&pool, 0, true, 0, 0).await;

    assert_eq!(queue.reset().await.unwrap(), 4);
    assert_eq!(count_jobs(&pool).await, 0);
    assert!(queue.claim().await.unwrap().is_none());
}

#[tokio::test]
#[serial]
#[ignore = "requires TEST_DATABASE_URL"]
async fn deleting_a_payload_cascades_to_its_jobs() {
    let pool = setup_db().await;
    let queue = manager(&pool, "janitor", test_config());

    let payload = insert_payload(&pool, "short-lived").await;
    let job_id = queue.enqueue(&payload).await.unwrap();

    sqlx::query(&format!("DELETE FROM {} WHERE id = $1::uuid", common::PAYLOAD_TABLE))
        .bind(payload["id"].as_str().unwrap())
        .execute(&pool)
        .await
        .unwrap();

    assert!(queue.get(&job_id).await.unwrap().is_none());
}
