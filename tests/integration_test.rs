use std::time::Duration;
use uuid::Uuid;
use watermark_jobs::{
    config::{AppConfig, QueueSettings},
    db::{self, JobStore, PgJobStore, StoreError},
    models::{
        job::{Job, JobStatus, JobType},
        options::{TextOptions, WatermarkSpec},
    },
    services::queue::{FailOutcome, RedisQueue, WorkItem, WorkQueue},
};

fn work_item() -> WorkItem {
    WorkItem {
        job_id: Uuid::new_v4(),
        input_key: format!("raw/{}.png", Uuid::new_v4()),
        spec: WatermarkSpec::Text(TextOptions {
            text: "integration".into(),
            font_size: Some(24),
            gravity: Some("north".into()),
            opacity: None,
        }),
    }
}

/// Integration test: job record lifecycle against PostgreSQL
///
/// Note: This requires a running PostgreSQL instance configured via
/// DATABASE_URL.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_job_store_lifecycle() {
    let config = AppConfig::from_env().expect("Failed to load config");

    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run migrations");
    let store = PgJobStore::new(db_pool);

    store.health_check().await.expect("Database health check failed");

    let item = work_item();
    let job = Job::queued(
        item.job_id,
        JobType::Text,
        item.input_key.clone(),
        item.spec.options_value(),
    );
    store.create(&job).await.expect("Failed to create job");
    assert!(matches!(
        store.create(&job).await,
        Err(StoreError::Duplicate(_))
    ));

    let stored = store.get(job.job_id).await.unwrap().expect("Job not found");
    assert_eq!(stored.status, JobStatus::Queued);
    assert_eq!(stored.options, job.options);

    // First attempt fails, second succeeds
    store.mark_processing(job.job_id, 1).await.unwrap();
    store.mark_failed(job.job_id, "decode error").await.unwrap();
    let failed = store.get(job.job_id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("decode error"));

    store.mark_processing(job.job_id, 2).await.unwrap();
    store
        .mark_completed(job.job_id, "/static/processed/out.png")
        .await
        .unwrap();

    let done = store.get(job.job_id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.attempts, 2);
    assert!(done.error.is_none());
    assert_eq!(done.output_path.as_deref(), Some("/static/processed/out.png"));

    // Completed is never left
    assert!(matches!(
        store.mark_processing(job.job_id, 3).await,
        Err(StoreError::InvalidTransition {
            from: JobStatus::Completed,
            ..
        })
    ));
    assert!(matches!(
        store.mark_failed(Uuid::new_v4(), "x").await,
        Err(StoreError::NotFound(_))
    ));

    println!("✓ Job store lifecycle passed");
}

/// Integration test: leased delivery against Redis
///
/// Note: This requires a running Redis instance configured via REDIS_URL.
/// The queue keys are shared, so run against a scratch database.
#[tokio::test]
#[ignore]
async fn test_redis_queue_retry_and_ack() {
    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let settings = QueueSettings {
        concurrency: 1,
        max_attempts: 2,
        lease: Duration::from_secs(30),
        backoff: Duration::ZERO,
        poll_interval: Duration::from_millis(10),
    };
    let queue = RedisQueue::new(&redis_url, settings).expect("Failed to initialize queue");
    queue.health_check().await.expect("Redis health check failed");

    let item = work_item();
    queue.enqueue(&item).await.unwrap();

    // Drain until our item comes up; other items are acked out of the way
    let first = loop {
        let delivery = queue.claim().await.unwrap().expect("Item was not delivered");
        if delivery.item.job_id == item.job_id {
            break delivery;
        }
        queue.ack(&delivery).await.unwrap();
    };
    assert_eq!(first.attempt, 1);
    assert_eq!(first.item, item);

    let outcome = queue.fail(&first).await.unwrap();
    assert!(matches!(outcome, FailOutcome::Retry { next_attempt: 2, .. }));

    queue.reap().await.unwrap();
    let second = queue.claim().await.unwrap().expect("Retry was not delivered");
    assert_eq!(second.item.job_id, item.job_id);
    assert_eq!(second.attempt, 2);

    assert!(queue.ack(&second).await.unwrap());
    assert!(!queue.ack(&second).await.unwrap());

    println!("✓ Redis queue retry and ack passed");
}

/// Integration test: an expired holder cannot settle the lease of the next one
#[tokio::test]
#[ignore]
async fn test_redis_stale_lease_cannot_settle() {
    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let settings = QueueSettings {
        concurrency: 1,
        max_attempts: 3,
        lease: Duration::from_millis(200),
        backoff: Duration::ZERO,
        poll_interval: Duration::from_millis(10),
    };
    let queue = RedisQueue::new(&redis_url, settings).expect("Failed to initialize queue");

    let item = work_item();
    queue.enqueue(&item).await.unwrap();
    let stale = loop {
        let delivery = queue.claim().await.unwrap().expect("Item was not delivered");
        if delivery.item.job_id == item.job_id {
            break delivery;
        }
        queue.ack(&delivery).await.unwrap();
    };

    tokio::time::sleep(Duration::from_millis(300)).await;
    queue.reap().await.unwrap();
    let live = loop {
        let delivery = queue.claim().await.unwrap().expect("Item was not redelivered");
        if delivery.item.job_id == item.job_id {
            break delivery;
        }
        queue.ack(&delivery).await.unwrap();
    };
    assert_eq!(live.attempt, 2);

    assert_eq!(queue.fail(&stale).await.unwrap(), FailOutcome::LeaseLost);
    assert!(!queue.ack(&stale).await.unwrap());
    assert!(queue.ack(&live).await.unwrap());

    println!("✓ Redis stale lease rejected");
}
