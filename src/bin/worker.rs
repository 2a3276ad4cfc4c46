use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use watermark_jobs::{
    config::AppConfig,
    db::{self, PgJobStore},
    services::{
        imaging::RasterProcessor,
        queue::RedisQueue,
        storage,
        worker::{WorkerContext, WorkerPool},
    },
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting watermark worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");
    let selection = config
        .storage_selection()
        .expect("Invalid storage configuration");
    let queue_settings = config.queue_settings().expect("Invalid queue configuration");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Initialize services
    tracing::info!("Initializing services");
    let storage = storage::build_driver(&selection).expect("Failed to initialize storage driver");

    let queue =
        RedisQueue::new(&config.redis_url, queue_settings).expect("Failed to initialize work queue");

    let processor = RasterProcessor::from_font_path(config.font_path.as_deref())
        .expect("Failed to load watermark font");

    let ctx = WorkerContext::new(
        Arc::new(PgJobStore::new(db_pool)),
        Arc::new(queue),
        storage,
        Arc::new(processor),
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received, finishing in-flight jobs");
        }
        signal.cancel();
    });

    tracing::info!(
        concurrency = queue_settings.concurrency,
        max_attempts = queue_settings.max_attempts,
        "Worker ready, starting job processing loop"
    );

    WorkerPool::new(Arc::new(ctx)).run(shutdown).await;
}
