use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use watermark_jobs::app_state::AppState;
use watermark_jobs::config::{AppConfig, StorageSelection};
use watermark_jobs::db::{self, PgJobStore};
use watermark_jobs::routes;
use watermark_jobs::services::{queue::RedisQueue, storage};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");
    let selection = config
        .storage_selection()
        .expect("Invalid storage configuration");
    let queue_settings = config.queue_settings().expect("Invalid queue configuration");

    tracing::info!("Initializing watermark API server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_metrics();

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    let storage = storage::build_driver(&selection).expect("Failed to initialize storage driver");
    tracing::info!(driver = storage.name(), "Storage driver ready");

    tracing::info!("Connecting to Redis work queue");
    let queue = RedisQueue::new(&config.redis_url, queue_settings)
        .expect("Failed to initialize work queue");

    let state = AppState::new(
        Arc::new(PgJobStore::new(db_pool)),
        Arc::new(queue),
        storage,
    );

    let mut app = routes::api_router(state).route(
        "/metrics",
        get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
    );

    // Locally stored objects are served from the same origin when PUBLIC_ROOT is a path
    if let StorageSelection::Local {
        upload_dir,
        public_root,
    } = &selection
    {
        let mount = public_root.trim_end_matches('/');
        if mount.starts_with('/') && mount.len() > 1 {
            tracing::info!(dir = %upload_dir.display(), mount, "Serving local uploads");
            app = app.nest_service(mount, ServeDir::new(upload_dir));
        } else {
            tracing::info!(public_root = %public_root, "Local uploads served externally");
        }
    }

    let app: Router = app
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive());

    tracing::info!("Starting watermark API on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await
        .expect("Server error");
}
