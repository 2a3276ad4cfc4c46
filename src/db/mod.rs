use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{Job, JobStatus};

pub mod memory;
pub mod queries;

pub use memory::MemoryJobStore;

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Durable job records, keyed by job ID.
///
/// Updates are single-record overwrites guarded only by the status state
/// machine; exclusivity per job comes from the work queue's lease.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: &Job) -> Result<(), StoreError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, StoreError>;

    async fn mark_processing(&self, job_id: Uuid, attempt: u32) -> Result<(), StoreError>;

    async fn mark_completed(&self, job_id: Uuid, output_path: &str) -> Result<(), StoreError>;

    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<(), StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job {0} already exists")]
    Duplicate(Uuid),

    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Corrupt job record: {0}")]
    Corrupt(String),
}

/// PostgreSQL-backed job store.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Explain why a guarded update touched no rows.
    async fn rejected(&self, job_id: Uuid, to: JobStatus) -> StoreError {
        match queries::get_job(&self.pool, job_id).await {
            Ok(Some(job)) => StoreError::InvalidTransition {
                job_id,
                from: job.status,
                to,
            },
            Ok(None) => StoreError::NotFound(job_id),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: &Job) -> Result<(), StoreError> {
        queries::create_job(&self.pool, job).await
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        queries::get_job(&self.pool, job_id).await
    }

    async fn mark_processing(&self, job_id: Uuid, attempt: u32) -> Result<(), StoreError> {
        let attempt = i32::try_from(attempt).unwrap_or(i32::MAX);
        if queries::mark_processing(&self.pool, job_id, attempt).await? {
            return Ok(());
        }
        Err(self.rejected(job_id, JobStatus::Processing).await)
    }

    async fn mark_completed(&self, job_id: Uuid, output_path: &str) -> Result<(), StoreError> {
        if queries::mark_completed(&self.pool, job_id, output_path).await? {
            return Ok(());
        }
        Err(self.rejected(job_id, JobStatus::Completed).await)
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<(), StoreError> {
        if queries::mark_failed(&self.pool, job_id, error).await? {
            return Ok(());
        }
        Err(self.rejected(job_id, JobStatus::Failed).await)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
