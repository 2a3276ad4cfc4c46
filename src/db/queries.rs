use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use super::StoreError;
use crate::models::job::{Job, JobStatus, JobType};

const JOB_COLUMNS: &str = r#"
    job_id, job_type, status, input_path, output_path, options::text AS options,
    error, attempts, created_at, updated_at
"#;

fn row_to_job(row: &PgRow) -> Result<Job, StoreError> {
    let job_type: String = row.try_get("job_type")?;
    let status: String = row.try_get("status")?;
    let options: String = row.try_get("options")?;

    Ok(Job {
        job_id: row.try_get("job_id")?,
        job_type: JobType::from_str(&job_type)
            .map_err(|_| StoreError::Corrupt(format!("unknown job type '{job_type}'")))?,
        status: JobStatus::from_str(&status)
            .map_err(|_| StoreError::Corrupt(format!("unknown status '{status}'")))?,
        input_path: row.try_get("input_path")?,
        output_path: row.try_get("output_path")?,
        options: serde_json::from_str(&options)
            .map_err(|e| StoreError::Corrupt(format!("options are not valid JSON: {e}")))?,
        error: row.try_get("error")?,
        attempts: row.try_get("attempts")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn allowed_from(next: JobStatus) -> Vec<String> {
    next.allowed_from()
        .iter()
        .map(|s| s.as_ref().to_string())
        .collect()
}

/// Insert a new queued job
pub async fn create_job(pool: &PgPool, job: &Job) -> Result<(), StoreError> {
    let options = serde_json::to_string(&job.options)
        .map_err(|e| StoreError::Corrupt(format!("options are not serializable: {e}")))?;

    sqlx::query(
        r#"
        INSERT INTO watermark_jobs
            (job_id, job_type, status, input_path, options, attempts, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5::json, $6, $7, $8)
        "#,
    )
    .bind(job.job_id)
    .bind(job.job_type.as_ref())
    .bind(job.status.as_ref())
    .bind(&job.input_path)
    .bind(options)
    .bind(job.attempts)
    .bind(job.created_at)
    .bind(job.updated_at)
    .execute(pool)
    .await
    .map_err(|e| match e.as_database_error() {
        Some(db) if db.is_unique_violation() => StoreError::Duplicate(job.job_id),
        _ => StoreError::Database(e),
    })?;

    Ok(())
}

/// Get a job by ID
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<Job>, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM watermark_jobs WHERE job_id = $1"
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_job).transpose()
}

/// Move a job to `processing` for the given delivery attempt.
///
/// Returns false when the job is missing or its current status forbids it.
pub async fn mark_processing(pool: &PgPool, job_id: Uuid, attempt: i32) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE watermark_jobs
        SET status = 'processing',
            attempts = GREATEST(attempts, $2),
            error = NULL,
            updated_at = NOW()
        WHERE job_id = $1 AND status = ANY($3)
        "#,
    )
    .bind(job_id)
    .bind(attempt)
    .bind(allowed_from(JobStatus::Processing))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Record the public URL of a finished job
pub async fn mark_completed(pool: &PgPool, job_id: Uuid, output_path: &str) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE watermark_jobs
        SET status = 'completed',
            output_path = $2,
            error = NULL,
            updated_at = NOW()
        WHERE job_id = $1 AND status = ANY($3)
        "#,
    )
    .bind(job_id)
    .bind(output_path)
    .bind(allowed_from(JobStatus::Completed))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Record a failed attempt
pub async fn mark_failed(pool: &PgPool, job_id: Uuid, error: &str) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE watermark_jobs
        SET status = 'failed',
            error = $2,
            updated_at = NOW()
        WHERE job_id = $1 AND status = ANY($3)
        "#,
    )
    .bind(job_id)
    .bind(error)
    .bind(allowed_from(JobStatus::Failed))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
