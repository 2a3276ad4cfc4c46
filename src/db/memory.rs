use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{JobStore, StoreError};
use crate::models::job::{Job, JobStatus};

/// Process-local job store for tests and single-process runs.
#[derive(Clone, Default)]
pub struct MemoryJobStore {
    jobs: Arc<RwLock<HashMap<Uuid, Job>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    async fn transition<F>(&self, job_id: Uuid, to: JobStatus, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Job) + Send,
    {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&job_id).ok_or(StoreError::NotFound(job_id))?;
        if !job.status.can_transition_to(to) {
            return Err(StoreError::InvalidTransition {
                job_id,
                from: job.status,
                to,
            });
        }
        job.status = to;
        apply(job);
        job.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.job_id) {
            return Err(StoreError::Duplicate(job.job_id));
        }
        jobs.insert(job.job_id, job.clone());
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.read().await.get(&job_id).cloned())
    }

    async fn mark_processing(&self, job_id: Uuid, attempt: u32) -> Result<(), StoreError> {
        let attempt = i32::try_from(attempt).unwrap_or(i32::MAX);
        self.transition(job_id, JobStatus::Processing, |job| {
            job.attempts = job.attempts.max(attempt);
            job.error = None;
        })
        .await
    }

    async fn mark_completed(&self, job_id: Uuid, output_path: &str) -> Result<(), StoreError> {
        let output_path = output_path.to_string();
        self.transition(job_id, JobStatus::Completed, move |job| {
            job.output_path = Some(output_path);
            job.error = None;
        })
        .await
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<(), StoreError> {
        let error = error.to_string();
        self.transition(job_id, JobStatus::Failed, move |job| job.error = Some(error))
            .await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
