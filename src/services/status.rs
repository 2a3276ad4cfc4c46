use std::sync::Arc;
use uuid::Uuid;

use crate::db::{JobStore, StoreError};
use crate::models::job::Job;

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("Job with ID {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Read-only view over job records.
#[derive(Clone)]
pub struct StatusReader {
    jobs: Arc<dyn JobStore>,
}

impl StatusReader {
    pub fn new(jobs: Arc<dyn JobStore>) -> Self {
        Self { jobs }
    }

    pub async fn get_status(&self, job_id: Uuid) -> Result<Job, StatusError> {
        self.jobs
            .get(job_id)
            .await?
            .ok_or(StatusError::NotFound(job_id))
    }
}
