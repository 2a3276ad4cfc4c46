use std::sync::Arc;

use crate::db::JobStore;
use crate::services::{
    producer::Producer, queue::WorkQueue, status::StatusReader, storage::StorageDriver,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<dyn JobStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub storage: Arc<dyn StorageDriver>,
    pub producer: Producer,
    pub status: StatusReader,
}

impl AppState {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue>,
        storage: Arc<dyn StorageDriver>,
    ) -> Self {
        Self {
            producer: Producer::new(Arc::clone(&jobs), Arc::clone(&queue)),
            status: StatusReader::new(Arc::clone(&jobs)),
            jobs,
            queue,
            storage,
        }
    }
}
