//! Byte storage behind a single capability interface.
//!
//! The process picks one driver at boot ([`build_driver`]) and hands the same
//! `Arc<dyn StorageDriver>` to the API and the workers.

mod local;
mod remote;

pub use local::LocalStorage;
pub use remote::RemoteStorage;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::StorageSelection;

pub type ByteStream = BoxStream<'static, Result<Bytes, StorageError>>;

#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Short name for logs and health output.
    fn name(&self) -> &'static str;

    /// Write bytes at exactly `key`, replacing anything already there.
    async fn store_at(&self, bytes: Bytes, key: &str, content_type: &str) -> Result<(), StorageError>;

    /// Client-resolvable URL for `key`.
    fn public_url(&self, key: &str) -> String;

    /// Remove `key`. A missing key is not an error; other failures are logged.
    async fn delete(&self, key: &str);

    async fn open_stream(&self, key: &str) -> Result<ByteStream, StorageError>;

    /// Write bytes under a fresh unique name inside `folder` and return the key.
    async fn store(
        &self,
        bytes: Bytes,
        folder: &str,
        extension: Option<&str>,
    ) -> Result<String, StorageError> {
        let key = generate_key(folder, extension);
        self.store_at(bytes, &key, content_type_for(extension)).await?;
        Ok(key)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("S3 request for {key} returned status {status}")]
    Status { key: String, status: u16 },

    #[error("Storage configuration error: {0}")]
    Config(String),
}

/// Build the driver chosen at boot.
pub fn build_driver(selection: &StorageSelection) -> Result<Arc<dyn StorageDriver>, StorageError> {
    match selection {
        StorageSelection::Local {
            upload_dir,
            public_root,
        } => Ok(Arc::new(LocalStorage::new(upload_dir.clone(), public_root)?)),
        StorageSelection::Remote(creds) => Ok(Arc::new(RemoteStorage::new(creds)?)),
    }
}

/// Drain a stream into memory.
pub async fn read_all(stream: ByteStream) -> Result<Vec<u8>, StorageError> {
    stream
        .try_fold(Vec::new(), |mut buf, chunk| async move {
            buf.extend_from_slice(&chunk);
            Ok(buf)
        })
        .await
}

/// `<folder>/<uuid>[.<ext>]`, with separators normalized to `/`.
pub fn generate_key(folder: &str, extension: Option<&str>) -> String {
    let folder = folder.replace('\\', "/");
    let folder = folder.trim_matches('/');
    let name = match extension.map(|e| e.trim_start_matches('.')).filter(|e| !e.is_empty()) {
        Some(ext) => format!("{}.{}", Uuid::new_v4(), ext.to_ascii_lowercase()),
        None => Uuid::new_v4().to_string(),
    };
    if folder.is_empty() {
        name
    } else {
        format!("{folder}/{name}")
    }
}

pub fn content_type_for(extension: Option<&str>) -> &'static str {
    match extension
        .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}
