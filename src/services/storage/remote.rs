use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};

use super::{ByteStream, StorageDriver, StorageError};
use crate::config::RemoteCredentials;

/// Client for Cloudflare R2 object storage (S3-compatible).
pub struct RemoteStorage {
    bucket: Box<Bucket>,
    public_base: String,
}

impl RemoteStorage {
    pub fn new(creds: &RemoteCredentials) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: creds.endpoint.clone(),
        };

        let credentials = Credentials::new(
            Some(&creds.access_key),
            Some(&creds.secret_key),
            None,
            None,
            None,
        )
        .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(&creds.bucket, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self {
            bucket,
            public_base: public_base(&creds.endpoint, &creds.bucket)?,
        })
    }
}

/// `<scheme>://<bucket>.<endpoint host>`
fn public_base(endpoint: &str, bucket: &str) -> Result<String, StorageError> {
    let (scheme, rest) = endpoint
        .split_once("://")
        .ok_or_else(|| StorageError::Config(format!("endpoint has no scheme: {endpoint}")))?;
    let host = rest.split('/').next().unwrap_or_default();
    if host.is_empty() {
        return Err(StorageError::Config(format!("endpoint has no host: {endpoint}")));
    }
    Ok(format!("{scheme}://{bucket}.{host}"))
}

fn is_not_found(err: &S3Error) -> bool {
    matches!(err, S3Error::HttpFailWithBody(404, _))
}

#[async_trait]
impl StorageDriver for RemoteStorage {
    fn name(&self) -> &'static str {
        "r2"
    }

    async fn store_at(&self, bytes: Bytes, key: &str, content_type: &str) -> Result<(), StorageError> {
        let response = self
            .bucket
            .put_object_with_content_type(key, &bytes, content_type)
            .await?;
        let status = response.status_code();
        if status >= 300 {
            return Err(StorageError::Status {
                key: key.to_string(),
                status,
            });
        }
        tracing::debug!(key, size = bytes.len(), "Uploaded object to R2");
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key.trim_start_matches('/'))
    }

    async fn delete(&self, key: &str) {
        match self.bucket.delete_object(key).await {
            Ok(response) => {
                let status = response.status_code();
                if status >= 300 && status != 404 {
                    tracing::warn!(key, status, "Failed to delete R2 object");
                }
            }
            Err(e) if is_not_found(&e) => {}
            Err(e) => tracing::warn!(key, error = %e, "Failed to delete R2 object"),
        }
    }

    async fn open_stream(&self, key: &str) -> Result<ByteStream, StorageError> {
        let response = self.bucket.get_object_stream(key).await.map_err(|e| {
            if is_not_found(&e) {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::S3(e)
            }
        })?;

        match response.status_code {
            404 => return Err(StorageError::NotFound(key.to_string())),
            status if status >= 300 => {
                return Err(StorageError::Status {
                    key: key.to_string(),
                    status,
                })
            }
            _ => {}
        }

        Ok(response.bytes.map_err(StorageError::S3).boxed())
    }
}
