use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio_util::io::ReaderStream;

use super::{ByteStream, StorageDriver, StorageError};

/// Filesystem-backed storage rooted at an upload directory.
pub struct LocalStorage {
    root: PathBuf,
    public_root: String,
}

impl LocalStorage {
    pub fn new(root: PathBuf, public_root: &str) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            public_root: public_root.trim_end_matches('/').to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key onto a path under the root, refusing anything that escapes it.
    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key.trim_start_matches('/'));
        let mut path = self.root.clone();
        let mut depth = 0;
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    path.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                _ => return Err(StorageError::InvalidKey(key.to_string())),
            }
        }
        if depth == 0 {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(path)
    }
}

#[async_trait]
impl StorageDriver for LocalStorage {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn store_at(&self, bytes: Bytes, key: &str, _content_type: &str) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&path, &bytes).await?;
        tracing::debug!(key, size = bytes.len(), "Stored object on local disk");
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!(
            "{}/{}",
            self.public_root,
            key.replace('\\', "/").trim_start_matches('/')
        )
    }

    async fn delete(&self, key: &str) {
        let path = match self.resolve(key) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(key, error = %e, "Refusing to delete invalid key");
                return;
            }
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::debug!(key, "Deleted local object"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(key, path = %path.display(), error = %e, "Failed to delete local file")
            }
        }
    }

    async fn open_stream(&self, key: &str) -> Result<ByteStream, StorageError> {
        let path = self.resolve(key)?;
        let file = tokio::fs::File::open(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound(key.to_string()),
            _ => StorageError::Io(e),
        })?;
        Ok(ReaderStream::new(file).map_err(StorageError::Io).boxed())
    }
}
