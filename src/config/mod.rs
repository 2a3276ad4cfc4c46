use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the work queue
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Root directory for the local storage driver
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// URL prefix under which locally stored keys are served
    #[serde(default = "default_public_root")]
    pub public_root: String,

    /// R2 endpoint URL (S3-compatible)
    pub cloudflare_r2_endpoint: Option<String>,

    /// R2 access key ID
    pub cloudflare_r2_access_key_id: Option<String>,

    /// R2 secret access key
    pub cloudflare_r2_secret_access_key: Option<String>,

    /// R2 bucket name
    pub cloudflare_r2_bucket: Option<String>,

    /// Number of work items a worker process runs at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Deliveries per work item before it is dead-lettered
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,

    /// Base delay of the exponential retry backoff
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// TTF/OTF font used to rasterize text watermarks
    pub font_path: Option<PathBuf>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./uploads")
}

fn default_public_root() -> String {
    "/static".to_string()
}

fn default_concurrency() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    3
}

fn default_lease_secs() -> u64 {
    30
}

fn default_backoff_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

/// Which storage driver the process runs with. Resolved once at boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageSelection {
    Local {
        upload_dir: PathBuf,
        public_root: String,
    },
    Remote(RemoteCredentials),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCredentials {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
}

/// Work queue tuning shared by producer and workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub lease: Duration,
    pub backoff: Duration,
    pub poll_interval: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            lease: Duration::from_secs(default_lease_secs()),
            backoff: Duration::from_millis(default_backoff_ms()),
            poll_interval: Duration::from_millis(default_poll_interval_ms()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Remote storage is partially configured; missing: {}", .missing.join(", "))]
    PartialRemote { missing: Vec<&'static str> },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Ok(envy::from_env()?)
    }

    /// Pick the storage driver.
    ///
    /// A complete set of R2 variables selects remote storage, none selects
    /// local storage, and anything in between is rejected.
    pub fn storage_selection(&self) -> Result<StorageSelection, ConfigError> {
        let fields = [
            ("CLOUDFLARE_R2_ENDPOINT", &self.cloudflare_r2_endpoint),
            ("CLOUDFLARE_R2_ACCESS_KEY_ID", &self.cloudflare_r2_access_key_id),
            ("CLOUDFLARE_R2_SECRET_ACCESS_KEY", &self.cloudflare_r2_secret_access_key),
            ("CLOUDFLARE_R2_BUCKET", &self.cloudflare_r2_bucket),
        ];

        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        let missing: Vec<&'static str> = fields
            .iter()
            .filter(|(_, v)| !present(v))
            .map(|(name, _)| *name)
            .collect();

        if missing.len() == fields.len() {
            return Ok(StorageSelection::Local {
                upload_dir: self.upload_dir.clone(),
                public_root: self.public_root.clone(),
            });
        }
        if !missing.is_empty() {
            return Err(ConfigError::PartialRemote { missing });
        }

        let take = |v: &Option<String>| v.clone().unwrap_or_default();
        Ok(StorageSelection::Remote(RemoteCredentials {
            endpoint: take(&self.cloudflare_r2_endpoint),
            access_key: take(&self.cloudflare_r2_access_key_id),
            secret_key: take(&self.cloudflare_r2_secret_access_key),
            bucket: take(&self.cloudflare_r2_bucket),
        }))
    }

    pub fn queue_settings(&self) -> Result<QueueSettings, ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("CONCURRENCY must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("MAX_ATTEMPTS must be at least 1".into()));
        }
        Ok(QueueSettings {
            concurrency: self.concurrency,
            max_attempts: self.max_attempts,
            lease: Duration::from_secs(self.lease_secs.max(1)),
            backoff: Duration::from_millis(self.backoff_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        })
    }
}
