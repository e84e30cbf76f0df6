use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::storage::RetryPolicy;

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub local: LocalConfig,
    #[serde(default)]
    pub object_store: ObjectStoreConfig,
    #[serde(default)]
    pub blob_cdn: BlobCdnConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalConfig {
    #[serde(default = "default_local_path")]
    pub base_path: String,
}

/// S3/COS-compatible bucket holding public copies
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectStoreConfig {
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub region: String,
    /// Overrides `https://<bucket>.cos.<region>.myqcloud.com`.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub secret_id: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub base_path: String,
    #[serde(default)]
    pub data_profile: String,
    /// Host the bucket is published under, e.g. `//files.example.com` or `s3://bucket`.
    #[serde(default)]
    pub public_base_url: Option<String>,
    /// Hand out presigned URLs valid this long instead of public ones.
    #[serde(default)]
    pub presign_seconds: Option<u32>,
}

/// Filestack-style blob CDN
#[derive(Debug, Clone, Deserialize)]
pub struct BlobCdnConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: Option<String>,
    #[serde(default)]
    pub custom_domain: Option<String>,
    #[serde(default = "default_blob_cdn_api_base")]
    pub api_base: String,
    #[serde(default = "default_policy_ttl")]
    pub policy_ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

// Default values
fn default_db_path() -> String {
    "data/stateless-files.db".to_string()
}

fn default_local_path() -> String {
    "data/files".to_string()
}

fn default_blob_cdn_api_base() -> String {
    "https://www.filestackapi.com".to_string()
}

fn default_policy_ttl() -> u64 {
    3600
}

fn default_timeout() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_retries() -> u32 {
    2
}

fn default_retry_backoff() -> u64 {
    250
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            base_path: default_local_path(),
        }
    }
}

impl Default for BlobCdnConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: None,
            custom_domain: None,
            api_base: default_blob_cdn_api_base(),
            policy_ttl_seconds: default_policy_ttl(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
            retries: default_retries(),
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}

impl ObjectStoreConfig {
    pub fn is_enabled(&self) -> bool {
        !self.bucket.is_empty() && !self.secret_id.is_empty() && !self.secret_key.is_empty()
    }

    pub fn endpoint_url(&self) -> String {
        match self.endpoint.as_deref().filter(|e| !e.is_empty()) {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://{}.cos.{}.myqcloud.com", self.bucket, self.region),
        }
    }
}

impl BlobCdnConfig {
    pub fn is_enabled(&self) -> bool {
        !self.api_key.is_empty()
    }
}

impl TransportConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retries + 1,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    ///
    /// An explicit path must exist; otherwise the usual locations are searched.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load_from_path(path)?,
            None => Self::load_from_file()?,
        };
        config.apply_env_overrides();
        config.ensure_directories()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load configuration from conf.toml or config.toml
    fn load_from_file() -> anyhow::Result<Self> {
        let config_paths = ["conf.toml", "config.toml", "data/conf.toml", "data/config.toml"];

        for path in config_paths {
            if Path::new(path).exists() {
                return Self::load_from_path(Path::new(path));
            }
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(Config::default())
    }

    /// Apply environment variable overrides
    /// Format: SF_CONF_<SECTION>_<KEY>
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Database / local
        if let Some(val) = lookup("SF_CONF_DATABASE_PATH") {
            self.database.path = val;
        }
        if let Some(val) = lookup("SF_CONF_LOCAL_BASE_PATH") {
            self.local.base_path = val;
        }

        // Object store
        let os = &mut self.object_store;
        if let Some(val) = lookup("SF_CONF_OBJECT_STORE_BUCKET") {
            os.bucket = val;
        }
        if let Some(val) = lookup("SF_CONF_OBJECT_STORE_REGION") {
            os.region = val;
        }
        if let Some(val) = lookup("SF_CONF_OBJECT_STORE_ENDPOINT") {
            os.endpoint = Some(val);
        }
        if let Some(val) = lookup("SF_CONF_OBJECT_STORE_SECRET_ID") {
            os.secret_id = val;
        }
        if let Some(val) = lookup("SF_CONF_OBJECT_STORE_SECRET_KEY") {
            os.secret_key = val;
        }
        if let Some(val) = lookup("SF_CONF_OBJECT_STORE_BASE_PATH") {
            os.base_path = val;
        }
        if let Some(val) = lookup("SF_CONF_OBJECT_STORE_DATA_PROFILE") {
            os.data_profile = val;
        }
        if let Some(val) = lookup("SF_CONF_OBJECT_STORE_PUBLIC_BASE_URL") {
            os.public_base_url = Some(val);
        }
        if let Some(val) = lookup("SF_CONF_OBJECT_STORE_PRESIGN_SECONDS") {
            if let Ok(secs) = val.parse::<u32>() {
                os.presign_seconds = Some(secs);
            }
        }

        // Blob CDN
        let cdn = &mut self.blob_cdn;
        if let Some(val) = lookup("SF_CONF_BLOB_CDN_API_KEY") {
            cdn.api_key = val;
        }
        if let Some(val) = lookup("SF_CONF_BLOB_CDN_API_SECRET") {
            cdn.api_secret = Some(val).filter(|s| !s.is_empty());
        }
        if let Some(val) = lookup("SF_CONF_BLOB_CDN_CUSTOM_DOMAIN") {
            cdn.custom_domain = Some(val).filter(|s| !s.is_empty());
        }
        if let Some(val) = lookup("SF_CONF_BLOB_CDN_API_BASE") {
            cdn.api_base = val;
        }

        // Transport
        let transport = &mut self.transport;
        let number = |key: &str| lookup(key).and_then(|v| v.parse::<u64>().ok());
        if let Some(secs) = number("SF_CONF_TRANSPORT_TIMEOUT_SECONDS") {
            transport.timeout_seconds = secs;
        }
        if let Some(retries) = number("SF_CONF_TRANSPORT_RETRIES") {
            transport.retries = u32::try_from(retries).unwrap_or(u32::MAX);
        }
        if let Some(ms) = number("SF_CONF_TRANSPORT_RETRY_BACKOFF_MS") {
            transport.retry_backoff_ms = ms;
        }
    }

    /// Ensure required directories exist
    fn ensure_directories(&self) -> anyhow::Result<()> {
        if let Some(parent) = Path::new(&self.database.path).parent() {
            fs::create_dir_all(parent)?;
        }
        fs::create_dir_all(&self.local.base_path)?;
        Ok(())
    }
}
