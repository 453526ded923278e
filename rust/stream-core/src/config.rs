// rust/stream-core/src/config.rs

//! Configuration for the shard streamer.
//!
//! Configuration is parsed from TOML, can be overridden through
//! `SHARDSTREAM_*` environment variables, and is validated before a
//! [`Streamer`](crate::Streamer) is built from it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, StreamError};

// Top-level streamer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamerConfig {
    pub storage: StorageConfig,
    pub catalog: CatalogConfig,
    pub cache: CacheConfig,
    pub prefetch: PrefetchConfig,
    pub stream: StreamSection,
}

/// Storage backend type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendType {
    /// Local filesystem storage.
    #[default]
    Local,
    /// S3-compatible object storage.
    S3,
}

// Where shard files are read from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage backend type: "local" or "s3".
    pub backend: StorageBackendType,
    // Root directory holding datasets (local storage only).
    pub base_path: PathBuf,
    // Buffer size in bytes for buffered reads and shard copies.
    pub buffer_size: usize,
    // Whether to memory-map large files (local storage only).
    pub use_mmap: bool,
    // File size threshold (bytes) above which to use mmap.
    pub mmap_threshold: u64,
    /// S3-specific configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Config>,
}

/// S3-compatible storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub bucket: String,
    /// Key prefix holding datasets inside the bucket. Empty means the
    /// bucket root.
    pub prefix: String,
    /// AWS region (e.g., "us-east-1").
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    /// Maximum number of retries for failed requests.
    pub max_retries: u32,
    /// Initial delay (milliseconds) between retries.
    pub retry_delay_ms: u64,
    /// Maximum delay (milliseconds) between retries.
    pub max_retry_delay_ms: u64,
    /// Bytes requested per ranged GET when copying a shard.
    pub read_chunk_size: usize,
    /// Whether to use path-style addressing (required for MinIO).
    pub force_path_style: bool,
    /// Whether to allow HTTP (non-TLS) connections.
    pub allow_http: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            prefix: String::new(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            max_retries: 5,
            retry_delay_ms: 100,
            max_retry_delay_ms: 30_000,
            read_chunk_size: 8 * 1024 * 1024, // 8 MB
            force_path_style: false,
            allow_http: false,
        }
    }
}

impl S3Config {
    /// Apply environment variable overrides to S3 configuration.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("SHARDSTREAM_S3_BUCKET") {
            self.bucket = val;
        }
        if let Ok(val) = std::env::var("SHARDSTREAM_S3_PREFIX") {
            self.prefix = val;
        }
        if let Ok(val) = std::env::var("SHARDSTREAM_S3_REGION") {
            self.region = val;
        }
        if let Ok(val) = std::env::var("SHARDSTREAM_S3_ENDPOINT") {
            self.endpoint = Some(val);
        }
        if let Ok(val) = std::env::var("SHARDSTREAM_S3_ACCESS_KEY_ID") {
            self.access_key_id = Some(val);
        }
        if let Ok(val) = std::env::var("SHARDSTREAM_S3_SECRET_ACCESS_KEY") {
            self.secret_access_key = Some(val);
        }
        if let Ok(val) = std::env::var("SHARDSTREAM_S3_SESSION_TOKEN") {
            self.session_token = Some(val);
        }
        if let Ok(val) = std::env::var("SHARDSTREAM_S3_MAX_RETRIES") {
            if let Ok(v) = val.parse() {
                self.max_retries = v;
            }
        }
        if let Ok(val) = std::env::var("SHARDSTREAM_S3_READ_CHUNK_SIZE") {
            if let Ok(v) = val.parse() {
                self.read_chunk_size = v;
            }
        }
        if let Ok(val) = std::env::var("SHARDSTREAM_S3_ALLOW_HTTP") {
            if let Ok(v) = val.parse() {
                self.allow_http = v;
            }
        }
        self
    }

    /// Validate S3 configuration.
    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(StreamError::config("s3.bucket must not be empty"));
        }
        if self.region.is_empty() {
            return Err(StreamError::config("s3.region must not be empty"));
        }
        if self.read_chunk_size == 0 {
            return Err(StreamError::config(
                "s3.read_chunk_size must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// How a dataset listing becomes an ordered shard catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Only objects with this extension are shards. `None` keeps everything.
    pub extension: Option<String>,
    /// Ordered path prefixes, e.g. `["en/", "de/", "fr/"]`. Each group is
    /// sorted on its own and groups are concatenated in this order; objects
    /// outside every group are dropped. Empty means plain lexicographic order.
    pub prefix_groups: Vec<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            extension: Some("parquet".to_string()),
            prefix_groups: Vec::new(),
        }
    }
}

/// Local scratch space for fetched shards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    // Parent directory for per-stream session directories.
    pub cache_dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("shardstream-cache"),
        }
    }
}

/// Background fetch behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Fetch the next shard while the current one is consumed.
    pub enabled: bool,
    /// Fetch attempts per shard before it is skipped. A failed prefetch
    /// counts as the first attempt.
    pub max_fetch_attempts: u32,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_fetch_attempts: 2,
        }
    }
}

/// Which dataset to stream and where to start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSection {
    pub dataset: String,
    /// Records at or before this global offset are not emitted.
    pub start_offset: u64,
    /// Stop once the global cursor passes this offset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_offset: Option<u64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendType::Local,
            base_path: PathBuf::from("./data"),
            buffer_size: 64 * 1024, // 64 KB
            use_mmap: true,
            mmap_threshold: 1024 * 1024, // 1 MB
            s3: None,
        }
    }
}

impl FromStr for StreamerConfig {
    type Err = StreamError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| StreamError::config_with_source("failed to parse TOML config", e))
    }
}

impl StreamerConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read, parsed, or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            StreamError::storage_with_source(path, "failed to read config file", e)
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // Variables are prefixed with `SHARDSTREAM_`, e.g.
    // - `SHARDSTREAM_STORAGE_BASE_PATH` overrides `storage.base_path`
    // - `SHARDSTREAM_STORAGE_BACKEND` overrides `storage.backend`
    // - `SHARDSTREAM_CACHE_DIR` overrides `cache.cache_dir`
    // - `SHARDSTREAM_STREAM_START_OFFSET` overrides `stream.start_offset`
    // - `SHARDSTREAM_S3_BUCKET` overrides `storage.s3.bucket`
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("SHARDSTREAM_STORAGE_BACKEND") {
            match val.to_lowercase().as_str() {
                "local" => self.storage.backend = StorageBackendType::Local,
                "s3" => self.storage.backend = StorageBackendType::S3,
                _ => {} // ignore invalid values
            }
        }
        if let Ok(val) = std::env::var("SHARDSTREAM_STORAGE_BASE_PATH") {
            self.storage.base_path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("SHARDSTREAM_STORAGE_BUFFER_SIZE") {
            if let Ok(v) = val.parse() {
                self.storage.buffer_size = v;
            }
        }
        if let Ok(val) = std::env::var("SHARDSTREAM_STORAGE_USE_MMAP") {
            if let Ok(v) = val.parse() {
                self.storage.use_mmap = v;
            }
        }

        if std::env::var("SHARDSTREAM_S3_BUCKET").is_ok() {
            let s3_config = self.storage.s3.take().unwrap_or_default().with_env_overrides();
            self.storage.s3 = Some(s3_config);
        } else if let Some(s3_config) = self.storage.s3.take() {
            self.storage.s3 = Some(s3_config.with_env_overrides());
        }

        if let Ok(val) = std::env::var("SHARDSTREAM_CATALOG_EXTENSION") {
            self.catalog.extension = if val.is_empty() { None } else { Some(val) };
        }
        if let Ok(val) = std::env::var("SHARDSTREAM_CATALOG_PREFIX_GROUPS") {
            self.catalog.prefix_groups = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        if let Ok(val) = std::env::var("SHARDSTREAM_CACHE_DIR") {
            self.cache.cache_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("SHARDSTREAM_PREFETCH_ENABLED") {
            if let Ok(v) = val.parse() {
                self.prefetch.enabled = v;
            }
        }
        if let Ok(val) = std::env::var("SHARDSTREAM_PREFETCH_MAX_FETCH_ATTEMPTS") {
            if let Ok(v) = val.parse() {
                self.prefetch.max_fetch_attempts = v;
            }
        }

        if let Ok(val) = std::env::var("SHARDSTREAM_STREAM_DATASET") {
            self.stream.dataset = val;
        }
        if let Ok(val) = std::env::var("SHARDSTREAM_STREAM_START_OFFSET") {
            if let Ok(v) = val.parse() {
                self.stream.start_offset = v;
            }
        }
        if let Ok(val) = std::env::var("SHARDSTREAM_STREAM_END_OFFSET") {
            if let Ok(v) = val.parse() {
                self.stream.end_offset = Some(v);
            }
        }

        self
    }

    // Validate all configuration values.
    //
    // # Errors
    //
    // Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.storage.buffer_size == 0 {
            return Err(StreamError::config(
                "storage.buffer_size must be greater than 0",
            ));
        }

        if self.storage.backend == StorageBackendType::S3 {
            match &self.storage.s3 {
                Some(s3_config) => s3_config.validate()?,
                None => {
                    return Err(StreamError::config(
                        "storage.s3 configuration is required when backend is 's3'",
                    ));
                }
            }
        }

        if let Some(ext) = &self.catalog.extension {
            if ext.is_empty() || ext.starts_with('.') {
                return Err(StreamError::config(
                    "catalog.extension must be non-empty and given without a leading dot",
                ));
            }
        }

        if self.cache.cache_dir.as_os_str().is_empty() {
            return Err(StreamError::config("cache.cache_dir must not be empty"));
        }

        if self.prefetch.max_fetch_attempts == 0 {
            return Err(StreamError::config(
                "prefetch.max_fetch_attempts must be greater than 0",
            ));
        }

        if let Some(end) = self.stream.end_offset {
            if end < self.stream.start_offset {
                return Err(StreamError::config(format!(
                    "stream.end_offset ({end}) must not be below stream.start_offset ({})",
                    self.stream.start_offset
                )));
            }
        }

        Ok(())
    }
}
