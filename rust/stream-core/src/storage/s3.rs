// rust/stream-core/src/storage/s3.rs

//! S3-compatible storage backend using the object_store crate.
//!
//! The stream pipeline is synchronous (one consumer thread plus one fetch
//! thread), so this backend owns a small tokio runtime and blocks on it.
//! Do not call it from inside another async runtime.
//!
//! Readers are lazy: `read_range` issues a single ranged GET, which is what
//! footer-only metadata reads rely on, and sequential `Read` pulls the object
//! in `read_chunk_size` pieces.

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::ObjectStore;
use tokio::runtime::Runtime;

use super::retry::{retry_async, RetryConfig, RetryResult};
use super::traits::{StorageBackend, StorageReader};
use crate::config::S3Config;
use crate::error::{Result, StreamError};

/// S3-compatible storage backend.
pub struct S3Storage {
    store: Arc<AmazonS3>,
    /// Base prefix for all keys.
    base_prefix: String,
    retry_config: RetryConfig,
    runtime: Arc<Runtime>,
    read_chunk_size: usize,
}

impl S3Storage {
    /// Creates a new S3Storage from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the S3 client or its runtime cannot be built.
    pub fn new(config: &S3Config) -> Result<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        if let Some(access_key) = &config.access_key_id {
            builder = builder.with_access_key_id(access_key);
        }
        if let Some(secret_key) = &config.secret_access_key {
            builder = builder.with_secret_access_key(secret_key);
        }
        if let Some(token) = &config.session_token {
            builder = builder.with_token(token);
        }
        if config.force_path_style {
            builder = builder.with_virtual_hosted_style_request(false);
        }
        if config.allow_http {
            builder = builder.with_allow_http(true);
        }

        let store = builder
            .build()
            .map_err(|e| StreamError::config_with_source("failed to build S3 client", e))?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("s3-storage")
            .enable_all()
            .build()
            .map_err(|e| StreamError::config_with_source("failed to start S3 runtime", e))?;

        Ok(Self {
            store: Arc::new(store),
            base_prefix: config.prefix.trim_matches('/').to_string(),
            retry_config: RetryConfig::from(config),
            runtime: Arc::new(runtime),
            read_chunk_size: config.read_chunk_size,
        })
    }

    /// Resolves a path to an object_store path with the base prefix.
    fn resolve_path(&self, path: &Path) -> object_store::path::Path {
        let path_str = path.to_string_lossy();
        let full_path = if self.base_prefix.is_empty() {
            path_str.to_string()
        } else {
            format!(
                "{}/{}",
                self.base_prefix.trim_end_matches('/'),
                path_str.trim_start_matches('/')
            )
        };
        object_store::path::Path::from(full_path)
    }

    fn convert_error(path: &Path, message: &str, error: object_store::Error) -> StreamError {
        StreamError::storage(path, format!("{message}: {error}"))
    }

    fn is_retryable_error(error: &object_store::Error) -> bool {
        let text = error.to_string();
        matches!(error, object_store::Error::Generic { .. })
            || text.contains("timeout")
            || text.contains("connection")
            || text.contains("503")
            || text.contains("500")
    }

    fn head(&self, path: &Path) -> std::result::Result<object_store::ObjectMeta, object_store::Error> {
        let object_path = self.resolve_path(path);
        self.runtime.block_on(retry_async(&self.retry_config, || {
            let store = self.store.clone();
            let obj_path = object_path.clone();
            async move {
                match store.head(&obj_path).await {
                    Ok(meta) => RetryResult::Ok(meta),
                    Err(e) if Self::is_retryable_error(&e) => RetryResult::Retry(e),
                    Err(e) => RetryResult::Fail(e),
                }
            }
        }))
    }
}

impl StorageBackend for S3Storage {
    fn open_read(&self, path: &Path) -> Result<Box<dyn StorageReader>> {
        let meta = self
            .head(path)
            .map_err(|e| Self::convert_error(path, "failed to open object", e))?;
        Ok(Box::new(S3Reader {
            store: self.store.clone(),
            runtime: self.runtime.clone(),
            retry_config: self.retry_config.clone(),
            location: self.resolve_path(path),
            path: path.to_path_buf(),
            size: meta.size as u64,
            position: 0,
            chunk: Bytes::new(),
            chunk_start: 0,
            chunk_size: self.read_chunk_size,
        }))
    }

    fn list(&self, prefix: &Path) -> Result<Vec<String>> {
        let object_prefix = self.resolve_path(prefix);
        let prefix_str = object_prefix.to_string();
        let prefix_len = if prefix_str.is_empty() { 0 } else { prefix_str.len() + 1 };

        let entries = self
            .runtime
            .block_on(retry_async(&self.retry_config, || {
                let store = self.store.clone();
                let obj_prefix = object_prefix.clone();
                async move {
                    match store.list(Some(&obj_prefix)).try_collect::<Vec<_>>().await {
                        Ok(entries) => RetryResult::Ok(entries),
                        Err(e) if Self::is_retryable_error(&e) => RetryResult::Retry(e),
                        Err(e) => RetryResult::Fail(e),
                    }
                }
            }))
            .map_err(|e| Self::convert_error(prefix, "failed to list objects", e))?;

        let mut names: Vec<String> = entries
            .into_iter()
            .map(|m| {
                let path = m.location.to_string();
                if path.len() > prefix_len {
                    path[prefix_len..].to_string()
                } else {
                    path
                }
            })
            .collect();
        names.sort();
        Ok(names)
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}

/// Lazy reader over one S3 object.
struct S3Reader {
    store: Arc<AmazonS3>,
    runtime: Arc<Runtime>,
    retry_config: RetryConfig,
    location: object_store::path::Path,
    path: PathBuf,
    size: u64,
    position: u64,
    /// Last fetched chunk and its offset in the object.
    chunk: Bytes,
    chunk_start: u64,
    chunk_size: usize,
}

impl S3Reader {
    fn get_range(&self, start: u64, end: u64) -> Result<Bytes> {
        let range = start as usize..end as usize;
        self.runtime
            .block_on(retry_async(&self.retry_config, || {
                let store = self.store.clone();
                let location = self.location.clone();
                let range = range.clone();
                async move {
                    match store.get_range(&location, range).await {
                        Ok(bytes) => RetryResult::Ok(bytes),
                        Err(e) if S3Storage::is_retryable_error(&e) => RetryResult::Retry(e),
                        Err(e) => RetryResult::Fail(e),
                    }
                }
            }))
            .map_err(|e| S3Storage::convert_error(&self.path, "failed to get range", e))
    }
}

impl Read for S3Reader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.position >= self.size || buf.is_empty() {
            return Ok(0);
        }

        let chunk_end = self.chunk_start + self.chunk.len() as u64;
        if self.position < self.chunk_start || self.position >= chunk_end {
            let end = (self.position + self.chunk_size as u64).min(self.size);
            self.chunk = self
                .get_range(self.position, end)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
            self.chunk_start = self.position;
        }

        let offset = (self.position - self.chunk_start) as usize;
        let available = &self.chunk[offset..];
        let to_read = buf.len().min(available.len());
        buf[..to_read].copy_from_slice(&available[..to_read]);
        self.position += to_read as u64;
        Ok(to_read)
    }
}

impl Seek for S3Reader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.size as i64 + offset,
            SeekFrom::Current(offset) => self.position as i64 + offset,
        };

        if new_pos < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek to negative position",
            ));
        }

        self.position = new_pos as u64;
        Ok(self.position)
    }
}

impl StorageReader for S3Reader {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_range(&mut self, start: u64, length: usize) -> Result<Vec<u8>> {
        let end = start + length as u64;
        if end > self.size {
            return Err(StreamError::storage(
                &self.path,
                format!("read range {start}..{end} exceeds object size {}", self.size),
            ));
        }
        Ok(self.get_range(start, end)?.to_vec())
    }
}
