// rust/stream-core/src/runtime.rs

//! Stream construction.
//!
//! A [`Streamer`] owns the collaborators of a stream (catalog, shard
//! source, record format) and opens any number of independent
//! [`RecordStream`]s, each with its own cache session and cursor.
//!
//! # Example
//!
//! ```no_run
//! use stream_core::{Streamer, StreamerConfig};
//!
//! let mut config = StreamerConfig::default();
//! config.storage.base_path = "/mnt/datasets".into();
//!
//! let streamer = Streamer::from_config(config).unwrap();
//! let mut stream = streamer.open_stream("wikipedia-embeddings", 31_364_096).unwrap();
//!
//! for (cursor, row) in stream.by_ref().take(1000) {
//!     println!("{cursor}: {row}");
//! }
//! for gap in stream.gap_skips() {
//!     eprintln!("missing: {gap}");
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use parquet::record::Row;

use crate::cache::CacheSession;
use crate::catalog::{ShardCatalog, ShardOrder, StorageCatalog};
use crate::config::{StorageBackendType, StorageConfig, StreamerConfig};
use crate::dataset::{RecordStream, StreamOptions};
use crate::error::{Result, StreamError};
use crate::format::{ParquetFormat, RecordFormat};
use crate::source::{ShardSource, StorageShardSource};
use crate::storage::{LocalStorage, StorageBackend};

/// Opens record streams over datasets.
pub struct Streamer<R> {
    config: StreamerConfig,
    catalog: Arc<dyn ShardCatalog>,
    source: Arc<dyn ShardSource>,
    format: Arc<dyn RecordFormat<Record = R>>,
    order: ShardOrder,
}

impl Streamer<Row> {
    /// Creates a parquet streamer reading through the configured storage
    /// backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the storage
    /// backend cannot be initialized.
    pub fn from_config(config: StreamerConfig) -> Result<Self> {
        Self::with_format(config, ParquetFormat::new())
    }

    /// Creates a parquet streamer from a TOML configuration file.
    ///
    /// Environment variable overrides are applied after loading the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or is invalid.
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = StreamerConfig::from_file(path)?.with_env_overrides();
        Self::from_config(config)
    }
}

impl<R: 'static> Streamer<R> {
    /// Creates a streamer for shards in `format`, reading through the
    /// configured storage backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the storage
    /// backend cannot be initialized.
    pub fn with_format<F>(config: StreamerConfig, format: F) -> Result<Self>
    where
        F: RecordFormat<Record = R> + 'static,
    {
        config.validate()?;

        let storage = build_storage(&config.storage)?;
        let format = Arc::new(format);
        let catalog = StorageCatalog::new(Arc::clone(&storage), config.catalog.extension.clone());
        let source =
            StorageShardSource::new(Arc::clone(&storage), Arc::clone(&format), config.storage.buffer_size);

        tracing::debug!(
            backend = storage.backend_type(),
            format = format.name(),
            "created streamer"
        );

        Ok(Self::new(Arc::new(catalog), Arc::new(source), format, config))
    }

    /// Creates a streamer from explicit collaborators.
    pub fn new(
        catalog: Arc<dyn ShardCatalog>,
        source: Arc<dyn ShardSource>,
        format: Arc<dyn RecordFormat<Record = R>>,
        config: StreamerConfig,
    ) -> Self {
        let order = ShardOrder::from_config(&config.catalog);
        Self {
            config,
            catalog,
            source,
            format,
            order,
        }
    }

    /// Opens a stream yielding every record of `dataset` whose global
    /// cursor is above `start_offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the local cache session cannot be created. A
    /// dataset that cannot be listed is not an error; it streams nothing.
    pub fn open_stream(&self, dataset: &str, start_offset: u64) -> Result<RecordStream<R>> {
        self.open_with(StreamOptions::new(dataset, start_offset))
    }

    /// Opens a stream for the `[stream]` section of the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if no dataset is configured or the local cache
    /// session cannot be created.
    pub fn open_configured(&self) -> Result<RecordStream<R>> {
        let section = &self.config.stream;
        if section.dataset.is_empty() {
            return Err(StreamError::config("stream.dataset must be set"));
        }
        self.open_with(StreamOptions {
            dataset: section.dataset.clone(),
            start_offset: section.start_offset,
            end_offset: section.end_offset,
        })
    }

    /// Opens a stream with explicit options.
    ///
    /// # Errors
    ///
    /// Returns an error if `end_offset` lies below `start_offset` or the
    /// local cache session cannot be created.
    pub fn open_with(&self, options: StreamOptions) -> Result<RecordStream<R>> {
        if let Some(end) = options.end_offset {
            if end < options.start_offset {
                return Err(StreamError::config(format!(
                    "end offset {end} lies below start offset {}",
                    options.start_offset
                )));
            }
        }

        let session = CacheSession::open(&self.config.cache.cache_dir)?;
        tracing::info!(
            dataset = %options.dataset,
            start_offset = options.start_offset,
            end_offset = ?options.end_offset,
            cache = %session.path().display(),
            "opening record stream"
        );

        Ok(RecordStream::open(
            self.catalog.as_ref(),
            &self.order,
            Arc::clone(&self.source),
            Arc::clone(&self.format),
            session,
            &self.config.prefetch,
            &options,
        ))
    }

    /// Returns the current configuration.
    pub fn config(&self) -> &StreamerConfig {
        &self.config
    }
}

fn build_storage(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
    match config.backend {
        StorageBackendType::Local => Ok(Arc::new(LocalStorage::new(config)?)),
        #[cfg(feature = "s3")]
        StorageBackendType::S3 => {
            let s3 = config
                .s3
                .as_ref()
                .ok_or_else(|| StreamError::config("storage.s3 configuration is required"))?;
            Ok(Arc::new(crate::storage::S3Storage::new(s3)?))
        }
        #[cfg(not(feature = "s3"))]
        StorageBackendType::S3 => Err(StreamError::config(
            "s3 storage requested but stream-core was built without the `s3` feature",
        )),
    }
}
