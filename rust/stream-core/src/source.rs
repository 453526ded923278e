// rust/stream-core/src/source.rs

//! Access to remote shards: structural metadata and whole-shard transfer
//! into the local cache.

use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::{CacheSession, LocalShard};
use crate::catalog::ShardId;
use crate::error::{Result, StreamError};
use crate::format::RecordFormat;
use crate::storage::StorageBackend;

/// Structural metadata of a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardMetadata {
    pub row_count: u64,
}

/// Remote side of a shard.
///
/// Implementations must be callable from the prefetch thread while the
/// consumer thread reads another shard.
pub trait ShardSource: Send + Sync {
    /// Reads the metadata of `shard`, without its body where the format
    /// allows it.
    ///
    /// # Errors
    ///
    /// Returns a metadata error if the row count cannot be determined.
    fn fetch_metadata(&self, dataset: &str, shard: &ShardId) -> Result<ShardMetadata>;

    /// True when `fetch_metadata` has to download shard bodies to count rows.
    fn metadata_reads_body(&self) -> bool {
        false
    }

    /// Copies `shard` into `session` and returns the local handle.
    ///
    /// # Errors
    ///
    /// Returns a fetch error if the transfer fails. No partial file is left
    /// behind.
    fn fetch_content(
        &self,
        dataset: &str,
        shard: &ShardId,
        session: &Arc<CacheSession>,
    ) -> Result<LocalShard>;
}

/// [`ShardSource`] that reads shards through a [`StorageBackend`].
pub struct StorageShardSource<F> {
    storage: Arc<dyn StorageBackend>,
    format: Arc<F>,
    buffer_size: usize,
}

impl<F: RecordFormat> StorageShardSource<F> {
    pub fn new(storage: Arc<dyn StorageBackend>, format: Arc<F>, buffer_size: usize) -> Self {
        Self {
            storage,
            format,
            buffer_size: buffer_size.max(1),
        }
    }

    fn remote_path(dataset: &str, shard: &ShardId) -> PathBuf {
        Path::new(dataset).join(shard.as_str())
    }
}

impl<F: RecordFormat> ShardSource for StorageShardSource<F> {
    fn fetch_metadata(&self, dataset: &str, shard: &ShardId) -> Result<ShardMetadata> {
        let path = Self::remote_path(dataset, shard);
        let mut reader = self
            .storage
            .open_read(&path)
            .map_err(|e| StreamError::metadata(shard.as_str(), e.to_string()))?;

        let row_count = self
            .format
            .row_count(&mut *reader)
            .map_err(|e| StreamError::metadata(shard.as_str(), e.to_string()))?;

        Ok(ShardMetadata { row_count })
    }

    fn metadata_reads_body(&self) -> bool {
        self.format.row_count_reads_body()
    }

    fn fetch_content(
        &self,
        dataset: &str,
        shard: &ShardId,
        session: &Arc<CacheSession>,
    ) -> Result<LocalShard> {
        let path = Self::remote_path(dataset, shard);
        let mut reader = self
            .storage
            .open_read(&path)
            .map_err(|e| StreamError::fetch_with_source(shard.as_str(), "failed to open remote shard", e))?;

        // The guard deletes the partial file if anything below fails.
        let (local, file) = session
            .create_entry(shard)
            .map_err(|e| StreamError::fetch_with_source(shard.as_str(), "no room in local cache", e))?;

        let mut writer = BufWriter::with_capacity(self.buffer_size, file);
        let copied = io::copy(&mut reader, &mut writer)
            .and_then(|n| writer.flush().map(|()| n))
            .map_err(|e| StreamError::fetch_with_source(shard.as_str(), "transfer interrupted", e))?;

        tracing::debug!(
            shard = %shard,
            bytes = copied,
            backend = self.storage.backend_type(),
            "fetched shard content"
        );
        Ok(local)
    }
}
