// rust/stream-core/src/cache.rs

//! Per-stream local scratch space for fetched shards.
//!
//! Each opened stream owns one [`CacheSession`]: a private temporary
//! directory below the configured cache root. Every fetched shard lives in
//! it as a [`LocalShard`], which deletes its file when it is consumed,
//! fails, or is dropped. The session directory itself is removed when the
//! last reference goes away, which may be an abandoned prefetch thread that
//! outlives the stream.

use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tempfile::TempDir;

use crate::catalog::ShardId;
use crate::error::{Result, StreamError};

/// A private cache directory for one stream.
#[derive(Debug)]
pub struct CacheSession {
    dir: TempDir,
    next_entry: AtomicU64,
    resident: AtomicUsize,
    peak_resident: AtomicUsize,
}

impl CacheSession {
    /// Creates a fresh session directory below `cache_root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache root or session directory cannot be
    /// created.
    pub fn open(cache_root: &Path) -> Result<Arc<Self>> {
        fs::create_dir_all(cache_root).map_err(|e| {
            StreamError::cache_with_source(cache_root, "failed to create cache root", e)
        })?;

        let dir = tempfile::Builder::new()
            .prefix("session-")
            .tempdir_in(cache_root)
            .map_err(|e| {
                StreamError::cache_with_source(cache_root, "failed to create session directory", e)
            })?;

        tracing::debug!(dir = %dir.path().display(), "opened cache session");

        Ok(Arc::new(Self {
            dir,
            next_entry: AtomicU64::new(0),
            resident: AtomicUsize::new(0),
            peak_resident: AtomicUsize::new(0),
        }))
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Creates an empty file for `shard` and returns its guard together with
    /// a write handle. The file counts as resident from this point on.
    pub fn create_entry(self: &Arc<Self>, shard: &ShardId) -> Result<(LocalShard, File)> {
        let seq = self.next_entry.fetch_add(1, Ordering::Relaxed);
        let file_name = format!("{seq:06}-{}", shard.as_str().replace(['/', '\\'], "__"));
        let path = self.dir.path().join(file_name);

        let file = File::create(&path)
            .map_err(|e| StreamError::cache_with_source(&path, "failed to create cache entry", e))?;

        let now = self.resident.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_resident.fetch_max(now, Ordering::SeqCst);

        let local = LocalShard {
            shard: shard.clone(),
            path,
            session: Arc::clone(self),
            deleted: false,
        };
        Ok((local, file))
    }

    /// Shard files currently on disk.
    pub fn resident(&self) -> usize {
        self.resident.load(Ordering::SeqCst)
    }

    /// Highest number of shard files that were on disk at the same time.
    pub fn peak_resident(&self) -> usize {
        self.peak_resident.load(Ordering::SeqCst)
    }
}

/// A fetched shard on local disk.
///
/// The file is removed by [`LocalShard::delete`] or, failing that, on drop.
#[derive(Debug)]
pub struct LocalShard {
    shard: ShardId,
    path: PathBuf,
    session: Arc<CacheSession>,
    deleted: bool,
}

impl LocalShard {
    pub fn shard(&self) -> &ShardId {
        &self.shard
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Removes the local file. Safe to call any number of times; failures
    /// are logged and otherwise ignored.
    pub fn delete(&mut self) {
        if self.deleted {
            return;
        }
        self.deleted = true;
        self.session.resident.fetch_sub(1, Ordering::SeqCst);

        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::trace!(shard = %self.shard, "deleted local shard content");
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    shard = %self.shard,
                    path = %self.path.display(),
                    error = %e,
                    "failed to delete local shard content"
                );
            }
        }
    }
}

impl Drop for LocalShard {
    fn drop(&mut self) {
        self.delete();
    }
}
