// rust/stream-core/src/storage/mod.rs

//! Remote storage abstraction.
//!
//! Shard files are read through a `StorageBackend`, so the same stream can
//! run against a local directory tree or an S3-compatible bucket. Backends
//! are read-only from the stream's point of view; local scratch copies of
//! shards are managed separately by [`crate::cache`].
//!
//! # Example
//!
//! ```no_run
//! use stream_core::config::StorageConfig;
//! use stream_core::storage::{LocalStorage, StorageBackend};
//! use std::path::Path;
//!
//! let config = StorageConfig::default();
//! let storage = LocalStorage::new(&config).unwrap();
//! let shards = storage.list(Path::new("wikipedia-embeddings")).unwrap();
//! ```

mod local;
mod traits;

pub use local::LocalStorage;
pub use traits::{StorageBackend, StorageReader};

// S3 storage (requires feature flag)
#[cfg(feature = "s3")]
mod retry;
#[cfg(feature = "s3")]
mod s3;

#[cfg(feature = "s3")]
pub use retry::RetryConfig;
#[cfg(feature = "s3")]
pub use s3::S3Storage;
