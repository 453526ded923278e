// rust/stream-core/src/lib.rs

//! Shard Stream - Core Library
//!
//! This crate streams the records of a dataset stored as an ordered set of
//! shard files. Streams resume from a global record offset without reading
//! the shards before it, overlap fetching the next shard with reading the
//! current one, and keep at most two shards on local disk.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod format;
pub mod source;
pub mod storage;

// Re-export commonly used types for convenience
pub use cache::{CacheSession, LocalShard};
pub use catalog::{resolve_catalog, ShardCatalog, ShardId, ShardOrder, StorageCatalog};
pub use config::StreamerConfig;
pub use error::{ErrorKind, Result, StreamError};
pub use format::{JsonLinesFormat, ParquetFormat, RecordFormat};
pub use source::{ShardMetadata, ShardSource, StorageShardSource};
pub use storage::{LocalStorage, StorageBackend, StorageReader};

pub mod dataset;
pub use dataset::{FastJump, GapReason, GapSkip, RecordStream, StreamOptions, StreamState, StreamStats};

pub mod runtime;
pub use runtime::Streamer;

#[cfg(test)]
pub(crate) mod test_helpers;
