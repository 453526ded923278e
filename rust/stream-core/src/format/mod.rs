// rust/stream-core/src/format/mod.rs

//! Record formats for shard files.
//!
//! A format answers two questions about a shard: how many records it holds
//! (answered from remote storage, ideally without reading the body) and
//! what those records are once the shard sits on local disk. The stream
//! never inspects a record; it only counts and forwards them.

mod jsonl;
mod parquet;

pub use self::jsonl::JsonLinesFormat;
pub use self::parquet::ParquetFormat;

use std::path::Path;

use crate::error::Result;
use crate::storage::StorageReader;

/// Lazy, finite sequence of decoded records in file order.
pub type RecordIter<R> = Box<dyn Iterator<Item = Result<R>>>;

/// Describes how to count and decode the records of a shard.
pub trait RecordFormat: Send + Sync {
    /// Decoded record type.
    type Record;

    /// Name of this record format
    fn name(&self) -> &'static str;

    /// Number of records in the shard behind `reader`.
    ///
    /// Formats with structural metadata answer from it and leave the body
    /// unread. Formats without it scan the whole object and must say so
    /// through [`RecordFormat::row_count_reads_body`].
    ///
    /// # Errors
    ///
    /// Returns an error if the shard's structural metadata cannot be read.
    fn row_count(&self, reader: &mut dyn StorageReader) -> Result<u64>;

    /// Whether [`RecordFormat::row_count`] reads the shard body.
    fn row_count_reads_body(&self) -> bool {
        false
    }

    /// Opens a local shard file for sequential decoding.
    ///
    /// # Errors
    ///
    /// Returns a format error if the file is not a valid shard.
    fn open(&self, path: &Path) -> Result<RecordIter<Self::Record>>;
}
