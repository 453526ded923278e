// rust/stream-core/src/storage/traits.rs

//! Storage abstraction traits for the remote side of the stream.
//!
//! Shard files live behind a `StorageBackend`. The stream only ever reads
//! from it: listing a dataset, range-reading shard footers, and copying
//! whole shards into the local cache.

use std::io::{Read, Seek};
use std::path::Path;

use crate::error::Result;

/// A handle for reading from storage.
///
/// This trait extends `Read` and `Seek` with additional methods for
/// efficient random access.
pub trait StorageReader: Read + Seek + Send {
    /// Returns the total size of the object in bytes.
    fn size(&self) -> u64;

    /// Reads a range of bytes from the object.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the range is out of bounds.
    fn read_range(&mut self, start: u64, length: usize) -> Result<Vec<u8>>;
}

/// Read-only storage backend holding shard files.
///
/// # Object Safety
///
/// This trait is object-safe and can be used with `Arc<dyn StorageBackend>`.
pub trait StorageBackend: Send + Sync {
    /// Opens an object for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the object doesn't exist or cannot be opened.
    fn open_read(&self, path: &Path) -> Result<Box<dyn StorageReader>>;

    /// Lists every object below `prefix`, recursively.
    ///
    /// Returned names are relative to `prefix` and use `/` as separator.
    /// An absent prefix lists as empty.
    fn list(&self, prefix: &Path) -> Result<Vec<String>>;

    /// Short name of the backend, for logs.
    fn backend_type(&self) -> &'static str;
}
