// rust/stream-core/src/dataset/mod.rs

//! Resumable streaming over an ordered list of shards.
//!
//! A [`RecordStream`] lists the shards of a dataset, uses shard metadata to
//! jump to the shard holding the resume offset, and then reads shards one at
//! a time while the next one is fetched in the background. Every record
//! carries its global cursor, the 1-based position of the record in the
//! whole dataset, so a consumer can persist the last cursor it processed and
//! resume from it later.
//!
//! # Example
//!
//! ```ignore
//! use stream_core::dataset::{RecordStream, StreamOptions};
//!
//! let options = StreamOptions::new("c4-en", last_cursor).with_end_offset(last_cursor + 10_000);
//! let mut stream = RecordStream::open(
//!     &catalog, &order, source, format, session, &prefetch_config, &options,
//! );
//!
//! for (cursor, record) in stream.by_ref() {
//!     train_on(record);
//!     last_cursor = cursor;
//! }
//! ```

mod iterator;
mod jump;
mod prefetch;
mod stream;

pub use iterator::ShardRecords;
pub use jump::{find_start_shard, FastJump};
pub use prefetch::{PrefetchStats, Prefetcher};
pub use stream::{GapReason, GapSkip, RecordStream, StreamOptions, StreamState, StreamStats};
