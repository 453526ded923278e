// rust/stream-core/src/dataset/stream.rs

//! The ordered record stream.
//!
//! ```text
//! Listing -> [Jumping] -> Streaming(i) -> Streaming(i + 1) -> ... -> Done
//! ```
//!
//! Opening resolves the catalog once and, for a non-zero start offset, runs
//! the metadata fast-jump. Shards are then pulled one at a time through the
//! [`Prefetcher`] as the caller iterates. A shard that cannot be fetched or
//! decoded is skipped and reported as a [`GapSkip`]; its records are never
//! invented, so the cursor only counts what was actually read.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::CacheSession;
use crate::catalog::{resolve_catalog, ShardCatalog, ShardId, ShardOrder};
use crate::config::PrefetchConfig;
use crate::error::{ErrorKind, StreamError};
use crate::format::RecordFormat;
use crate::source::ShardSource;

use super::iterator::ShardRecords;
use super::jump::{find_start_shard, FastJump};
use super::prefetch::Prefetcher;

/// Lifecycle of a [`RecordStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Listing,
    Jumping,
    /// Reading (or about to read) the shard at this catalog index.
    Streaming { shard_index: usize },
    Done,
}

/// Why a shard contributed no (or only some) records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapReason {
    /// Every fetch attempt failed.
    FetchFailed,
    /// The shard was fetched but could not be decoded past
    /// `records_observed` records.
    FormatFailed { records_observed: u64 },
}

/// A shard skipped in whole or in part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapSkip {
    pub shard_index: usize,
    pub shard: ShardId,
    pub reason: GapReason,
    pub error_kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for GapSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            GapReason::FetchFailed => {
                write!(f, "shard #{} ({}) not fetched: {}", self.shard_index, self.shard, self.message)
            }
            GapReason::FormatFailed { records_observed } => write!(
                f,
                "shard #{} ({}) unreadable after {} records: {}",
                self.shard_index, self.shard, records_observed, self.message
            ),
        }
    }
}

/// Counters for one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub shards_total: usize,
    pub shards_completed: usize,
    pub shards_skipped: usize,
    pub records_yielded: u64,
    /// Records read but not yielded because they lie at or before the
    /// start offset.
    pub records_suppressed: u64,
    pub prefetch_hits: u64,
    pub prefetch_misses: u64,
    pub fetch_retries: u64,
    pub prefetch_wait: Duration,
    /// Most shard files resident in the cache at once.
    pub peak_resident_shards: usize,
}

/// Parameters of one stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamOptions {
    pub dataset: String,
    /// Records with a global cursor at or below this are not yielded.
    pub start_offset: u64,
    /// Last global cursor to yield.
    pub end_offset: Option<u64>,
}

impl StreamOptions {
    pub fn new(dataset: impl Into<String>, start_offset: u64) -> Self {
        Self {
            dataset: dataset.into(),
            start_offset,
            end_offset: None,
        }
    }

    #[must_use]
    pub fn with_end_offset(mut self, end_offset: u64) -> Self {
        self.end_offset = Some(end_offset);
        self
    }
}

/// Ordered stream of `(global_cursor, record)` pairs over a whole dataset.
///
/// The stream is pull-driven: nothing is fetched until the first call to
/// `next`. Dropping it early is cheap; an in-flight prefetch is abandoned
/// and cleans up after itself.
pub struct RecordStream<R> {
    dataset: Arc<str>,
    shards: Arc<[ShardId]>,
    format: Arc<dyn RecordFormat<Record = R>>,
    session: Arc<CacheSession>,
    prefetcher: Prefetcher,
    state: StreamState,
    next_shard: usize,
    current: Option<ShardRecords<R>>,
    cursor: u64,
    skip_to: u64,
    end_offset: Option<u64>,
    jump: Option<FastJump>,
    gap_skips: Vec<GapSkip>,
    stats: StreamStats,
}

impl<R> RecordStream<R> {
    /// Resolves the catalog and locates the starting shard.
    ///
    /// An unlistable or empty dataset gives a stream that is already
    /// [`StreamState::Done`].
    pub(crate) fn open(
        catalog: &dyn ShardCatalog,
        order: &ShardOrder,
        source: Arc<dyn ShardSource>,
        format: Arc<dyn RecordFormat<Record = R>>,
        session: Arc<CacheSession>,
        prefetch: &PrefetchConfig,
        options: &StreamOptions,
    ) -> Self {
        let dataset: Arc<str> = Arc::from(options.dataset.as_str());
        let skip_to = options.start_offset;

        let mut state = StreamState::Listing;
        let shards: Arc<[ShardId]> = resolve_catalog(catalog, &dataset, order).into();

        let mut jump = None;
        let start = if shards.is_empty() {
            tracing::info!(dataset = %dataset, "empty shard catalog");
            state = StreamState::Done;
            FastJump::RESTART
        } else if skip_to > 0 {
            state = StreamState::Jumping;
            let found = find_start_shard(source.as_ref(), &dataset, &shards, skip_to);
            jump = Some(found);
            found
        } else {
            FastJump::RESTART
        };

        if state != StreamState::Done {
            state = StreamState::Streaming {
                shard_index: start.start_shard_index,
            };
        }

        let prefetcher = Prefetcher::new(
            source,
            Arc::clone(&dataset),
            Arc::clone(&shards),
            Arc::clone(&session),
            prefetch,
        );

        let stats = StreamStats {
            shards_total: shards.len(),
            ..Default::default()
        };

        Self {
            dataset,
            shards,
            format,
            session,
            prefetcher,
            state,
            next_shard: start.start_shard_index,
            current: None,
            cursor: start.rows_before_start_shard,
            skip_to,
            end_offset: options.end_offset,
            jump,
            gap_skips: Vec::new(),
            stats,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Global cursor of the last record read, yielded or suppressed.
    pub fn cursor(&self) -> u64 {
        self.current.as_ref().map_or(self.cursor, ShardRecords::cursor)
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn shards(&self) -> &[ShardId] {
        &self.shards
    }

    /// Result of the fast-jump, if one ran.
    pub fn fast_jump(&self) -> Option<FastJump> {
        self.jump
    }

    /// Shards skipped so far. Callers that need completeness must check
    /// this once the stream is exhausted.
    pub fn gap_skips(&self) -> &[GapSkip] {
        &self.gap_skips
    }

    pub fn stats(&self) -> StreamStats {
        let prefetch = self.prefetcher.stats();
        let mut stats = self.stats;
        if let Some(current) = &self.current {
            stats.records_suppressed += current.suppressed();
        }
        stats.prefetch_hits = prefetch.hits;
        stats.prefetch_misses = prefetch.misses;
        stats.fetch_retries = prefetch.retries;
        stats.prefetch_wait = prefetch.wait_time;
        stats.peak_resident_shards = self.session.peak_resident();
        stats
    }

    fn finish(&mut self) {
        if self.state == StreamState::Done {
            return;
        }
        if let Some(current) = self.current.take() {
            self.cursor = current.cursor();
            self.stats.records_suppressed += current.suppressed();
        }
        self.prefetcher.cancel();
        self.state = StreamState::Done;

        tracing::info!(
            dataset = %self.dataset,
            cursor = self.cursor,
            yielded = self.stats.records_yielded,
            skipped_shards = self.stats.shards_skipped,
            "stream finished"
        );
    }

    fn record_gap(&mut self, shard_index: usize, reason: GapReason, error: &StreamError) {
        let gap = GapSkip {
            shard_index,
            shard: self.shards[shard_index].clone(),
            reason,
            error_kind: error.kind(),
            message: error.to_string(),
        };
        tracing::warn!(gap = %gap, "skipping shard");
        self.stats.shards_skipped += 1;
        self.gap_skips.push(gap);
    }

    fn reached_end(&self) -> bool {
        self.end_offset.is_some_and(|end| self.cursor >= end)
    }

    /// Moves on to the next shard. Returns `false` once there is none.
    fn advance(&mut self) -> bool {
        let index = self.next_shard;
        if index >= self.shards.len() {
            return false;
        }
        self.next_shard += 1;
        self.state = StreamState::Streaming { shard_index: index };

        let local = match self.prefetcher.obtain(index) {
            Ok(local) => local,
            Err(e) => {
                self.record_gap(index, GapReason::FetchFailed, &e);
                return true;
            }
        };

        match ShardRecords::open(local, self.format.as_ref(), self.cursor, self.skip_to) {
            Ok(records) => {
                tracing::debug!(shard = %self.shards[index], index, cursor = self.cursor, "streaming shard");
                self.current = Some(records);
            }
            Err(e) => {
                self.record_gap(index, GapReason::FormatFailed { records_observed: 0 }, &e);
            }
        }
        true
    }
}

impl<R> Iterator for RecordStream<R> {
    type Item = (u64, R);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.state == StreamState::Done {
                return None;
            }
            if self.reached_end() {
                self.finish();
                return None;
            }

            let Some(current) = self.current.as_mut() else {
                if !self.advance() {
                    self.finish();
                }
                continue;
            };

            let step = current.next();
            let cursor = current.cursor();
            let observed = current.observed();
            let suppressed = current.suppressed();
            self.cursor = cursor;

            match step {
                Some(Ok(item)) => {
                    debug_assert!(self.end_offset.map_or(true, |end| item.0 <= end));
                    self.stats.records_yielded += 1;
                    return Some(item);
                }
                Some(Err(e)) => {
                    let index = self.next_shard - 1;
                    self.current = None;
                    self.stats.records_suppressed += suppressed;
                    self.record_gap(index, GapReason::FormatFailed { records_observed: observed }, &e);
                }
                None => {
                    self.current = None;
                    self.stats.records_suppressed += suppressed;
                    self.stats.shards_completed += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use serde_json::Value;

    use crate::format::JsonLinesFormat;
    use crate::test_helpers::{FailingCatalog, MemorySource};

    fn open_stream(
        source: &Arc<MemorySource>,
        options: &StreamOptions,
        cache_root: &std::path::Path,
    ) -> RecordStream<Value> {
        let session = CacheSession::open(cache_root).unwrap();
        RecordStream::open(
            &source.catalog(),
            &ShardOrder::Lexicographic,
            Arc::clone(source) as Arc<dyn ShardSource>,
            Arc::new(JsonLinesFormat::new()),
            session,
            &PrefetchConfig::default(),
            options,
        )
    }

    fn collect(stream: RecordStream<Value>) -> Vec<(u64, u64)> {
        stream
            .map(|(cursor, record)| (cursor, record["g"].as_u64().unwrap()))
            .collect()
    }

    #[test]
    fn test_resume_mid_shard() {
        let root = tempfile::tempdir().unwrap();
        let source = Arc::new(MemorySource::new(&[10, 10, 10]));
        let stream = open_stream(&source, &StreamOptions::new("ds", 15), root.path());

        assert_eq!(
            stream.fast_jump(),
            Some(FastJump {
                start_shard_index: 1,
                rows_before_start_shard: 10
            })
        );
        assert_eq!(stream.state(), StreamState::Streaming { shard_index: 1 });

        let records = collect(stream);
        assert_eq!(records.len(), 15);
        for (cursor, g) in &records {
            assert_eq!(cursor, g);
        }
        assert_eq!(records.first().unwrap().0, 16);
        assert_eq!(records.last().unwrap().0, 30);

        // Shard 0 was never downloaded.
        assert_eq!(source.fetch_count(0), 0);
    }

    #[test]
    fn test_every_start_offset_is_ordered_and_gap_free() {
        let root = tempfile::tempdir().unwrap();
        let source = Arc::new(MemorySource::new(&[3, 1, 4, 1, 5]));
        let total = source.total_rows();

        for start in 0..=total {
            let stream = open_stream(&source, &StreamOptions::new("ds", start), root.path());
            let cursors: Vec<u64> = collect(stream).into_iter().map(|(c, _)| c).collect();
            let expected: Vec<u64> = (start + 1..=total).collect();
            assert_eq!(cursors, expected, "start offset {start}");
        }
    }

    #[test]
    fn test_no_offset_skips_jump() {
        let root = tempfile::tempdir().unwrap();
        let source = Arc::new(MemorySource::new(&[2, 2]));
        let stream = open_stream(&source, &StreamOptions::new("ds", 0), root.path());

        assert_eq!(stream.fast_jump(), None);
        assert_eq!(collect(stream).len(), 4);
    }

    #[test]
    fn test_empty_catalog_is_done() {
        let root = tempfile::tempdir().unwrap();
        let source = Arc::new(MemorySource::new(&[]));
        let mut stream = open_stream(&source, &StreamOptions::new("ds", 5), root.path());

        assert_eq!(stream.state(), StreamState::Done);
        assert!(stream.next().is_none());
        assert_eq!(source.total_fetches(), 0);
    }

    #[test]
    fn test_listing_failure_is_empty_stream() {
        let root = tempfile::tempdir().unwrap();
        let source = Arc::new(MemorySource::new(&[2]));
        let session = CacheSession::open(root.path()).unwrap();
        let mut stream: RecordStream<Value> = RecordStream::open(
            &FailingCatalog,
            &ShardOrder::Lexicographic,
            source,
            Arc::new(JsonLinesFormat::new()),
            session,
            &PrefetchConfig::default(),
            &StreamOptions::new("ds", 0),
        );

        assert_eq!(stream.state(), StreamState::Done);
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_fetch_failure_is_retried_once() {
        let root = tempfile::tempdir().unwrap();
        let source = Arc::new(MemorySource::new(&[2, 2, 2]).fail_fetches(1, 1));
        let stream = open_stream(&source, &StreamOptions::new("ds", 0), root.path());

        let records = collect(stream);
        assert_eq!(records.len(), 6);
        assert_eq!(source.fetch_count(1), 2);
    }

    #[test]
    fn test_unfetchable_shard_is_skipped_without_fabrication() {
        let root = tempfile::tempdir().unwrap();
        let source = Arc::new(MemorySource::new(&[2, 2, 2]).fail_fetches(1, 10));
        let mut stream = open_stream(&source, &StreamOptions::new("ds", 0), root.path());

        let cursors: Vec<u64> = stream.by_ref().map(|(c, _)| c).collect();
        // Shard 1 is missing and the cursor does not account for it.
        assert_eq!(cursors, vec![1, 2, 3, 4]);

        let gaps = stream.gap_skips();
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].shard_index, 1);
        assert_eq!(gaps[0].reason, GapReason::FetchFailed);
        assert_eq!(gaps[0].error_kind, ErrorKind::Fetch);
        assert_eq!(stream.stats().shards_skipped, 1);
        assert_eq!(stream.stats().shards_completed, 2);
    }

    #[test]
    fn test_corrupt_shard_is_skipped_after_partial_read() {
        let root = tempfile::tempdir().unwrap();
        let source = Arc::new(MemorySource::new(&[3, 3, 3]).corrupt_after(1, 1));
        let mut stream = open_stream(&source, &StreamOptions::new("ds", 0), root.path());

        let cursors: Vec<u64> = stream.by_ref().map(|(c, _)| c).collect();
        assert_eq!(cursors, vec![1, 2, 3, 4, 5, 6, 7]);

        let gaps = stream.gap_skips();
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].reason, GapReason::FormatFailed { records_observed: 1 });
        assert!(stream.stats().peak_resident_shards <= 2);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_end_offset_stops_early() {
        let root = tempfile::tempdir().unwrap();
        let source = Arc::new(MemorySource::new(&[5, 5, 5]));
        let options = StreamOptions::new("ds", 2).with_end_offset(7);
        let mut stream = open_stream(&source, &options, root.path());

        let cursors: Vec<u64> = stream.by_ref().map(|(c, _)| c).collect();
        assert_eq!(cursors, vec![3, 4, 5, 6, 7]);
        assert_eq!(stream.state(), StreamState::Done);
        assert_eq!(stream.stats().records_suppressed, 2);
    }

    #[test]
    fn test_end_offset_inside_first_shard_counts_suppressed() {
        let root = tempfile::tempdir().unwrap();
        let source = Arc::new(MemorySource::new(&[5]));
        let options = StreamOptions::new("ds", 2).with_end_offset(4);
        let mut stream = open_stream(&source, &options, root.path());

        let cursors: Vec<u64> = stream.by_ref().map(|(c, _)| c).collect();
        assert_eq!(cursors, vec![3, 4]);
        assert_eq!(stream.cursor(), 4);
        assert_eq!(stream.stats().records_suppressed, 2);
        assert_eq!(stream.stats().records_yielded, 2);
    }

    #[test]
    fn test_unreadable_metadata_shifts_resume_baseline() {
        let root = tempfile::tempdir().unwrap();
        let source = Arc::new(MemorySource::new(&[5, 5, 5]).fail_metadata(0));
        let stream = open_stream(&source, &StreamOptions::new("ds", 7), root.path());

        // Shard 0 contributes no rows to the jump, so shard 2 starts at 5.
        assert_eq!(
            stream.fast_jump(),
            Some(FastJump {
                start_shard_index: 2,
                rows_before_start_shard: 5
            })
        );
        assert_eq!(stream.cursor(), 5);

        let records = collect(stream);
        assert_eq!(records, vec![(8, 13), (9, 14), (10, 15)]);
        assert_eq!(source.fetch_count(0), 0);
        assert_eq!(source.fetch_count(1), 0);
    }

    #[test]
    fn test_at_most_two_shards_resident() {
        let root = tempfile::tempdir().unwrap();
        let source = Arc::new(MemorySource::new(&[2; 8]).delay_all(Duration::from_millis(5)));
        let mut stream = open_stream(&source, &StreamOptions::new("ds", 0), root.path());

        let mut yielded = 0;
        while stream.next().is_some() {
            yielded += 1;
            assert!(stream.session.resident() <= 2);
        }
        assert_eq!(yielded, 16);
        assert!(stream.stats().peak_resident_shards <= 2);
        assert!(source.peak_in_flight() <= 1);
        assert_eq!(stream.session.resident(), 0);
    }

    #[test]
    fn test_prefetch_overlaps_consumption() {
        let fetch = Duration::from_millis(60);
        let consume = Duration::from_millis(60);
        let shards = 5;

        let root = tempfile::tempdir().unwrap();
        let source = Arc::new(MemorySource::new(&[1; 5]).delay_all(fetch));
        let stream = open_stream(&source, &StreamOptions::new("ds", 0), root.path());

        let started = Instant::now();
        for _ in stream {
            std::thread::sleep(consume);
        }
        let elapsed = started.elapsed();

        // Serial would be shards * (fetch + consume) = 600ms; overlapped is
        // about fetch + shards * consume = 360ms.
        let serial = (fetch + consume) * shards;
        assert!(elapsed < serial - Duration::from_millis(120), "elapsed {elapsed:?}");
    }

    #[test]
    fn test_dropping_stream_leaves_nothing_behind() {
        let root = tempfile::tempdir().unwrap();
        let source = Arc::new(MemorySource::new(&[3, 3, 3]).delay(1, Duration::from_millis(50)));
        let mut stream = open_stream(&source, &StreamOptions::new("ds", 0), root.path());

        assert!(stream.next().is_some());
        drop(stream);

        let deadline = Instant::now() + Duration::from_secs(5);
        while std::fs::read_dir(root.path()).unwrap().count() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_stats() {
        let root = tempfile::tempdir().unwrap();
        let source = Arc::new(MemorySource::new(&[4, 4, 4]));
        let mut stream = open_stream(&source, &StreamOptions::new("ds", 6), root.path());

        assert_eq!(stream.by_ref().count(), 6);
        let stats = stream.stats();
        assert_eq!(stats.shards_total, 3);
        assert_eq!(stats.shards_completed, 2);
        assert_eq!(stats.records_yielded, 6);
        assert_eq!(stats.records_suppressed, 2);
        assert_eq!(stats.prefetch_misses, 1);
        assert_eq!(stats.prefetch_hits, 1);
        assert_eq!(stream.cursor(), 12);
    }
}
