// rust/stream-core/src/test_helpers.rs

//! Fixtures shared by the unit tests of several modules.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use parquet::data_type::Int64Type;
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::parser::parse_message_type;

use crate::cache::{CacheSession, LocalShard};
use crate::catalog::{ShardCatalog, ShardId};
use crate::error::{Result, StreamError};
use crate::source::{ShardMetadata, ShardSource};

/// Writes a single-column parquet file holding `ids`, split into row groups
/// of at most `group_size`.
pub(crate) fn write_parquet_ids(path: &Path, ids: &[i64], group_size: usize) {
    let schema = Arc::new(parse_message_type("message shard { REQUIRED INT64 id; }").unwrap());
    let props = Arc::new(WriterProperties::builder().build());
    let file = File::create(path).unwrap();
    let mut writer = SerializedFileWriter::new(file, schema, props).unwrap();

    for chunk in ids.chunks(group_size.max(1)) {
        let mut row_group = writer.next_row_group().unwrap();
        while let Some(mut col) = row_group.next_column().unwrap() {
            col.typed::<Int64Type>().write_batch(chunk, None, None).unwrap();
            col.close().unwrap();
        }
        row_group.close().unwrap();
    }
    writer.close().unwrap();
}

pub(crate) fn shard_id(index: usize) -> ShardId {
    ShardId::from(format!("{index:04}.jsonl"))
}

/// Catalog returning a fixed listing.
pub(crate) struct FixedCatalog(pub(crate) Vec<ShardId>);

impl ShardCatalog for FixedCatalog {
    fn list_shards(&self, _dataset: &str) -> Result<Vec<ShardId>> {
        Ok(self.0.clone())
    }
}

/// Catalog whose listing always fails.
pub(crate) struct FailingCatalog;

impl ShardCatalog for FailingCatalog {
    fn list_shards(&self, dataset: &str) -> Result<Vec<ShardId>> {
        Err(StreamError::listing(dataset, "listing service unavailable"))
    }
}

#[derive(Default)]
struct Script {
    lines: Vec<String>,
    row_count: u64,
    delay: Duration,
    failing_fetches: u32,
    metadata_fails: bool,
}

/// In-memory JSON-lines dataset with scriptable failures and latency.
///
/// Shard `i` is named `{i:04}.jsonl`. Record `n` of the dataset (1-based,
/// counted across shards) is `{"g": n}`, so a correct stream yields
/// records whose `g` equals their global cursor.
pub(crate) struct MemorySource {
    shards: Mutex<HashMap<ShardId, Script>>,
    order: Vec<ShardId>,
    fetches: Mutex<Vec<ShardId>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MemorySource {
    pub(crate) fn new(sizes: &[usize]) -> Self {
        let mut shards = HashMap::new();
        let mut order = Vec::new();
        let mut global = 0u64;

        for (index, &size) in sizes.iter().enumerate() {
            let lines = (0..size)
                .map(|_| {
                    global += 1;
                    format!("{{\"g\":{global}}}")
                })
                .collect();
            let id = shard_id(index);
            order.push(id.clone());
            shards.insert(
                id,
                Script {
                    lines,
                    row_count: size as u64,
                    ..Default::default()
                },
            );
        }

        Self {
            shards: Mutex::new(shards),
            order,
            fetches: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    fn script(self, index: usize, f: impl FnOnce(&mut Script)) -> Self {
        if let Some(script) = self.shards.lock().unwrap().get_mut(&shard_id(index)) {
            f(script);
        }
        self
    }

    /// The first `times` content fetches of shard `index` fail.
    pub(crate) fn fail_fetches(self, index: usize, times: u32) -> Self {
        self.script(index, |s| s.failing_fetches = times)
    }

    pub(crate) fn fail_metadata(self, index: usize) -> Self {
        self.script(index, |s| s.metadata_fails = true)
    }

    /// Shard `index` decodes `good` records, then hits an undecodable line.
    pub(crate) fn corrupt_after(self, index: usize, good: usize) -> Self {
        self.script(index, |s| {
            s.lines.truncate(good);
            s.lines.push("not json".to_string());
        })
    }

    /// Every content fetch of shard `index` takes at least `delay`.
    pub(crate) fn delay(self, index: usize, delay: Duration) -> Self {
        self.script(index, |s| s.delay = delay)
    }

    pub(crate) fn delay_all(self, delay: Duration) -> Self {
        for script in self.shards.lock().unwrap().values_mut() {
            script.delay = delay;
        }
        self
    }

    pub(crate) fn shard_ids(&self) -> Vec<ShardId> {
        self.order.clone()
    }

    pub(crate) fn catalog(&self) -> FixedCatalog {
        FixedCatalog(self.order.clone())
    }

    pub(crate) fn total_rows(&self) -> u64 {
        self.shards.lock().unwrap().values().map(|s| s.row_count).sum()
    }

    pub(crate) fn fetch_count(&self, index: usize) -> usize {
        let id = shard_id(index);
        self.fetches.lock().unwrap().iter().filter(|f| **f == id).count()
    }

    pub(crate) fn total_fetches(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }

    /// Highest number of content fetches that ran at the same time.
    pub(crate) fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

impl ShardSource for MemorySource {
    fn fetch_metadata(&self, _dataset: &str, shard: &ShardId) -> Result<ShardMetadata> {
        let shards = self.shards.lock().unwrap();
        match shards.get(shard) {
            Some(script) if !script.metadata_fails => Ok(ShardMetadata {
                row_count: script.row_count,
            }),
            _ => Err(StreamError::metadata(shard.as_str(), "footer unreadable")),
        }
    }

    fn fetch_content(
        &self,
        _dataset: &str,
        shard: &ShardId,
        session: &Arc<CacheSession>,
    ) -> Result<LocalShard> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        self.fetches.lock().unwrap().push(shard.clone());

        let (delay, outcome) = {
            let mut shards = self.shards.lock().unwrap();
            match shards.get_mut(shard) {
                Some(script) if script.failing_fetches > 0 => {
                    script.failing_fetches -= 1;
                    (script.delay, Err(StreamError::fetch(shard.as_str(), "connection reset")))
                }
                Some(script) => (script.delay, Ok(script.lines.join("\n"))),
                None => (Duration::ZERO, Err(StreamError::fetch(shard.as_str(), "no such shard"))),
            }
        };
        thread::sleep(delay);

        let result = outcome.and_then(|body| {
            let (local, mut file) = session.create_entry(shard)?;
            file.write_all(body.as_bytes())
                .map_err(|e| StreamError::fetch_with_source(shard.as_str(), "write failed", e))?;
            Ok(local)
        });

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
