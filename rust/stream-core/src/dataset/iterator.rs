// rust/stream-core/src/dataset/iterator.rs

use crate::cache::LocalShard;
use crate::error::Result;
use crate::format::{RecordFormat, RecordIter};

/// Records of one fetched shard, numbered with the global cursor.
///
/// Every decoded record advances the cursor by one. Records whose cursor is
/// at or below `skip_to` were already consumed before a resume and are
/// counted but not yielded. The local file is deleted as soon as the shard
/// is exhausted or fails to decode, and on drop otherwise.
pub struct ShardRecords<R> {
    local: LocalShard,
    records: Option<RecordIter<R>>,
    cursor: u64,
    skip_to: u64,
    observed: u64,
    suppressed: u64,
}

impl<R> ShardRecords<R> {
    /// Opens `local` for decoding. `cursor` is the number of records that
    /// precede this shard in the dataset.
    ///
    /// # Errors
    ///
    /// Returns a format error if the shard cannot be opened; the local file
    /// is deleted before returning.
    pub fn open(
        mut local: LocalShard,
        format: &dyn RecordFormat<Record = R>,
        cursor: u64,
        skip_to: u64,
    ) -> Result<Self> {
        let records = match format.open(local.path()) {
            Ok(records) => records,
            Err(e) => {
                local.delete();
                return Err(e);
            }
        };

        Ok(Self {
            local,
            records: Some(records),
            cursor,
            skip_to,
            observed: 0,
            suppressed: 0,
        })
    }

    /// Global cursor of the last record observed.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Records decoded from this shard so far, yielded or not.
    pub fn observed(&self) -> u64 {
        self.observed
    }

    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    pub fn local(&self) -> &LocalShard {
        &self.local
    }

    fn finish(&mut self) {
        self.records = None;
        self.local.delete();
    }
}

impl<R> Iterator for ShardRecords<R> {
    type Item = Result<(u64, R)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let records = self.records.as_mut()?;
            match records.next() {
                Some(Ok(record)) => {
                    self.cursor += 1;
                    self.observed += 1;
                    if self.cursor <= self.skip_to {
                        self.suppressed += 1;
                        continue;
                    }
                    return Some(Ok((self.cursor, record)));
                }
                Some(Err(e)) => {
                    self.finish();
                    return Some(Err(e));
                }
                None => {
                    self.finish();
                    return None;
                }
            }
        }
    }
}
