// rust/stream-core/src/format/jsonl.rs

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde_json::Value;

use super::{RecordFormat, RecordIter};
use crate::error::{Result, StreamError};
use crate::storage::StorageReader;

/// Newline-delimited JSON shards, one object per line.
///
/// JSON lines carry no footer, so the row count needs a full pass over the
/// remote object. Blank lines are not records.
#[derive(Debug, Clone, Default)]
pub struct JsonLinesFormat;

impl JsonLinesFormat {
    pub fn new() -> Self {
        Self
    }
}

impl RecordFormat for JsonLinesFormat {
    type Record = Value;

    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn row_count(&self, reader: &mut dyn StorageReader) -> Result<u64> {
        let mut count = 0u64;
        let mut buffered = BufReader::new(reader);
        let mut line = Vec::new();

        loop {
            line.clear();
            let n = buffered
                .read_until(b'\n', &mut line)
                .map_err(|e| StreamError::format_with_source("<remote>", "failed to scan lines", e))?;
            if n == 0 {
                break;
            }
            if line.iter().any(|b| !b.is_ascii_whitespace()) {
                count += 1;
            }
        }
        Ok(count)
    }

    fn row_count_reads_body(&self) -> bool {
        true
    }

    fn open(&self, path: &Path) -> Result<RecordIter<Value>> {
        let file = File::open(path)
            .map_err(|e| StreamError::format_with_source(path, "failed to open shard", e))?;
        let owned = path.to_path_buf();

        let records = BufReader::new(file)
            .lines()
            .filter(|line| !matches!(line, Ok(l) if l.trim().is_empty()))
            .map(move |line| {
                let line = line
                    .map_err(|e| StreamError::format_with_source(&owned, "failed to read line", e))?;
                serde_json::from_str::<Value>(&line)
                    .map_err(|e| StreamError::format_with_source(&owned, "invalid JSON record", e))
            });
        Ok(Box::new(records))
    }
}
