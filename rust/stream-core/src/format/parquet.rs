// rust/stream-core/src/format/parquet.rs

//! Parquet shards.
//!
//! The row count comes from the file footer alone: two range reads (the
//! 8-byte tail, then the Thrift-encoded metadata before it), so a fast-jump
//! scan over thousands of remote shards never touches their bodies.

use std::fs::File;
use std::path::Path;

use parquet::file::metadata::ParquetMetaDataReader;
use parquet::file::serialized_reader::SerializedFileReader;
use parquet::record::reader::RowIter;
use parquet::record::Row;

use super::{RecordFormat, RecordIter};
use crate::error::{Result, StreamError};
use crate::storage::StorageReader;

/// Parquet magic bytes (footer ends with "PAR1").
const PARQUET_MAGIC: [u8; 4] = *b"PAR1";

/// Metadata length (u32 LE) followed by the magic.
const FOOTER_TAIL_LEN: u64 = 8;

/// Records are decoded row by row into [`parquet::record::Row`].
#[derive(Debug, Clone, Default)]
pub struct ParquetFormat;

impl ParquetFormat {
    pub fn new() -> Self {
        Self
    }
}

impl RecordFormat for ParquetFormat {
    type Record = Row;

    fn name(&self) -> &'static str {
        "parquet"
    }

    fn row_count(&self, reader: &mut dyn StorageReader) -> Result<u64> {
        let file_size = reader.size();
        if file_size < FOOTER_TAIL_LEN + PARQUET_MAGIC.len() as u64 {
            return Err(StreamError::format(
                "<remote>",
                format!("file of {file_size} bytes is too small to be parquet"),
            ));
        }

        let tail = reader.read_range(file_size - FOOTER_TAIL_LEN, FOOTER_TAIL_LEN as usize)?;
        if tail.len() != FOOTER_TAIL_LEN as usize || tail[4..8] != PARQUET_MAGIC {
            return Err(StreamError::format("<remote>", "missing parquet magic bytes"));
        }

        let metadata_len = u64::from(u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]));
        if metadata_len + FOOTER_TAIL_LEN > file_size {
            return Err(StreamError::format(
                "<remote>",
                format!("footer length {metadata_len} exceeds file size {file_size}"),
            ));
        }

        let metadata_bytes = reader.read_range(
            file_size - FOOTER_TAIL_LEN - metadata_len,
            metadata_len as usize,
        )?;
        let metadata = ParquetMetaDataReader::decode_metadata(&metadata_bytes).map_err(|e| {
            StreamError::format_with_source("<remote>", "failed to decode parquet footer", e)
        })?;

        let rows = metadata.file_metadata().num_rows();
        u64::try_from(rows).map_err(|_| {
            StreamError::format("<remote>", format!("negative row count {rows} in footer"))
        })
    }

    fn open(&self, path: &Path) -> Result<RecordIter<Row>> {
        let file = File::open(path)
            .map_err(|e| StreamError::format_with_source(path, "failed to open shard", e))?;
        let reader = SerializedFileReader::new(file)
            .map_err(|e| StreamError::format_with_source(path, "failed to read parquet file", e))?;

        let owned = path.to_path_buf();
        let rows = RowIter::from_file_into(Box::new(reader)).map(move |row| {
            row.map_err(|e| StreamError::format_with_source(&owned, "failed to decode row", e))
        });
        Ok(Box::new(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parquet::record::RowAccessor;

    use crate::config::StorageConfig;
    use crate::storage::{LocalStorage, StorageBackend};
    use crate::test_helpers::write_parquet_ids as write_ids;

    fn storage_for(dir: &Path) -> LocalStorage {
        let config = StorageConfig {
            base_path: dir.to_path_buf(),
            ..Default::default()
        };
        LocalStorage::new(&config).unwrap()
    }

    #[test]
    fn test_row_count_from_footer() {
        let temp = tempfile::tempdir().unwrap();
        let ids: Vec<i64> = (0..250).collect();
        write_ids(&temp.path().join("a.parquet"), &ids, 100);

        let storage = storage_for(temp.path());
        let mut reader = storage.open_read(Path::new("a.parquet")).unwrap();
        assert_eq!(ParquetFormat::new().row_count(&mut *reader).unwrap(), 250);
    }

    #[test]
    fn test_row_count_rejects_non_parquet() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("bad.parquet"), b"definitely not a parquet file").unwrap();

        let storage = storage_for(temp.path());
        let mut reader = storage.open_read(Path::new("bad.parquet")).unwrap();
        assert!(ParquetFormat::new().row_count(&mut *reader).is_err());
    }

    #[test]
    fn test_row_count_rejects_tiny_file() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("tiny.parquet"), b"PAR1").unwrap();

        let storage = storage_for(temp.path());
        let mut reader = storage.open_read(Path::new("tiny.parquet")).unwrap();
        assert!(ParquetFormat::new().row_count(&mut *reader).is_err());
    }

    #[test]
    fn test_open_yields_rows_in_file_order() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("a.parquet");
        write_ids(&path, &[7, 8, 9, 10, 11], 2);

        let ids: Vec<i64> = ParquetFormat::new()
            .open(&path)
            .unwrap()
            .map(|row| row.unwrap().get_long(0).unwrap())
            .collect();
        assert_eq!(ids, vec![7, 8, 9, 10, 11]);
    }

    #[test]
    fn test_open_corrupt_file_is_format_error() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("bad.parquet");
        std::fs::write(&path, b"garbage").unwrap();

        let err = ParquetFormat::new().open(&path).err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::Format);
    }
}
