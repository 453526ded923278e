// rust/stream-core/src/storage/local.rs

//! Local filesystem storage backend.
//!
//! Serves shard files from a directory tree (a mounted bucket, an NFS share,
//! or a plain dataset checkout). Large files are memory-mapped so footer
//! range reads do not go through a buffered reader.

use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use super::traits::{StorageBackend, StorageReader};
use crate::config::StorageConfig;
use crate::error::{Result, StreamError};

/// Local filesystem storage backend.
pub struct LocalStorage {
    /// Base path for all storage operations.
    base_path: PathBuf,
    /// Buffer size for buffered I/O operations.
    buffer_size: usize,
    /// Whether to use memory-mapped I/O.
    use_mmap: bool,
    /// File size threshold above which to use mmap.
    mmap_threshold: u64,
}

impl LocalStorage {
    /// Creates a new `LocalStorage` instance from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base path does not exist or is not a directory.
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let base_path = config.base_path.clone();

        if !base_path.is_dir() {
            return Err(StreamError::storage(
                &base_path,
                "base path is not an existing directory",
            ));
        }

        Ok(Self {
            base_path,
            buffer_size: config.buffer_size,
            use_mmap: config.use_mmap,
            mmap_threshold: config.mmap_threshold,
        })
    }

    /// Resolves a path relative to the base path.
    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }

    fn walk(&self, root: &Path, dir: &Path, entries: &mut Vec<String>) -> Result<()> {
        let read_dir = fs::read_dir(dir).map_err(|e| {
            StreamError::storage_with_source(dir, "failed to read directory", e)
        })?;

        for entry in read_dir {
            let entry = entry.map_err(|e| {
                StreamError::storage_with_source(dir, "failed to read directory entry", e)
            })?;
            let path = entry.path();

            if path.is_dir() {
                self.walk(root, &path, entries)?;
                continue;
            }

            // Relative names always use '/' so shard ids are portable
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let parts: Vec<_> = relative
                .components()
                .filter_map(|c| c.as_os_str().to_str())
                .collect();
            entries.push(parts.join("/"));
        }

        Ok(())
    }
}

impl StorageBackend for LocalStorage {
    fn open_read(&self, path: &Path) -> Result<Box<dyn StorageReader>> {
        let full_path = self.resolve_path(path);
        let file = File::open(&full_path)
            .map_err(|e| StreamError::storage_with_source(&full_path, "failed to open file", e))?;

        let size = file
            .metadata()
            .map_err(|e| {
                StreamError::storage_with_source(&full_path, "failed to read file metadata", e)
            })?
            .len();

        if self.use_mmap && size >= self.mmap_threshold && size > 0 {
            // SAFETY: The file is opened read-only and we maintain the Mmap
            // for the lifetime of the reader.
            let mmap = unsafe { Mmap::map(&file) }.map_err(|e| {
                StreamError::storage_with_source(&full_path, "failed to memory-map file", e)
            })?;

            Ok(Box::new(MmapReader::new(mmap, full_path)))
        } else {
            Ok(Box::new(LocalReader::new(file, size, self.buffer_size, full_path)))
        }
    }

    fn list(&self, prefix: &Path) -> Result<Vec<String>> {
        let full_path = self.resolve_path(prefix);

        if !full_path.exists() {
            return Ok(Vec::new());
        }

        if !full_path.is_dir() {
            return Err(StreamError::storage(&full_path, "path is not a directory"));
        }

        let mut entries = Vec::new();
        self.walk(&full_path, &full_path, &mut entries)?;
        entries.sort();
        Ok(entries)
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

/// Buffered file reader for local storage.
struct LocalReader {
    reader: BufReader<File>,
    size: u64,
    path: PathBuf,
}

impl LocalReader {
    fn new(file: File, size: u64, buffer_size: usize, path: PathBuf) -> Self {
        Self {
            reader: BufReader::with_capacity(buffer_size, file),
            size,
            path,
        }
    }
}

impl Read for LocalReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Seek for LocalReader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.reader.seek(pos)
    }
}

impl StorageReader for LocalReader {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_range(&mut self, start: u64, length: usize) -> Result<Vec<u8>> {
        self.seek(SeekFrom::Start(start)).map_err(|e| {
            StreamError::storage_with_source(
                &self.path,
                format!("failed to seek to position {start}"),
                e,
            )
        })?;

        let mut buf = vec![0u8; length];
        self.read_exact(&mut buf).map_err(|e| {
            StreamError::storage_with_source(
                &self.path,
                format!("failed to read {length} bytes at position {start}"),
                e,
            )
        })?;

        Ok(buf)
    }
}

/// Memory-mapped file reader for local storage.
struct MmapReader {
    mmap: Mmap,
    position: u64,
    path: PathBuf,
}

impl MmapReader {
    fn new(mmap: Mmap, path: PathBuf) -> Self {
        Self {
            mmap,
            position: 0,
            path,
        }
    }
}

impl Read for MmapReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let pos = (self.position as usize).min(self.mmap.len());
        let remaining = &self.mmap[pos..];
        let to_read = buf.len().min(remaining.len());

        if to_read == 0 {
            return Ok(0);
        }

        buf[..to_read].copy_from_slice(&remaining[..to_read]);
        self.position = (pos + to_read) as u64;
        Ok(to_read)
    }
}

impl Seek for MmapReader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.mmap.len() as i64 + offset,
            SeekFrom::Current(offset) => self.position as i64 + offset,
        };

        if new_pos < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek to negative position",
            ));
        }

        self.position = new_pos as u64;
        Ok(self.position)
    }
}

impl StorageReader for MmapReader {
    fn size(&self) -> u64 {
        self.mmap.len() as u64
    }

    fn read_range(&mut self, start: u64, length: usize) -> Result<Vec<u8>> {
        let start = start as usize;
        let end = start.saturating_add(length);

        if end > self.mmap.len() {
            return Err(StreamError::storage(
                &self.path,
                format!(
                    "read range {}..{} exceeds file size {}",
                    start,
                    end,
                    self.mmap.len()
                ),
            ));
        }

        Ok(self.mmap[start..end].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_storage() -> (LocalStorage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig {
            base_path: temp_dir.path().to_path_buf(),
            buffer_size: 4096,
            use_mmap: true,
            mmap_threshold: 1024, // Low threshold for testing
            ..Default::default()
        };
        let storage = LocalStorage::new(&config).unwrap();
        (storage, temp_dir)
    }

    fn put(temp: &TempDir, name: &str, data: &[u8]) {
        let path = temp.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, data).unwrap();
    }

    #[test]
    fn test_new_requires_existing_dir() {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig {
            base_path: temp_dir.path().join("missing"),
            ..Default::default()
        };

        assert!(LocalStorage::new(&config).is_err());
    }

    #[test]
    fn test_metadata_not_found() {
        let (storage, _temp) = create_test_storage();
        assert!(storage.metadata(Path::new("nonexistent.txt")).is_err());
    }

    #[test]
    fn test_read_small_file() {
        let (storage, temp) = create_test_storage();
        put(&temp, "small.txt", b"hello world");

        let mut reader = storage.open_read(Path::new("small.txt")).unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();

        assert_eq!(buf, b"hello world");
        assert_eq!(reader.size(), 11);
        assert_eq!(reader.read_range(6, 5).unwrap(), b"world");
    }

    #[test]
    fn test_read_large_file_uses_mmap() {
        let (storage, temp) = create_test_storage();
        let data: Vec<u8> = (0..2048).map(|i| (i % 256) as u8).collect();
        put(&temp, "large.bin", &data);

        let mut reader = storage.open_read(Path::new("large.bin")).unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();

        assert_eq!(buf, data);
        assert_eq!(reader.read_range(100, 50).unwrap(), &data[100..150]);
        assert!(reader.read_range(2000, 100).is_err());
    }

    #[test]
    fn test_mmap_read_after_seek_past_end() {
        let (storage, temp) = create_test_storage();
        let data = vec![7u8; 2048];
        put(&temp, "large.bin", &data);

        let mut reader = storage.open_read(Path::new("large.bin")).unwrap();
        reader.seek(SeekFrom::Start(4096)).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_seek() {
        let (storage, temp) = create_test_storage();
        put(&temp, "test.txt", b"0123456789");

        let mut reader = storage.open_read(Path::new("test.txt")).unwrap();
        let mut buf = [0u8; 1];

        assert_eq!(reader.seek(SeekFrom::Start(5)).unwrap(), 5);
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(buf[0], b'5');

        assert_eq!(reader.seek(SeekFrom::Current(2)).unwrap(), 8);
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(buf[0], b'8');

        assert_eq!(reader.seek(SeekFrom::End(-3)).unwrap(), 7);
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(buf[0], b'7');
    }

    #[test]
    fn test_list_recursive_sorted() {
        let (storage, temp) = create_test_storage();
        put(&temp, "ds/fr/0000.parquet", b"x");
        put(&temp, "ds/en/0001.parquet", b"x");
        put(&temp, "ds/en/0000.parquet", b"x");
        put(&temp, "ds/README.md", b"x");

        let entries = storage.list(Path::new("ds")).unwrap();
        assert_eq!(
            entries,
            vec![
                "README.md",
                "en/0000.parquet",
                "en/0001.parquet",
                "fr/0000.parquet",
            ]
        );
    }

    #[test]
    fn test_list_nonexistent() {
        let (storage, _temp) = create_test_storage();
        assert!(storage.list(Path::new("nonexistent")).unwrap().is_empty());
    }

    #[test]
    fn test_list_file_not_dir() {
        let (storage, temp) = create_test_storage();
        put(&temp, "file.txt", b"data");

        assert!(storage.list(Path::new("file.txt")).is_err());
    }

    #[test]
    fn test_mmap_disabled() {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig {
            base_path: temp_dir.path().to_path_buf(),
            buffer_size: 4096,
            use_mmap: false,
            mmap_threshold: 1024,
            ..Default::default()
        };
        let storage = LocalStorage::new(&config).unwrap();

        let data: Vec<u8> = (0..2048).map(|i| (i % 256) as u8).collect();
        put(&temp_dir, "large.bin", &data);

        let mut reader = storage.open_read(Path::new("large.bin")).unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();

        assert_eq!(buf, data);
    }

    #[test]
    fn test_object_safety() {
        let (storage, temp) = create_test_storage();
        put(&temp, "test.txt", b"hello");

        let backend: Box<dyn StorageBackend> = Box::new(storage);
        assert_eq!(backend.open_read(Path::new("test.txt")).unwrap().size(), 5);
        assert_eq!(backend.backend_type(), "local");
    }
}
