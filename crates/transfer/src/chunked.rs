use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::TransferError;
use crate::types::ChunkRange;

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Splits `[0, total_bytes)` into consecutive ranges of `chunk_size` bytes.
///
/// The last range may be shorter. A zero-byte file yields no ranges.
pub fn plan_chunks(total_bytes: u64, chunk_size: u64) -> Result<Vec<ChunkRange>, TransferError> {
    if chunk_size == 0 {
        return Err(TransferError::ZeroChunkSize);
    }

    let count = total_bytes.div_ceil(chunk_size);
    let mut chunks = Vec::with_capacity(count as usize);
    let mut start = 0;
    while start < total_bytes {
        let end = (start + chunk_size).min(total_bytes);
        chunks.push(ChunkRange::new(start, end));
        start = end;
    }
    Ok(chunks)
}

/// Rebuilds the queue for a resumed upload, starting exactly at
/// `next_expected_byte`.
///
/// An offset off the chunk grid (a checkpoint written under another chunk
/// size, or a server offset mid-chunk) yields a short first range up to the
/// next grid boundary; the rest of the plan follows the grid.
pub fn pending_chunks(
    total_bytes: u64,
    chunk_size: u64,
    next_expected_byte: u64,
) -> Result<Vec<ChunkRange>, TransferError> {
    if chunk_size == 0 {
        return Err(TransferError::ZeroChunkSize);
    }

    let mut chunks = Vec::new();
    let mut start = next_expected_byte;
    while start < total_bytes {
        let boundary = (start / chunk_size + 1).saturating_mul(chunk_size);
        let end = boundary.min(total_bytes);
        chunks.push(ChunkRange::new(start, end));
        start = end;
    }
    Ok(chunks)
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Random-access bytes of the file being uploaded.
pub trait ChunkSource: Send + Sync {
    /// Human-readable name (used as the multipart file name and store key).
    fn name(&self) -> &str;

    /// Total size in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads exactly the bytes of `range`.
    fn read_range(&self, range: ChunkRange) -> Result<Vec<u8>, TransferError>;
}

fn check_bounds(range: ChunkRange, len: u64) -> Result<(), TransferError> {
    if range.start >= range.end || range.end > len {
        return Err(TransferError::OutOfBounds {
            start: range.start,
            end: range.end,
            len,
        });
    }
    Ok(())
}

/// A file on disk, read by seeking to each range.
pub struct FileSource {
    file: Mutex<File>,
    path: PathBuf,
    name: String,
    len: u64,
}

impl FileSource {
    /// Opens `path`; its file name becomes the source name.
    pub fn open(path: &Path) -> Result<Self, TransferError> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            name,
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ChunkSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn read_range(&self, range: ChunkRange) -> Result<Vec<u8>, TransferError> {
        check_bounds(range, self.len)?;
        let mut buf = vec![0u8; range.len() as usize];
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(range.start))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// In-memory bytes under a display name.
pub struct MemorySource {
    name: String,
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

impl ChunkSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_range(&self, range: ChunkRange) -> Result<Vec<u8>, TransferError> {
        check_bounds(range, self.len())?;
        Ok(self.data[range.start as usize..range.end as usize].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    fn assert_partition(chunks: &[ChunkRange], total: u64, chunk_size: u64) {
        let mut cursor = 0;
        for c in chunks {
            assert_eq!(c.start, cursor, "ranges must be contiguous");
            assert!(c.end > c.start);
            assert!(c.len() <= chunk_size);
            cursor = c.end;
        }
        assert_eq!(cursor, total, "ranges must cover the whole file");
    }

    #[test]
    fn plan_example_file() {
        let chunks = plan_chunks(2_500_000, 1_000_000).unwrap();
        assert_eq!(
            chunks,
            vec![
                ChunkRange::new(0, 1_000_000),
                ChunkRange::new(1_000_000, 2_000_000),
                ChunkRange::new(2_000_000, 2_500_000),
            ]
        );
    }

    #[test]
    fn plan_partitions_exactly() {
        for total in [0u64, 1, 7, 8, 9, 63, 64, 65, 1000, 4097] {
            for chunk_size in [1u64, 3, 8, 64, 4096] {
                let chunks = plan_chunks(total, chunk_size).unwrap();
                assert_partition(&chunks, total, chunk_size);
                // Only the last chunk may be short.
                for c in chunks.iter().rev().skip(1) {
                    assert_eq!(c.len(), chunk_size);
                }
            }
        }
    }

    #[test]
    fn plan_empty_file() {
        assert!(plan_chunks(0, 1024).unwrap().is_empty());
    }

    #[test]
    fn plan_rejects_zero_chunk_size() {
        assert!(matches!(
            plan_chunks(10, 0),
            Err(TransferError::ZeroChunkSize)
        ));
    }

    #[test]
    fn pending_skips_acknowledged_ranges() {
        let pending = pending_chunks(2_500_000, 1_000_000, 2_000_000).unwrap();
        assert_eq!(pending, vec![ChunkRange::new(2_000_000, 2_500_000)]);

        let all = pending_chunks(2_500_000, 1_000_000, 0).unwrap();
        assert_eq!(all.len(), 3);

        let none = pending_chunks(2_500_000, 1_000_000, 2_500_000).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn pending_off_grid_offset_keeps_straddling_bytes() {
        let pending = pending_chunks(2_500_000, 1_048_576, 2_000_000).unwrap();
        assert_eq!(
            pending,
            vec![
                ChunkRange::new(2_000_000, 2_097_152),
                ChunkRange::new(2_097_152, 2_500_000),
            ]
        );

        // Every byte from the offset to the end is covered exactly once.
        for next in [1u64, 999, 1000, 1001, 4095, 4096] {
            let pending = pending_chunks(4097, 1000, next).unwrap();
            let mut cursor = next;
            for c in &pending {
                assert_eq!(c.start, cursor);
                assert!(c.len() <= 1000);
                cursor = c.end;
            }
            assert_eq!(cursor, 4097);
        }
    }

    #[test]
    fn pending_rejects_zero_chunk_size() {
        assert!(matches!(
            pending_chunks(10, 0, 5),
            Err(TransferError::ZeroChunkSize)
        ));
    }

    #[test]
    fn file_source_reads_ranges() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"AABBCCDDEE");

        let source = FileSource::open(&path).unwrap();
        assert_eq!(source.name(), "test.bin");
        assert_eq!(source.len(), 10);

        // Out of order reads must still land on the right bytes.
        assert_eq!(source.read_range(ChunkRange::new(8, 10)).unwrap(), b"EE");
        assert_eq!(source.read_range(ChunkRange::new(0, 4)).unwrap(), b"AABB");
        assert_eq!(source.read_range(ChunkRange::new(4, 8)).unwrap(), b"CCDD");
    }

    #[test]
    fn file_source_rejects_out_of_bounds() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "short.bin", b"0123");
        let source = FileSource::open(&path).unwrap();
        assert!(matches!(
            source.read_range(ChunkRange::new(2, 6)),
            Err(TransferError::OutOfBounds { len: 4, .. })
        ));
    }

    #[test]
    fn file_source_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            FileSource::open(&dir.path().join("absent.bin")),
            Err(TransferError::Io(_))
        ));
    }

    #[test]
    fn memory_source_matches_plan() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let source = MemorySource::new("mem.bin", data.clone());

        let mut rebuilt = Vec::new();
        for range in plan_chunks(source.len(), 300).unwrap() {
            rebuilt.extend(source.read_range(range).unwrap());
        }
        assert_eq!(rebuilt, data);
    }
}
