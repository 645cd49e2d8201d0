use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::{PatcherError, Result};
use crate::utils::byte_range::ByteRange;
use crate::utils::hashing::ChunkHasher;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteStatus {
    /// Input buffered or persisted; more bytes are expected.
    Accepted,
    /// Every chunk of the file has been verified and persisted.
    Completed,
    /// A chunk failed verification. Resume from `verified_length()`.
    Rejected,
}

/// Write-only sink that persists a byte stream only in whole, hash-verified chunks.
///
/// Bytes are buffered until the chunk at `verified_length()` is complete (the final
/// chunk may be shorter), hashed, and compared with the published digest. Matching
/// chunks are written in place; a mismatch discards the buffered chunk and the rest of
/// the input, leaving the file prefix untouched.
///
/// A writer created with [`ChunkedFileWriter::create_range`] holds only the chunks
/// covering a byte range of the resource. Lengths are then relative to the window and
/// `window_start()` gives its absolute offset.
pub struct ChunkedFileWriter {
    path: PathBuf,
    file: File,
    chunk_size: u64,
    window_start: u64,
    total_length: u64,
    expected: Vec<Vec<u8>>,
    hasher: Arc<dyn ChunkHasher>,
    first_chunk: u64,
    windowed: bool,
    chunk_index: u64,
    pending: Vec<u8>,
}

impl ChunkedFileWriter {
    pub fn create(
        path: &Path,
        chunk_size: u64,
        total_length: u64,
        expected: Vec<Vec<u8>>,
        hasher: Arc<dyn ChunkHasher>,
    ) -> Result<Self> {
        Self::open(path, chunk_size, total_length, expected, hasher, None)
    }

    /// Downloads only the chunks containing `range` of a resource of `resource_length` bytes.
    pub fn create_range(
        path: &Path,
        chunk_size: u64,
        resource_length: u64,
        expected: Vec<Vec<u8>>,
        hasher: Arc<dyn ChunkHasher>,
        range: ByteRange,
    ) -> Result<Self> {
        Self::open(path, chunk_size, resource_length, expected, hasher, Some(range))
    }

    fn open(
        path: &Path,
        chunk_size: u64,
        resource_length: u64,
        expected: Vec<Vec<u8>>,
        hasher: Arc<dyn ChunkHasher>,
        range: Option<ByteRange>,
    ) -> Result<Self> {
        if chunk_size == 0 {
            return Err(PatcherError::InvalidChunkTable(
                "chunk size must be positive".to_string(),
            ));
        }
        let expected_count = resource_length.div_ceil(chunk_size);
        if expected.len() as u64 != expected_count {
            return Err(PatcherError::InvalidChunkTable(format!(
                "{} bytes in chunks of {} need {} hashes, got {}",
                resource_length,
                chunk_size,
                expected_count,
                expected.len()
            )));
        }
        let (window_start, total_length) = match range {
            None => (0, resource_length),
            Some(range) => {
                if resource_length == 0 {
                    return Err(PatcherError::InvalidOperation(format!(
                        "range {} of an empty resource",
                        range
                    )));
                }
                let whole = ByteRange::bounded(0, resource_length - 1)?;
                let effective = range.chunkify(chunk_size, expected_count)?.contain_in(&whole)?;
                let end = effective.end().unwrap_or(resource_length - 1);
                (effective.start(), end - effective.start() + 1)
            }
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        if file.metadata()?.len() != total_length {
            file.set_len(total_length)?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            file,
            chunk_size,
            window_start,
            total_length,
            expected,
            hasher,
            first_chunk: window_start / chunk_size,
            windowed: range.is_some(),
            chunk_index: 0,
            pending: Vec::with_capacity(chunk_size.min(16 * 1024 * 1024) as usize),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes this writer holds: the whole resource, or the chunk-aligned window.
    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Absolute resource offset of the first byte in the file.
    pub fn window_start(&self) -> u64 {
        self.window_start
    }

    pub fn is_windowed(&self) -> bool {
        self.windowed
    }

    /// Absolute resource bytes covered by the file, `None` when it holds nothing.
    pub fn effective_range(&self) -> Option<ByteRange> {
        if self.total_length == 0 {
            return None;
        }
        ByteRange::bounded(self.window_start, self.window_start + self.total_length - 1).ok()
    }

    pub fn verified_length(&self) -> u64 {
        (self.chunk_index * self.chunk_size).min(self.total_length)
    }

    pub fn remaining_length(&self) -> u64 {
        self.total_length - self.verified_length()
    }

    /// Verified bytes plus whatever sits in the pending chunk buffer.
    pub fn saved_length(&self) -> u64 {
        self.verified_length() + self.pending.len() as u64
    }

    pub fn is_complete(&self) -> bool {
        self.remaining_length() == 0
    }

    /// Re-hashes what is already on disk and adopts the longest verified prefix.
    pub fn resume_verified_prefix(&mut self) -> Result<u64> {
        self.pending.clear();
        self.chunk_index = 0;
        self.file.seek(SeekFrom::Start(0))?;
        let mut buffer = vec![0u8; self.chunk_size.min(self.total_length.max(1)) as usize];
        while !self.is_complete() {
            let length = self.current_chunk_length() as usize;
            let slice = &mut buffer[..length];
            if self.file.read_exact(slice).is_err() {
                break;
            }
            if self.hasher.digest(slice) != *self.expected_digest() {
                break;
            }
            self.chunk_index += 1;
        }
        tracing::debug!(
            "resumed {} with {} verified bytes of {}",
            self.path.display(),
            self.verified_length(),
            self.total_length
        );
        Ok(self.verified_length())
    }

    pub fn write(&mut self, data: &[u8]) -> Result<WriteStatus> {
        let room = self.remaining_length() - self.pending.len() as u64;
        if data.len() as u64 > room {
            return Err(PatcherError::InvalidOperation(format!(
                "write of {} bytes exceeds remaining {} bytes of {}",
                data.len(),
                room,
                self.path.display()
            )));
        }

        let mut offset = 0usize;
        while offset < data.len() {
            let target = self.current_chunk_length() as usize;
            let take = (data.len() - offset).min(target - self.pending.len());
            self.pending.extend_from_slice(&data[offset..offset + take]);
            offset += take;

            if self.pending.len() == target && !self.commit_pending()? {
                return Ok(WriteStatus::Rejected);
            }
        }

        if self.is_complete() {
            Ok(WriteStatus::Completed)
        } else {
            Ok(WriteStatus::Accepted)
        }
    }

    pub fn finish(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    fn expected_digest(&self) -> &Vec<u8> {
        &self.expected[(self.first_chunk + self.chunk_index) as usize]
    }

    fn current_chunk_length(&self) -> u64 {
        self.chunk_size.min(self.remaining_length())
    }

    fn commit_pending(&mut self) -> Result<bool> {
        if self.hasher.digest(&self.pending) != *self.expected_digest() {
            tracing::warn!(
                "chunk {} of {} failed verification, discarding {} buffered bytes",
                self.chunk_index,
                self.path.display(),
                self.pending.len()
            );
            self.pending.clear();
            return Ok(false);
        }
        self.file.seek(SeekFrom::Start(self.verified_length()))?;
        self.file.write_all(&self.pending)?;
        self.chunk_index += 1;
        self.pending.clear();
        Ok(true)
    }
}
