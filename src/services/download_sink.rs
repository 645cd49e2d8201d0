use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::Result;
use crate::services::chunked_writer::{ChunkedFileWriter, WriteStatus};

/// Destination a mirror transport streams into.
pub trait DownloadSink: Send {
    /// Called before every attempt.
    fn begin_attempt(&mut self) -> Result<()> {
        Ok(())
    }

    /// Absolute byte offset the next request should start from.
    fn resume_offset(&self) -> u64;

    /// Last absolute byte wanted, when only part of the resource is fetched.
    fn range_end(&self) -> Option<u64> {
        None
    }

    /// `None` when the size is only known once the stream ends.
    fn total_length(&self) -> Option<u64>;

    /// Bytes received so far, verified or not.
    fn saved_length(&self) -> u64;

    fn write(&mut self, data: &[u8]) -> Result<WriteStatus>;

    fn is_complete(&self) -> bool;

    /// Called when the transport runs out of bytes. Returns `true` when that is a
    /// legitimate end of the resource.
    fn end_of_stream(&mut self) -> bool {
        self.is_complete()
    }

    fn finish(&mut self) -> Result<()>;
}

/// Resumable sink backed by a verified chunk table.
pub struct ChunkedSink {
    writer: ChunkedFileWriter,
}

impl ChunkedSink {
    pub fn new(writer: ChunkedFileWriter) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> ChunkedFileWriter {
        self.writer
    }
}

impl DownloadSink for ChunkedSink {
    fn resume_offset(&self) -> u64 {
        self.writer.window_start() + self.writer.verified_length()
    }

    fn range_end(&self) -> Option<u64> {
        if !self.writer.is_windowed() {
            return None;
        }
        self.writer.effective_range().and_then(|range| range.end())
    }

    fn total_length(&self) -> Option<u64> {
        Some(self.writer.total_length())
    }

    fn saved_length(&self) -> u64 {
        self.writer.saved_length()
    }

    fn write(&mut self, data: &[u8]) -> Result<WriteStatus> {
        self.writer.write(data)
    }

    fn is_complete(&self) -> bool {
        self.writer.is_complete()
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.finish()
    }
}

/// Unverified sink: every attempt starts over from an empty file.
pub struct PlainFileSink {
    path: PathBuf,
    file: Option<File>,
    expected_length: Option<u64>,
    written: u64,
    ended: bool,
}

impl PlainFileSink {
    pub fn new(path: &Path, expected_length: Option<u64>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            file: None,
            expected_length,
            written: 0,
            ended: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DownloadSink for PlainFileSink {
    fn begin_attempt(&mut self) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        self.file = Some(file);
        self.written = 0;
        self.ended = false;
        Ok(())
    }

    fn resume_offset(&self) -> u64 {
        0
    }

    fn total_length(&self) -> Option<u64> {
        self.expected_length
    }

    fn saved_length(&self) -> u64 {
        self.written
    }

    fn write(&mut self, data: &[u8]) -> Result<WriteStatus> {
        if let Some(expected) = self.expected_length {
            if self.written + data.len() as u64 > expected {
                tracing::warn!(
                    "{} received more than the expected {} bytes",
                    self.path.display(),
                    expected
                );
                return Ok(WriteStatus::Rejected);
            }
        }
        if self.file.is_none() {
            self.begin_attempt()?;
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(data)?;
        }
        self.written += data.len() as u64;
        if self.is_complete() {
            Ok(WriteStatus::Completed)
        } else {
            Ok(WriteStatus::Accepted)
        }
    }

    fn is_complete(&self) -> bool {
        match self.expected_length {
            Some(expected) => self.written == expected,
            None => self.ended,
        }
    }

    fn end_of_stream(&mut self) -> bool {
        if self.expected_length.is_none() && self.written > 0 {
            self.ended = true;
        }
        self.is_complete()
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
            file.sync_all()?;
        }
        Ok(())
    }
}
