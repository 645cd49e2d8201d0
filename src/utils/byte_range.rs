use std::fmt;

use crate::errors::{PatcherError, Result};

/// Inclusive byte interval. `end == None` means "until the end of the stream".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    start: u64,
    end: Option<u64>,
}

impl ByteRange {
    pub fn new(start: u64, end: Option<u64>) -> Result<Self> {
        if let Some(end) = end {
            if end < start {
                return Err(PatcherError::InvalidOperation(format!(
                    "byte range end {} precedes start {}",
                    end, start
                )));
            }
        }
        Ok(Self { start, end })
    }

    /// Open-ended range from `start` to the end of the stream.
    pub fn from_offset(start: u64) -> Self {
        Self { start, end: None }
    }

    pub fn bounded(start: u64, end: u64) -> Result<Self> {
        Self::new(start, Some(end))
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> Option<u64> {
        self.end
    }

    pub fn is_bounded(&self) -> bool {
        self.end.is_some()
    }

    pub fn len(&self) -> Option<u64> {
        self.end.map(|end| (end - self.start).saturating_add(1))
    }

    /// `true` when every byte of `self` lies within `outer`.
    pub fn is_contained_in(&self, outer: &ByteRange) -> bool {
        if self.start < outer.start {
            return false;
        }
        match (self.end, outer.end) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(end), Some(outer_end)) => end <= outer_end,
        }
    }

    pub fn contains(&self, inner: &ByteRange) -> bool {
        inner.is_contained_in(self)
    }

    pub fn overlaps(&self, other: &ByteRange) -> bool {
        let self_before_other = matches!(self.end, Some(end) if end < other.start);
        let other_before_self = matches!(other.end, Some(end) if end < self.start);
        !self_before_other && !other_before_self
    }

    /// Clips the range so it lies inside `outer`. Ranges disjoint from `outer` are rejected.
    pub fn contain_in(&self, outer: &ByteRange) -> Result<ByteRange> {
        if !self.overlaps(outer) {
            return Err(PatcherError::InvalidOperation(format!(
                "range {} does not overlap {}",
                self, outer
            )));
        }
        let start = self.start.max(outer.start);
        let end = match (self.end, outer.end) {
            (Some(end), Some(outer_end)) => Some(end.min(outer_end)),
            (None, Some(outer_end)) => Some(outer_end),
            (end, None) => end,
        };
        Ok(ByteRange { start, end })
    }

    /// Re-expresses the range relative to `origin.start`.
    pub fn localize_to(&self, origin: &ByteRange) -> Result<ByteRange> {
        if self.start < origin.start {
            return Err(PatcherError::InvalidOperation(format!(
                "range {} starts before origin {}",
                self, origin
            )));
        }
        Ok(ByteRange {
            start: self.start - origin.start,
            end: self.end.map(|end| end - origin.start),
        })
    }

    /// Expands the range outward to chunk boundaries, never past the last chunk.
    pub fn chunkify(&self, chunk_size: u64, total_chunks: u64) -> Result<ByteRange> {
        if chunk_size == 0 {
            return Err(PatcherError::InvalidOperation(
                "chunk size must be positive".to_string(),
            ));
        }
        let start = (self.start / chunk_size) * chunk_size;
        let last = total_chunks
            .checked_mul(chunk_size)
            .map_or(u64::MAX, |size| size.saturating_sub(1));
        let end = self.end.map(|end| {
            let aligned = (end / chunk_size)
                .checked_add(1)
                .and_then(|chunks| chunks.checked_mul(chunk_size))
                .map_or(u64::MAX, |limit| limit - 1);
            aligned.min(last).max(start)
        });
        Ok(ByteRange { start, end })
    }
}

/// Formats as an HTTP `Range` header value.
impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "bytes={}-{}", self.start, end),
            None => write!(f, "bytes={}-", self.start),
        }
    }
}
