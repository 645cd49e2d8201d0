use std::fs::File;
use std::io::Read;
use std::path::Path;

use xxhash_rust::xxh32::{xxh32, Xxh32};

use crate::errors::{PatcherError, Result};

/// Seed the publishing tools use for every file and chunk hash.
const HASH_SEED: u32 = 42;
const FILE_READ_BUFFER: usize = 1024 * 1024;
const DIGEST_HEX_LEN: usize = 8;

/// Digest used to verify downloaded chunks against the published chunk table.
pub trait ChunkHasher: Send + Sync {
    fn digest(&self, data: &[u8]) -> Vec<u8>;
}

/// xxHash32, big-endian bytes.
#[derive(Clone, Copy, Debug, Default)]
pub struct XxHasher;

impl ChunkHasher for XxHasher {
    fn digest(&self, data: &[u8]) -> Vec<u8> {
        xxh32(data, HASH_SEED).to_be_bytes().to_vec()
    }
}

/// Published form of a hash: lowercase hex without leading zeros.
pub fn format_hash(value: u32) -> String {
    format!("{:x}", value)
}

pub fn hash_bytes(data: &[u8]) -> String {
    format_hash(xxh32(data, HASH_SEED))
}

pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Xxh32::new(HASH_SEED);
    let mut buffer = vec![0u8; FILE_READ_BUFFER];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format_hash(hasher.digest()))
}

/// Published hashes may drop leading zeros, so they are padded back to full width.
pub fn decode_digest(value: &str) -> Result<Vec<u8>> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.len() > DIGEST_HEX_LEN {
        return Err(PatcherError::InvalidChunkTable(format!("bad hash {:?}", value)));
    }
    let padded = format!("{:0>width$}", trimmed, width = DIGEST_HEX_LEN);
    hex::decode(&padded)
        .map_err(|err| PatcherError::InvalidChunkTable(format!("bad hash {}: {}", value, err)))
}

/// Compares a computed hash with a published one, ignoring case and leading zeros.
pub fn hashes_match(actual: &str, expected: &str) -> bool {
    let normalize = |value: &str| value.trim().trim_start_matches('0').to_ascii_lowercase();
    normalize(actual) == normalize(expected)
}
