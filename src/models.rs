use serde::{Deserialize, Serialize};

use crate::errors::{PatcherError, Result};

/// Application versions are numbered from 1.
pub type VersionId = u32;

/// Entries with a trailing slash name directories.
pub fn is_directory_entry(name: &str) -> bool {
    name.ends_with('/')
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ChunksData {
    #[serde(rename = "size")]
    pub chunk_size: u64,
    #[serde(rename = "hashes", default)]
    pub hashes: Vec<String>,
}

impl ChunksData {
    pub fn is_available(&self) -> bool {
        self.chunk_size > 0 && !self.hashes.is_empty()
    }

    pub fn expected_chunk_count(&self, file_len: u64) -> u64 {
        if self.chunk_size == 0 {
            return 0;
        }
        file_len.div_ceil(self.chunk_size)
    }

    pub fn validate(&self, file_len: u64) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(PatcherError::InvalidChunkTable(
                "chunk size must be positive".to_string(),
            ));
        }
        let expected = self.expected_chunk_count(file_len);
        if self.hashes.len() as u64 != expected {
            return Err(PatcherError::InvalidChunkTable(format!(
                "expected {} chunk hashes for {} bytes, got {}",
                expected,
                file_len,
                self.hashes.len()
            )));
        }
        Ok(())
    }

    pub fn expected_hashes(&self) -> Result<Vec<Vec<u8>>> {
        self.hashes
            .iter()
            .map(|hash| crate::utils::hashing::decode_digest(hash))
            .collect()
    }
}

/// A downloadable artifact and everything needed to fetch and verify it.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct RemoteResource {
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub torrent_urls: Vec<String>,
    /// Where the package's file index can be fetched, for formats that publish one.
    #[serde(default)]
    pub meta_urls: Vec<String>,
    pub size: u64,
    #[serde(default)]
    pub hash_code: Option<String>,
    #[serde(default)]
    pub chunks: Option<ChunksData>,
}

impl RemoteResource {
    pub fn has_chunks(&self) -> bool {
        self.chunks
            .as_ref()
            .map(ChunksData::is_available)
            .unwrap_or(false)
    }

    pub fn has_meta_urls(&self) -> bool {
        !self.meta_urls.is_empty()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ContentFile {
    pub path: String,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ContentSummary {
    pub size: u64,
    #[serde(default)]
    pub uncompressed_size: u64,
    #[serde(default)]
    pub hash_code: Option<String>,
    #[serde(default)]
    pub compression_method: Option<String>,
    #[serde(default)]
    pub files: Vec<ContentFile>,
    #[serde(default)]
    pub chunks: Option<ChunksData>,
}

impl ContentSummary {
    pub fn total_file_size(&self) -> u64 {
        self.files.iter().filter_map(|file| file.size).sum()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct DiffSummary {
    pub size: u64,
    #[serde(default)]
    pub uncompressed_size: u64,
    #[serde(default)]
    pub hash_code: Option<String>,
    #[serde(default)]
    pub compression_method: Option<String>,
    #[serde(default)]
    pub added_files: Vec<String>,
    #[serde(default)]
    pub removed_files: Vec<String>,
    #[serde(default)]
    pub modified_files: Vec<String>,
    #[serde(default)]
    pub unchanged_files: Vec<String>,
    #[serde(default)]
    pub chunks: Option<ChunksData>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct VersionIdResponse {
    pub id: VersionId,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ResourceUrl {
    pub url: String,
    #[serde(default)]
    pub meta_url: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct TorrentUrl {
    pub url: String,
}
