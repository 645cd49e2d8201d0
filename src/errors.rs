use std::io;

use thiserror::Error;

use crate::models::VersionId;

#[derive(Error, Debug)]
pub enum PatcherError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Archive error: {0}")]
    Archive(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("Invalid chunk table: {0}")]
    InvalidChunkTable(String),
    #[error("Installer error: {0}")]
    Installer(String),
    #[error("Version mismatch for {file}: expected {expected}, found {actual:?}")]
    VersionMismatch {
        file: String,
        expected: VersionId,
        actual: Option<VersionId>,
    },
    #[error("Patch error: {0}")]
    Patch(String),
    #[error("Download failed: {0}")]
    DownloadFailed(String),
    #[error("Operation cancelled")]
    Cancelled,
}

impl PatcherError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PatcherError::Cancelled)
    }
}

impl From<zip::result::ZipError> for PatcherError {
    fn from(err: zip::result::ZipError) -> Self {
        PatcherError::Archive(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PatcherError>;
