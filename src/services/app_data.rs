use std::path::{Path, PathBuf};

use crate::errors::Result;
use crate::services::local_data::LocalData;
use crate::services::local_metadata::LocalMetaData;
use crate::services::temporary_data::{DownloadData, TemporaryData};
use crate::utils::paths::{downloads_dir, metadata_path, temp_dir};

/// Everything the patcher keeps for one installation root. Create one per root and
/// hand it to a single updater at a time.
pub struct AppData {
    root: PathBuf,
    pub local: LocalData,
    pub metadata: LocalMetaData,
    pub temporary: TemporaryData,
    pub downloads: DownloadData,
}

impl AppData {
    pub fn open(root: &Path) -> Result<Self> {
        let local = LocalData::new(root)?;
        let metadata = LocalMetaData::load(&metadata_path(root));
        Ok(Self {
            root: root.to_path_buf(),
            local,
            metadata,
            temporary: TemporaryData::new(&temp_dir(root)),
            downloads: DownloadData::new(&downloads_dir(root)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
