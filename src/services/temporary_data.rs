use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::errors::Result;
use crate::models::VersionId;
use crate::utils::file::remove_path;

/// Scratch space for unpacked packages and patch outputs.
#[derive(Clone, Debug)]
pub struct TemporaryData {
    root: PathBuf,
}

impl TemporaryData {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A fresh path under the scratch root. Nothing is created on disk.
    pub fn unique_path(&self) -> Result<ScopedPath> {
        std::fs::create_dir_all(&self.root)?;
        Ok(ScopedPath::new(self.root.join(Uuid::new_v4().to_string())))
    }

    /// Like `unique_path`, but creates the directory.
    pub fn unique_dir(&self) -> Result<ScopedPath> {
        let scoped = self.unique_path()?;
        std::fs::create_dir_all(scoped.path())?;
        Ok(scoped)
    }

    pub fn clear(&self) -> Result<()> {
        remove_path(&self.root)?;
        Ok(())
    }
}

/// Deletes the file or directory it names when dropped.
#[derive(Debug)]
pub struct ScopedPath {
    path: PathBuf,
}

impl ScopedPath {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScopedPath {
    fn drop(&mut self) {
        if let Err(err) = remove_path(&self.path) {
            tracing::warn!("failed to clean up {}: {}", self.path.display(), err);
        }
    }
}

/// Where downloaded packages are kept until they are installed.
#[derive(Clone, Debug)]
pub struct DownloadData {
    root: PathBuf,
}

impl DownloadData {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn content_package_path(&self, version: VersionId) -> PathBuf {
        self.root.join(format!("content-{}.package", version))
    }

    pub fn diff_package_path(&self, version: VersionId) -> PathBuf {
        self.root.join(format!("diff-{}.package", version))
    }

    pub fn content_package_meta_path(&self, version: VersionId) -> PathBuf {
        self.root.join(format!("content-{}.package.meta", version))
    }

    pub fn diff_package_meta_path(&self, version: VersionId) -> PathBuf {
        self.root.join(format!("diff-{}.package.meta", version))
    }

    pub fn clear(&self) -> Result<()> {
        remove_path(&self.root)?;
        Ok(())
    }
}
