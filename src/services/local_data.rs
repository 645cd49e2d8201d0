use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{PatcherError, Result};
use crate::utils::file::{dir_is_empty, is_safe_relative_path, replace_with_copy};
use crate::utils::paths::is_reserved_name;

/// File and directory operations confined to one installation root. Names are
/// forward-slash relative paths; a trailing slash is tolerated on directories.
#[derive(Clone, Debug)]
pub struct LocalData {
    root: PathBuf,
}

impl LocalData {
    pub fn new(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `name` under the root, rejecting anything that could escape it.
    pub fn file_path(&self, name: &str) -> Result<PathBuf> {
        let trimmed = name.replace('\\', "/");
        let trimmed = trimmed.trim_end_matches('/');
        let relative = Path::new(trimmed);
        if !is_safe_relative_path(relative) || is_reserved_name(trimmed) {
            return Err(PatcherError::InvalidPath(name.to_string()));
        }
        Ok(self.root.join(relative))
    }

    pub fn create_directory(&self, name: &str) -> Result<()> {
        let path = self.file_path(name)?;
        if path.is_file() {
            return Err(PatcherError::InvalidOperation(format!(
                "cannot create directory {}: a file exists there",
                name
            )));
        }
        fs::create_dir_all(&path)?;
        Ok(())
    }

    /// Removes an empty directory. A directory holding anything, even an empty
    /// subdirectory, is an error.
    pub fn delete_directory(&self, name: &str) -> Result<()> {
        let path = self.file_path(name)?;
        if !path.is_dir() {
            return Ok(());
        }
        if !dir_is_empty(&path)? {
            return Err(PatcherError::InvalidOperation(format!(
                "directory {} is not empty",
                name
            )));
        }
        fs::remove_dir(&path)?;
        Ok(())
    }

    pub fn directory_exists(&self, name: &str) -> Result<bool> {
        Ok(self.file_path(name)?.is_dir())
    }

    pub fn is_directory_empty(&self, name: &str) -> Result<bool> {
        let path = self.file_path(name)?;
        if !path.is_dir() {
            return Err(PatcherError::NotFound(format!("directory {}", name)));
        }
        Ok(dir_is_empty(&path)?)
    }

    /// Copies `source` into place under `name`, creating parent directories and
    /// replacing any existing file atomically.
    pub fn create_or_update_file(&self, name: &str, source: &Path) -> Result<()> {
        let path = self.file_path(name)?;
        if path.is_dir() {
            return Err(PatcherError::InvalidOperation(format!(
                "cannot write file {}: a directory exists there",
                name
            )));
        }
        if !source.is_file() {
            return Err(PatcherError::NotFound(source.display().to_string()));
        }
        replace_with_copy(source, &path)?;
        Ok(())
    }

    pub fn delete_file(&self, name: &str) -> Result<()> {
        let path = self.file_path(name)?;
        if path.is_file() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    pub fn file_exists(&self, name: &str) -> Result<bool> {
        Ok(self.file_path(name)?.is_file())
    }

    pub fn file_size(&self, name: &str) -> Result<u64> {
        Ok(fs::metadata(self.file_path(name)?)?.len())
    }
}
