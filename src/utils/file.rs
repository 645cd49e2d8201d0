use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path};

use memmap2::{Mmap, MmapOptions};

/// Writes `contents` to a sibling `.tmp` file, syncs it, then renames it over `path`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let temp_path = path.with_extension("tmp");
    if let Some(parent) = temp_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(&temp_path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);
    fs::rename(temp_path, path)?;
    Ok(())
}

/// Copies `source` next to `target` and renames it into place, so readers never see a
/// half-written target.
pub fn replace_with_copy(source: &Path, target: &Path) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let staging = target.with_file_name(format!(".{}.patcher-tmp", file_name));
    if let Err(err) = fs::copy(source, &staging) {
        let _ = fs::remove_file(&staging);
        return Err(err);
    }
    if let Err(err) = fs::rename(&staging, target) {
        let _ = fs::remove_file(&staging);
        return Err(err);
    }
    Ok(())
}

pub fn is_safe_relative_path(path: &Path) -> bool {
    if path.as_os_str().is_empty() {
        return false;
    }
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::ParentDir => return false,
            _ => {}
        }
    }
    true
}

/// `true` when `path` has no entries at all. An empty subdirectory is still an entry.
pub fn dir_is_empty(path: &Path) -> io::Result<bool> {
    Ok(fs::read_dir(path)?.next().is_none())
}

/// Maps a file read-only. Empty files have nothing to map and give `None`.
pub fn mmap_read(path: &Path) -> io::Result<Option<Mmap>> {
    let file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(None);
    }
    // Callers never write to a file while it is mapped.
    unsafe { MmapOptions::new().map(&file) }.map(Some)
}

pub fn remove_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}
