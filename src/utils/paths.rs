use std::path::{Path, PathBuf};

pub const METADATA_FILE_NAME: &str = "patcher_cache.json";
pub const CONFIG_FILE_NAME: &str = "patcher.config.json";
const PATCHER_DIR: &str = ".patcher";

fn ensure_dir(path: &Path) -> Option<PathBuf> {
    if path.as_os_str().is_empty() {
        return None;
    }
    if std::fs::create_dir_all(path).is_ok() {
        return Some(path.to_path_buf());
    }
    None
}

pub fn patcher_dir(install_root: &Path) -> PathBuf {
    install_root.join(PATCHER_DIR)
}

pub fn metadata_path(install_root: &Path) -> PathBuf {
    install_root.join(METADATA_FILE_NAME)
}

pub fn temp_dir(install_root: &Path) -> PathBuf {
    patcher_dir(install_root).join("temp")
}

pub fn downloads_dir(install_root: &Path) -> PathBuf {
    patcher_dir(install_root).join("downloads")
}

pub fn default_config_path(install_root: &Path) -> PathBuf {
    install_root.join(CONFIG_FILE_NAME)
}

/// `PATCHER_LOG_DIR` wins; otherwise logs live beside the installation.
pub fn resolve_log_dir(install_root: &Path) -> PathBuf {
    if let Ok(value) = std::env::var("PATCHER_LOG_DIR") {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            if let Some(dir) = ensure_dir(Path::new(trimmed)) {
                return dir;
            }
        }
    }
    let fallback = patcher_dir(install_root).join("logs");
    ensure_dir(&fallback).unwrap_or_else(|| PathBuf::from("logs"))
}

/// Bookkeeping files the patcher keeps inside the installation root.
pub fn is_reserved_name(name: &str) -> bool {
    let normalized = name.trim_start_matches("./");
    normalized == METADATA_FILE_NAME
        || normalized == PATCHER_DIR
        || normalized.starts_with(&format!("{}/", PATCHER_DIR))
}
