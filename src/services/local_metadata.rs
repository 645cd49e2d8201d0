use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::models::VersionId;
use crate::utils::file::write_atomic;

const SCHEMA_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Debug, Default)]
struct LedgerFile {
    #[serde(default)]
    version: Option<u32>,
    #[serde(rename = "_fileVersions", default)]
    file_versions: BTreeMap<String, VersionId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstalledState {
    NotInstalled,
    Installed(VersionId),
    /// Files were registered at different versions.
    Inconsistent,
}

/// Ledger of which version each installed file belongs to. Every mutation is
/// persisted before the call returns.
#[derive(Debug)]
pub struct LocalMetaData {
    path: PathBuf,
    file_versions: BTreeMap<String, VersionId>,
}

impl LocalMetaData {
    /// Loads the ledger. A missing or unreadable ledger starts out empty.
    pub fn load(path: &Path) -> Self {
        let file_versions = match std::fs::read(path) {
            Ok(raw) => match serde_json::from_slice::<LedgerFile>(&raw) {
                Ok(ledger) => ledger.file_versions,
                Err(err) => {
                    tracing::warn!("ledger {} is unreadable, starting empty: {}", path.display(), err);
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                tracing::warn!("failed to read ledger {}: {}", path.display(), err);
                BTreeMap::new()
            }
        };
        Self {
            path: path.to_path_buf(),
            file_versions,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get_file_names(&self) -> Vec<String> {
        self.file_versions.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.file_versions.is_empty()
    }

    pub fn add_or_update_file(&mut self, name: &str, version: VersionId) -> Result<()> {
        let mut staged = self.file_versions.clone();
        staged.insert(name.to_string(), version);
        self.commit(staged)
    }

    pub fn remove_file(&mut self, name: &str) -> Result<()> {
        if !self.file_versions.contains_key(name) {
            return Ok(());
        }
        let mut staged = self.file_versions.clone();
        staged.remove(name);
        self.commit(staged)
    }

    pub fn file_exists(&self, name: &str) -> bool {
        self.file_versions.contains_key(name)
    }

    pub fn get_file_version(&self, name: &str) -> Option<VersionId> {
        self.file_versions.get(name).copied()
    }

    pub fn installed_state(&self) -> InstalledState {
        let mut versions = self.file_versions.values();
        let Some(first) = versions.next().copied() else {
            return InstalledState::NotInstalled;
        };
        if versions.all(|version| *version == first) {
            InstalledState::Installed(first)
        } else {
            InstalledState::Inconsistent
        }
    }

    /// Memory only takes `staged` once it is on disk.
    fn commit(&mut self, staged: BTreeMap<String, VersionId>) -> Result<()> {
        let ledger = LedgerFile {
            version: Some(SCHEMA_VERSION),
            file_versions: staged,
        };
        let payload = serde_json::to_vec_pretty(&ledger)?;
        write_atomic(&self.path, &payload)?;
        self.file_versions = ledger.file_versions;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ledger_path() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("otoshi-patcher-ledger-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create temp directory");
        dir.join("patcher_cache.json")
    }

    #[test]
    fn mutations_are_persisted_immediately() {
        let path = ledger_path();
        let mut ledger = LocalMetaData::load(&path);
        assert_eq!(ledger.installed_state(), InstalledState::NotInstalled);

        ledger.add_or_update_file("bin/app", 3).expect("add");
        ledger.add_or_update_file("data/a.pak", 3).expect("add");
        let reloaded = LocalMetaData::load(&path);
        assert_eq!(reloaded.get_file_version("bin/app"), Some(3));
        assert_eq!(reloaded.installed_state(), InstalledState::Installed(3));

        ledger.add_or_update_file("bin/app", 4).expect("update");
        assert_eq!(LocalMetaData::load(&path).installed_state(), InstalledState::Inconsistent);

        ledger.remove_file("bin/app").expect("remove");
        ledger.remove_file("data/a.pak").expect("remove");
        assert!(LocalMetaData::load(&path).is_empty());
    }

    #[test]
    fn reads_existing_ledger_format() {
        let path = ledger_path();
        std::fs::write(&path, r#"{"_fileVersions": {"game.exe": 7, "data/": 7}}"#)
            .expect("write ledger");
        let ledger = LocalMetaData::load(&path);
        assert_eq!(ledger.get_file_names(), vec!["data/".to_string(), "game.exe".to_string()]);
        assert_eq!(ledger.get_file_version("game.exe"), Some(7));
        assert!(!ledger.file_exists("missing"));
    }

    #[test]
    fn corrupt_ledger_starts_empty() {
        let path = ledger_path();
        std::fs::write(&path, b"{not json").expect("write ledger");
        assert!(LocalMetaData::load(&path).is_empty());
    }

    #[test]
    fn failed_save_leaves_memory_unchanged() {
        let path = ledger_path();
        let mut ledger = LocalMetaData::load(&path);
        ledger.add_or_update_file("bin/app", 3).expect("add");

        // A directory in place of the ledger file makes every save fail.
        std::fs::remove_file(&path).expect("remove ledger");
        std::fs::create_dir_all(&path).expect("block ledger path");

        assert!(ledger.add_or_update_file("bin/app", 4).is_err());
        assert!(ledger.add_or_update_file("bin/other", 4).is_err());
        assert!(ledger.remove_file("bin/app").is_err());
        assert_eq!(ledger.get_file_version("bin/app"), Some(3));
        assert!(!ledger.file_exists("bin/other"));
        assert_eq!(ledger.installed_state(), InstalledState::Installed(3));
    }
}
