use crate::errors::Result;
use crate::models::{is_directory_entry, ContentSummary, VersionId};
use crate::services::app_data::AppData;
use crate::services::control::PatchControl;
use crate::services::status::GeneralStatusReporter;
use crate::utils::hashing::{hash_file, hashes_match};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileIntegrityStatus {
    Ok,
    MissingData,
    MissingMetaData,
    InvalidVersion,
    InvalidSize,
    InvalidHash,
}

#[derive(Clone, Debug)]
pub struct FileIntegrity {
    pub path: String,
    pub status: FileIntegrityStatus,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct IntegrityOptions {
    pub check_sizes: bool,
    pub check_hashes: bool,
}

#[derive(Clone, Debug, Default)]
pub struct VersionIntegrity {
    pub files: Vec<FileIntegrity>,
}

impl VersionIntegrity {
    pub fn is_ok(&self) -> bool {
        self.files
            .iter()
            .all(|file| file.status == FileIntegrityStatus::Ok)
    }

    pub fn count(&self, status: FileIntegrityStatus) -> usize {
        self.files.iter().filter(|file| file.status == status).count()
    }

    pub fn failures(&self, limit: usize) -> Vec<&FileIntegrity> {
        self.files
            .iter()
            .filter(|file| file.status != FileIntegrityStatus::Ok)
            .take(limit)
            .collect()
    }
}

/// Compares what is on disk and in the ledger with the file list of `version`.
pub fn check_version_integrity(
    version: VersionId,
    summary: &ContentSummary,
    app_data: &AppData,
    options: IntegrityOptions,
    control: &PatchControl,
    reporter: Option<&GeneralStatusReporter>,
) -> Result<VersionIntegrity> {
    let total = summary.files.len() as u64;
    let mut results = Vec::with_capacity(summary.files.len());
    for (index, file) in summary.files.iter().enumerate() {
        control.check()?;
        let status = if is_directory_entry(&file.path) {
            if app_data.local.directory_exists(&file.path)? {
                FileIntegrityStatus::Ok
            } else {
                FileIntegrityStatus::MissingData
            }
        } else {
            check_file(version, file, app_data, options)?
        };
        if status != FileIntegrityStatus::Ok {
            tracing::debug!("integrity of {}: {:?}", file.path, status);
        }
        results.push(FileIntegrity {
            path: file.path.clone(),
            status,
        });
        if let Some(reporter) = reporter {
            reporter.set_fraction(index as u64 + 1, total);
        }
    }

    let integrity = VersionIntegrity { files: results };
    tracing::info!(
        "integrity of version {}: {} files, {} missing, {} unregistered, {} outdated, {} damaged",
        version,
        integrity.files.len(),
        integrity.count(FileIntegrityStatus::MissingData),
        integrity.count(FileIntegrityStatus::MissingMetaData),
        integrity.count(FileIntegrityStatus::InvalidVersion),
        integrity.count(FileIntegrityStatus::InvalidSize) + integrity.count(FileIntegrityStatus::InvalidHash)
    );
    Ok(integrity)
}

fn check_file(
    version: VersionId,
    file: &crate::models::ContentFile,
    app_data: &AppData,
    options: IntegrityOptions,
) -> Result<FileIntegrityStatus> {
    if !app_data.local.file_exists(&file.path)? {
        return Ok(FileIntegrityStatus::MissingData);
    }
    if !app_data.metadata.file_exists(&file.path) {
        return Ok(FileIntegrityStatus::MissingMetaData);
    }
    if app_data.metadata.get_file_version(&file.path) != Some(version) {
        return Ok(FileIntegrityStatus::InvalidVersion);
    }
    if options.check_sizes {
        if let Some(expected) = file.size {
            if app_data.local.file_size(&file.path)? != expected {
                return Ok(FileIntegrityStatus::InvalidSize);
            }
        }
    }
    if options.check_hashes {
        if let Some(expected) = file.hash.as_deref() {
            let actual = hash_file(&app_data.local.file_path(&file.path)?)?;
            if !hashes_match(&actual, expected) {
                return Ok(FileIntegrityStatus::InvalidHash);
            }
        }
    }
    Ok(FileIntegrityStatus::Ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentFile;
    use crate::utils::hashing::hash_bytes;
    use uuid::Uuid;

    fn app_data() -> AppData {
        let root = std::env::temp_dir().join(format!("otoshi-patcher-integrity-{}", Uuid::new_v4()));
        AppData::open(&root).expect("open app data")
    }

    fn summary(paths: &[(&str, &[u8])]) -> ContentSummary {
        ContentSummary {
            size: 1,
            files: paths
                .iter()
                .map(|(path, bytes)| ContentFile {
                    path: path.to_string(),
                    hash: Some(hash_bytes(bytes)),
                    size: Some(bytes.len() as u64),
                })
                .collect(),
            ..Default::default()
        }
    }

    fn place(app_data: &mut AppData, name: &str, bytes: &[u8], version: Option<VersionId>) {
        let path = app_data.local.file_path(name).expect("path");
        std::fs::create_dir_all(path.parent().expect("parent")).expect("create parent");
        std::fs::write(&path, bytes).expect("write file");
        if let Some(version) = version {
            app_data.metadata.add_or_update_file(name, version).expect("register");
        }
    }

    #[test]
    fn classifies_each_file() {
        let mut data = app_data();
        place(&mut data, "ok.bin", b"ok", Some(2));
        place(&mut data, "unregistered.bin", b"u", None);
        place(&mut data, "old.bin", b"o", Some(1));
        let summary = summary(&[
            ("ok.bin", b"ok"),
            ("missing.bin", b"m"),
            ("unregistered.bin", b"u"),
            ("old.bin", b"o"),
        ]);

        let integrity = check_version_integrity(
            2,
            &summary,
            &data,
            IntegrityOptions::default(),
            &PatchControl::new(),
            None,
        )
        .expect("check");
        let statuses: Vec<_> = integrity.files.iter().map(|file| file.status).collect();
        assert_eq!(
            statuses,
            vec![
                FileIntegrityStatus::Ok,
                FileIntegrityStatus::MissingData,
                FileIntegrityStatus::MissingMetaData,
                FileIntegrityStatus::InvalidVersion,
            ]
        );
        assert!(!integrity.is_ok());
        assert_eq!(integrity.failures(10).len(), 3);
    }

    #[test]
    fn optional_size_and_hash_checks() {
        let mut data = app_data();
        place(&mut data, "a.bin", b"tampered", Some(1));
        let summary = summary(&[("a.bin", b"original")]);
        let control = PatchControl::new();

        let relaxed = check_version_integrity(1, &summary, &data, IntegrityOptions::default(), &control, None)
            .expect("check");
        assert!(relaxed.is_ok());

        let strict = IntegrityOptions {
            check_sizes: true,
            check_hashes: true,
        };
        let checked = check_version_integrity(1, &summary, &data, strict, &control, None).expect("check");
        assert_eq!(checked.files[0].status, FileIntegrityStatus::InvalidHash);
    }
}
