use std::path::{Path, PathBuf};

use crate::errors::{PatcherError, Result};
use crate::models::{is_directory_entry, ContentSummary, VersionId};
use crate::services::app_data::AppData;
use crate::services::control::PatchControl;
use crate::services::status::{GeneralStatusReporter, StatusMonitor, StatusWeights};
use crate::services::unarchiver::{unpack_package, Pack1Source, PackageFormat};

/// Installs a full content package onto an empty installation.
pub struct ContentInstaller {
    package: PathBuf,
    version: VersionId,
    summary: ContentSummary,
    pack1: Option<Pack1Source>,
    unarchive_status: Option<GeneralStatusReporter>,
    copy_status: Option<GeneralStatusReporter>,
}

impl ContentInstaller {
    pub fn new(package: &Path, version: VersionId, summary: ContentSummary) -> Self {
        Self {
            package: package.to_path_buf(),
            version,
            summary,
            pack1: None,
            unarchive_status: None,
            copy_status: None,
        }
    }

    /// Needed when the package is pack1; ignored for zip.
    pub fn with_pack1(mut self, source: Pack1Source) -> Self {
        self.pack1 = Some(source);
        self
    }

    /// Registers this installer's phases with `status` so overall progress accounts
    /// for them before the run starts.
    pub fn prepare(&mut self, status: &StatusMonitor) {
        self.unarchive_status =
            Some(status.create_general_reporter(StatusWeights::unarchive(self.summary.size)));
        let copied = self.summary.uncompressed_size.max(self.summary.total_file_size());
        self.copy_status = Some(status.create_general_reporter(StatusWeights::copy_files(copied)));
    }

    pub fn install(self, app_data: &mut AppData, control: &PatchControl) -> Result<()> {
        if !app_data.metadata.is_empty() {
            return Err(PatcherError::Installer(
                "cannot install content over an existing installation, uninstall first".to_string(),
            ));
        }
        if !self.package.is_file() {
            return Err(PatcherError::Installer(format!(
                "content package {} is missing",
                self.package.display()
            )));
        }
        let format = PackageFormat::from_method(self.summary.compression_method.as_deref())?;
        tracing::info!(
            "installing content of version {} ({} entries)",
            self.version,
            self.summary.files.len()
        );

        let unpacked = app_data.temporary.unique_dir()?;
        unpack_package(
            &self.package,
            format,
            self.pack1.as_ref(),
            unpacked.path(),
            control,
            &|done, total| {
                if let Some(reporter) = self.unarchive_status.as_ref() {
                    reporter.set_fraction(done as u64, total as u64);
                }
            },
        )?;

        let total = self.summary.files.len() as u64;
        for (index, file) in self.summary.files.iter().enumerate() {
            control.check()?;
            if is_directory_entry(&file.path) {
                app_data.local.create_directory(&file.path)?;
            } else {
                // Validates the name before it is used under the unpack directory.
                app_data.local.file_path(&file.path)?;
                let source = unpacked.path().join(&file.path);
                if !source.is_file() {
                    return Err(PatcherError::Installer(format!(
                        "cannot find file {} in content package",
                        file.path
                    )));
                }
                app_data.local.create_or_update_file(&file.path, &source)?;
                app_data.metadata.add_or_update_file(&file.path, self.version)?;
            }
            if let Some(reporter) = self.copy_status.as_ref() {
                reporter.set_fraction(index as u64 + 1, total);
            }
        }
        tracing::info!("content of version {} installed", self.version);
        Ok(())
    }
}
