use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::{PatcherError, Result};
use crate::models::{is_directory_entry, DiffSummary, VersionId};
use crate::services::app_data::AppData;
use crate::services::control::PatchControl;
use crate::services::file_patcher::BinaryPatcher;
use crate::services::status::{GeneralStatusReporter, StatusMonitor, StatusWeights};
use crate::services::unarchiver::{unpack_package, Pack1Source, PackageFormat};

/// Moves an installation from `version - 1` to `version` using one diff package.
///
/// Entries are applied as added, then removed, then modified. Each modified file
/// must be registered at `version - 1`; anything else means the installation and
/// the ledger have drifted apart and is reported instead of repaired. Unchanged
/// files are re-registered at `version` last so the ledger names a single version.
pub struct DiffInstaller {
    package: PathBuf,
    version: VersionId,
    summary: DiffSummary,
    patcher: Arc<dyn BinaryPatcher>,
    pack1: Option<Pack1Source>,
    unarchive_status: Option<GeneralStatusReporter>,
    install_status: Option<GeneralStatusReporter>,
}

impl DiffInstaller {
    pub fn new(
        package: &Path,
        version: VersionId,
        summary: DiffSummary,
        patcher: Arc<dyn BinaryPatcher>,
    ) -> Self {
        Self {
            package: package.to_path_buf(),
            version,
            summary,
            patcher,
            pack1: None,
            unarchive_status: None,
            install_status: None,
        }
    }

    /// Needed when the package is pack1; ignored for zip.
    pub fn with_pack1(mut self, source: Pack1Source) -> Self {
        self.pack1 = Some(source);
        self
    }

    pub fn prepare(&mut self, status: &StatusMonitor) {
        self.unarchive_status =
            Some(status.create_general_reporter(StatusWeights::unarchive(self.summary.size)));
        self.install_status =
            Some(status.create_general_reporter(StatusWeights::install_diff(self.summary.size)));
    }

    pub fn install(self, app_data: &mut AppData, control: &PatchControl) -> Result<()> {
        if self.version < 2 {
            return Err(PatcherError::InvalidOperation(format!(
                "no diff can produce version {}",
                self.version
            )));
        }
        if !self.package.is_file() {
            return Err(PatcherError::Installer(format!(
                "diff package {} is missing",
                self.package.display()
            )));
        }
        let format = PackageFormat::from_method(self.summary.compression_method.as_deref())?;
        tracing::info!(
            "installing diff {} -> {}: {} added, {} removed, {} modified",
            self.version - 1,
            self.version,
            self.summary.added_files.len(),
            self.summary.removed_files.len(),
            self.summary.modified_files.len()
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

        let mut progress = InstallProgress {
            done: 0,
            total: (self.summary.added_files.len()
                + self.summary.removed_files.len()
                + self.summary.modified_files.len()
                + self.summary.unchanged_files.len()) as u64,
            reporter: self.install_status.as_ref(),
        };
        self.add_files(app_data, unpacked.path(), control, &mut progress)?;
        self.remove_files(app_data, control, &mut progress)?;
        self.modify_files(app_data, unpacked.path(), control, &mut progress)?;
        self.carry_unchanged_files(app_data, control, &mut progress)?;
        progress.finish();
        tracing::info!("diff to version {} installed", self.version);
        Ok(())
    }

    fn add_files(
        &self,
        app_data: &mut AppData,
        unpacked: &Path,
        control: &PatchControl,
        progress: &mut InstallProgress<'_>,
    ) -> Result<()> {
        for name in &self.summary.added_files {
            control.check()?;
            if is_directory_entry(name) {
                app_data.local.create_directory(name)?;
            } else {
                let source = package_entry(app_data, unpacked, name)?;
                tracing::debug!("adding {}", name);
                app_data.local.create_or_update_file(name, &source)?;
                app_data.metadata.add_or_update_file(name, self.version)?;
            }
            progress.step();
        }
        Ok(())
    }

    fn remove_files(
        &self,
        app_data: &mut AppData,
        control: &PatchControl,
        progress: &mut InstallProgress<'_>,
    ) -> Result<()> {
        let (mut directories, files): (Vec<&String>, Vec<&String>) = self
            .summary
            .removed_files
            .iter()
            .partition(|name| is_directory_entry(name));

        for name in files {
            control.check()?;
            tracing::debug!("removing {}", name);
            app_data.local.delete_file(name)?;
            app_data.metadata.remove_file(name)?;
            progress.step();
        }
        directories.sort_by_key(|name| std::cmp::Reverse(name.matches('/').count()));
        for name in directories {
            control.check()?;
            if app_data.local.directory_exists(name)? {
                if app_data.local.is_directory_empty(name)? {
                    app_data.local.delete_directory(name)?;
                } else {
                    tracing::info!("keeping non-empty directory {}", name);
                }
            }
            progress.step();
        }
        Ok(())
    }

    fn modify_files(
        &self,
        app_data: &mut AppData,
        unpacked: &Path,
        control: &PatchControl,
        progress: &mut InstallProgress<'_>,
    ) -> Result<()> {
        let previous = self.version - 1;
        for name in &self.summary.modified_files {
            control.check()?;
            if is_directory_entry(name) {
                progress.step();
                continue;
            }
            if !app_data.local.file_exists(name)? {
                return Err(PatcherError::Installer(format!(
                    "cannot patch {}: file does not exist",
                    name
                )));
            }
            let registered = app_data.metadata.get_file_version(name);
            if registered != Some(previous) {
                return Err(PatcherError::VersionMismatch {
                    file: name.clone(),
                    expected: previous,
                    actual: registered,
                });
            }

            let delta = package_entry(app_data, unpacked, name)?;
            let output = app_data.temporary.unique_path()?;
            tracing::debug!("patching {}", name);
            self.patcher
                .patch(&app_data.local.file_path(name)?, &delta, output.path())?;
            app_data.local.create_or_update_file(name, output.path())?;
            app_data.metadata.add_or_update_file(name, self.version)?;
            progress.step();
        }
        Ok(())
    }

    fn carry_unchanged_files(
        &self,
        app_data: &mut AppData,
        control: &PatchControl,
        progress: &mut InstallProgress<'_>,
    ) -> Result<()> {
        let previous = self.version - 1;
        for name in &self.summary.unchanged_files {
            control.check()?;
            if !is_directory_entry(name) {
                let registered = app_data.metadata.get_file_version(name);
                if registered == Some(previous) && app_data.local.file_exists(name)? {
                    app_data.metadata.add_or_update_file(name, self.version)?;
                } else {
                    tracing::warn!("unchanged file {} is registered at {:?}, leaving it", name, registered);
                }
            }
            progress.step();
        }
        Ok(())
    }
}

fn package_entry(app_data: &AppData, unpacked: &Path, name: &str) -> Result<PathBuf> {
    app_data.local.file_path(name)?;
    let source = unpacked.join(name);
    if !source.is_file() {
        return Err(PatcherError::Installer(format!(
            "cannot find file {} in diff package",
            name
        )));
    }
    Ok(source)
}

struct InstallProgress<'a> {
    done: u64,
    total: u64,
    reporter: Option<&'a GeneralStatusReporter>,
}

impl InstallProgress<'_> {
    fn step(&mut self) {
        self.done += 1;
        if let Some(reporter) = self.reporter {
            reporter.set_fraction(self.done, self.total);
        }
    }

    fn finish(&self) {
        if let Some(reporter) = self.reporter {
            reporter.set_progress(1.0);
        }
    }
}
