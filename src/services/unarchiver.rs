use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use crate::errors::{PatcherError, Result};
use crate::services::control::PatchControl;
use crate::services::pack1::{Pack1Meta, Pack1Unarchiver};
use crate::utils::file::is_safe_relative_path;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackageFormat {
    Zip,
    Pack1,
}

impl PackageFormat {
    /// An absent method means zip.
    pub fn from_method(method: Option<&str>) -> Result<Self> {
        match method.map(str::trim) {
            None | Some("") => Ok(PackageFormat::Zip),
            Some(method) if method.eq_ignore_ascii_case("zip") => Ok(PackageFormat::Zip),
            Some(method) if method.eq_ignore_ascii_case("pack1") => Ok(PackageFormat::Pack1),
            Some(other) => Err(PatcherError::Installer(format!(
                "unknown compression method: {}",
                other
            ))),
        }
    }
}

/// Meta file and password of a pack1 package.
#[derive(Clone, Debug)]
pub struct Pack1Source {
    pub meta: PathBuf,
    pub password: String,
}

/// Unpacks `package` into `destination` according to its format.
pub fn unpack_package(
    package: &Path,
    format: PackageFormat,
    pack1: Option<&Pack1Source>,
    destination: &Path,
    control: &PatchControl,
    progress: &dyn Fn(usize, usize),
) -> Result<()> {
    match format {
        PackageFormat::Zip => Unarchiver::new(package, destination).unarchive(control, progress),
        PackageFormat::Pack1 => {
            let source = pack1.ok_or_else(|| {
                PatcherError::Installer(format!(
                    "pack1 package {} needs its meta file",
                    package.display()
                ))
            })?;
            if !source.meta.is_file() {
                return Err(PatcherError::Installer(format!(
                    "package meta {} is missing",
                    source.meta.display()
                )));
            }
            let meta = Pack1Meta::load(&source.meta)?;
            Pack1Unarchiver::new(package, meta, destination, &source.password)?
                .unarchive(control, progress)
        }
    }
}

/// Extracts a zip package into a directory. Single use.
pub struct Unarchiver {
    package: PathBuf,
    destination: PathBuf,
}

impl Unarchiver {
    pub fn new(package: &Path, destination: &Path) -> Self {
        Self {
            package: package.to_path_buf(),
            destination: destination.to_path_buf(),
        }
    }

    /// `progress` receives `(entries_done, entry_count)` after every entry.
    pub fn unarchive(self, control: &PatchControl, progress: &dyn Fn(usize, usize)) -> Result<()> {
        let file = File::open(&self.package)?;
        let mut archive = ZipArchive::new(file)?;
        let count = archive.len();
        std::fs::create_dir_all(&self.destination)?;
        tracing::debug!(
            "unpacking {} entries from {} into {}",
            count,
            self.package.display(),
            self.destination.display()
        );

        for index in 0..count {
            control.check()?;
            let mut entry = archive.by_index(index)?;
            let name = entry.name().replace('\\', "/");
            if name.is_empty() {
                progress(index + 1, count);
                continue;
            }
            let entry_path = Path::new(&name);
            if !is_safe_relative_path(entry_path) {
                tracing::warn!("skipping unsafe archive entry {}", name);
                progress(index + 1, count);
                continue;
            }
            let out_path = self.destination.join(entry_path);
            if entry.is_dir() {
                std::fs::create_dir_all(&out_path)?;
            } else {
                if let Some(parent) = out_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut outfile = File::create(&out_path)?;
                io::copy(&mut entry, &mut outfile)?;
                #[cfg(unix)]
                if let Some(mode) = entry.unix_mode() {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode))?;
                }
            }
            progress(index + 1, count);
        }
        Ok(())
    }
}
