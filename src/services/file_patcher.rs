use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::errors::{PatcherError, Result};
use crate::utils::file::{mmap_read, remove_path};

/// Largest file a delta may rebuild unless configured otherwise.
pub const DEFAULT_OUTPUT_LIMIT: u64 = 32 * 1024 * 1024 * 1024;

/// Rebuilds a file from a basis and a binary delta.
pub trait BinaryPatcher: Send + Sync {
    fn patch(&self, basis: &Path, delta: &Path, output: &Path) -> Result<()>;
}

/// Applies librsync-format deltas. Basis and delta are memory-mapped, and the rebuilt
/// file is streamed to disk and may not grow past the output limit.
#[derive(Clone, Copy, Debug)]
pub struct RsyncPatcher {
    output_limit: u64,
}

impl Default for RsyncPatcher {
    fn default() -> Self {
        Self::with_output_limit(DEFAULT_OUTPUT_LIMIT)
    }
}

impl RsyncPatcher {
    pub fn with_output_limit(output_limit: u64) -> Self {
        Self { output_limit }
    }
}

impl BinaryPatcher for RsyncPatcher {
    fn patch(&self, basis: &Path, delta: &Path, output: &Path) -> Result<()> {
        if !basis.is_file() {
            return Err(PatcherError::Patch(format!(
                "basis file missing: {}",
                basis.display()
            )));
        }
        if !delta.is_file() {
            return Err(PatcherError::Patch(format!(
                "delta file missing: {}",
                delta.display()
            )));
        }
        let basis_map = mmap_read(basis)?;
        let delta_map = mmap_read(delta)?;
        let basis_bytes: &[u8] = basis_map.as_deref().unwrap_or(&[]);
        let delta_bytes: &[u8] = delta_map.as_deref().unwrap_or(&[]);
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let limit = usize::try_from(self.output_limit).unwrap_or(usize::MAX);
        let mut writer = BufWriter::new(File::create(output)?);
        let applied = fast_rsync::apply_limited(basis_bytes, delta_bytes, &mut writer, limit)
            .map_err(|err| {
                PatcherError::Patch(format!("{} + {}: {}", basis.display(), delta.display(), err))
            })
            .and_then(|()| writer.flush().map_err(PatcherError::from));
        if applied.is_err() {
            drop(writer);
            remove_path(output)?;
        }
        applied
    }
}
