use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{PatcherError, Result};
use crate::models::VersionId;
use crate::services::control::PatchControl;
use crate::utils::byte_range::ByteRange;
use crate::utils::file::is_safe_relative_path;

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const PACK1_MAGIC: [u8; 9] = [0x50, 0x61, 0x63, 0x6B, 0x31, 0x01, 0x02, 0x03, 0x04];
const BLOCK_SIZE: usize = 16;
const DECRYPT_BUFFER: usize = 64 * 1024;
const PASSWORD_PREFIX: &str = "\x08\x07\x18\x24";

/// Password a published package of `version` is encrypted with.
pub fn resource_password(app_secret: &str, version: VersionId) -> String {
    let seed = format!("{}{}", app_secret, version);
    format!("{}{}", PASSWORD_PREFIX, STANDARD.encode(seed.as_bytes()))
}

fn derive_key(password: &str) -> [u8; 32] {
    let digest = Sha256::digest(password.as_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Pack1EntryKind {
    Regular,
    Directory,
    Symlink,
    #[serde(other)]
    Unknown,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Pack1Entry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: Pack1EntryKind,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub size: Option<u64>,
}

impl Pack1Entry {
    /// Bytes of the package holding this entry's encrypted payload.
    pub fn byte_range(&self) -> Result<ByteRange> {
        let (Some(offset), Some(size)) = (self.offset, self.size) else {
            return Err(PatcherError::Archive(format!(
                "entry {} has no offset or size",
                self.name
            )));
        };
        if size == 0 {
            return Err(PatcherError::Archive(format!("entry {} is empty", self.name)));
        }
        let end = offset.checked_add(size - 1).ok_or_else(|| {
            PatcherError::Archive(format!("entry {} lies outside the package", self.name))
        })?;
        ByteRange::bounded(offset, end)
    }

    /// Permission bits; the first three characters of `mode` carry the file type.
    pub fn unix_mode(&self) -> Option<u32> {
        let mode = self.mode.as_deref()?;
        u32::from_str_radix(mode.get(3..)?, 8).ok()
    }
}

/// File index published next to a pack1 package.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Pack1Meta {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub encryption: Option<String>,
    pub iv: String,
    #[serde(default)]
    pub files: Vec<Pack1Entry>,
}

impl Pack1Meta {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path).map_err(|err| {
            PatcherError::Installer(format!("cannot read package meta {}: {}", path.display(), err))
        })?;
        Self::parse(&raw)
    }

    pub fn entry(&self, name: &str) -> Option<&Pack1Entry> {
        self.files.iter().find(|entry| entry.name == name)
    }

    fn iv(&self) -> Result<[u8; BLOCK_SIZE]> {
        let raw = STANDARD
            .decode(self.iv.trim())
            .map_err(|err| PatcherError::Archive(format!("bad package iv: {}", err)))?;
        raw.as_slice()
            .try_into()
            .map_err(|_| PatcherError::Archive(format!("package iv has {} bytes", raw.len())))
    }
}

/// Decrypts AES-256-CBC without padding, one buffer of whole blocks at a time.
struct DecryptingReader<R> {
    inner: R,
    cipher: Aes256CbcDec,
    buffer: Vec<u8>,
    position: usize,
}

impl<R: Read> DecryptingReader<R> {
    fn new(inner: R, cipher: Aes256CbcDec) -> Self {
        Self {
            inner,
            cipher,
            buffer: Vec::new(),
            position: 0,
        }
    }

    fn refill(&mut self) -> io::Result<()> {
        self.buffer.resize(DECRYPT_BUFFER, 0);
        let mut filled = 0;
        while filled < self.buffer.len() {
            let read = self.inner.read(&mut self.buffer[filled..])?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        if filled % BLOCK_SIZE != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "encrypted payload is not a whole number of blocks",
            ));
        }
        self.buffer.truncate(filled);
        for block in self.buffer.chunks_exact_mut(BLOCK_SIZE) {
            self.cipher.decrypt_block_mut(aes::Block::from_mut_slice(block));
        }
        self.position = 0;
        Ok(())
    }
}

impl<R: Read> Read for DecryptingReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.position == self.buffer.len() {
            self.refill()?;
            if self.buffer.is_empty() {
                return Ok(0);
            }
        }
        let count = out.len().min(self.buffer.len() - self.position);
        out[..count].copy_from_slice(&self.buffer[self.position..self.position + count]);
        self.position += count;
        Ok(count)
    }
}

/// Unpacks pack1 packages: every regular entry is an AES-256-CBC encrypted gzip
/// stream at a known offset.
pub struct Pack1Unarchiver {
    package: PathBuf,
    meta: Pack1Meta,
    destination: PathBuf,
    key: [u8; 32],
    iv: [u8; BLOCK_SIZE],
    range: Option<ByteRange>,
}

impl Pack1Unarchiver {
    pub fn new(package: &Path, meta: Pack1Meta, destination: &Path, password: &str) -> Result<Self> {
        let iv = meta.iv()?;
        Ok(Self {
            package: package.to_path_buf(),
            meta,
            destination: destination.to_path_buf(),
            key: derive_key(password),
            iv,
            range: None,
        })
    }

    /// The package file holds only `range` of the published package.
    pub fn with_range(mut self, range: ByteRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn meta(&self) -> &Pack1Meta {
        &self.meta
    }

    pub fn unarchive(&self, control: &PatchControl, progress: &dyn Fn(usize, usize)) -> Result<()> {
        self.check_magic()?;
        std::fs::create_dir_all(&self.destination)?;
        let count = self.meta.files.len();
        tracing::debug!(
            "unpacking {} pack1 entries from {} into {}",
            count,
            self.package.display(),
            self.destination.display()
        );
        for (index, entry) in self.meta.files.iter().enumerate() {
            control.check()?;
            if !is_safe_relative_path(Path::new(&entry.name)) {
                tracing::warn!("skipping unsafe archive entry {}", entry.name);
                progress(index + 1, count);
                continue;
            }
            let output = self.destination.join(&entry.name);
            match entry.kind {
                Pack1EntryKind::Regular => self.unpack_regular(entry, &output)?,
                Pack1EntryKind::Directory => std::fs::create_dir_all(&output)?,
                Pack1EntryKind::Symlink => {
                    tracing::debug!("skipping symlink {} -> {:?}", entry.name, entry.target);
                }
                Pack1EntryKind::Unknown => {
                    tracing::warn!("unknown entry type for {}", entry.name);
                }
            }
            progress(index + 1, count);
        }
        Ok(())
    }

    /// Decrypts one regular entry into `output`.
    pub fn unarchive_entry(&self, entry: &Pack1Entry, output: &Path, control: &PatchControl) -> Result<()> {
        control.check()?;
        if entry.kind != Pack1EntryKind::Regular {
            return Err(PatcherError::InvalidOperation(format!(
                "{} is not a regular file",
                entry.name
            )));
        }
        self.unpack_regular(entry, output)
    }

    fn check_magic(&self) -> Result<()> {
        if self.range.is_some_and(|range| range.start() > 0) {
            return Ok(());
        }
        let mut magic = [0u8; PACK1_MAGIC.len()];
        let mut file = File::open(&self.package)?;
        if file.read_exact(&mut magic).is_err() || magic != PACK1_MAGIC {
            return Err(PatcherError::Archive(format!(
                "{} is not a pack1 package",
                self.package.display()
            )));
        }
        Ok(())
    }

    /// Offset of the entry's payload inside the local package file.
    fn local_offset(&self, entry: &Pack1Entry) -> Result<u64> {
        let entry_range = entry.byte_range()?;
        match self.range {
            None => Ok(entry_range.start()),
            Some(range) => {
                if !entry_range.is_contained_in(&range) {
                    return Err(PatcherError::Archive(format!(
                        "entry {} ({}) is outside the downloaded {}",
                        entry.name, entry_range, range
                    )));
                }
                Ok(entry_range.localize_to(&range)?.start())
            }
        }
    }

    fn unpack_regular(&self, entry: &Pack1Entry, output: &Path) -> Result<()> {
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if entry.size == Some(0) {
            File::create(output)?;
            return self.apply_mode(entry, output);
        }
        let size = entry.size.unwrap_or(0);
        if size % BLOCK_SIZE as u64 != 0 {
            return Err(PatcherError::Archive(format!(
                "entry {} is not a whole number of cipher blocks",
                entry.name
            )));
        }

        let mut file = File::open(&self.package)?;
        file.seek(SeekFrom::Start(self.local_offset(entry)?))?;
        let cipher = Aes256CbcDec::new_from_slices(&self.key, &self.iv)
            .map_err(|err| PatcherError::Archive(format!("cipher setup failed: {}", err)))?;
        let decrypted = DecryptingReader::new(BufReader::new(file).take(size), cipher);
        let mut gzip = GzDecoder::new(decrypted);
        let mut writer = BufWriter::new(File::create(output)?);
        io::copy(&mut gzip, &mut writer)
            .map_err(|err| PatcherError::Archive(format!("cannot unpack {}: {}", entry.name, err)))?;
        writer.flush()?;
        self.apply_mode(entry, output)
    }

    #[cfg(unix)]
    fn apply_mode(&self, entry: &Pack1Entry, output: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        if let Some(mode) = entry.unix_mode() {
            std::fs::set_permissions(output, std::fs::Permissions::from_mode(mode))?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn apply_mode(&self, _entry: &Pack1Entry, _output: &Path) -> Result<()> {
        Ok(())
    }
}
