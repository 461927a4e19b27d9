//! Package bundle format.
//!
//! A package is one uncompressed tar archive. Its root holds `extension.json`
//! and any native libraries that carry the extension's compiled code.
//!
//! # Invariants
//! - Unpacking never writes outside the destination directory.

use crate::extension::manifest::{ENTRY_POINT_FIELD, MANIFEST_RESOURCE};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, Header};

/// Bundle read/write errors.
#[derive(Debug)]
pub enum PackageError {
    Io(io::Error),
    /// The archive contains an entry that would land outside its root.
    UnsafeEntry(PathBuf),
    /// A native library in the package could not be opened.
    NativeLibrary { path: PathBuf, details: String },
}

impl Display for PackageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "{err}"),
            Self::UnsafeEntry(path) => {
                write!(f, "archive entry escapes package root: {}", path.display())
            }
            Self::NativeLibrary { path, details } => {
                write!(f, "cannot open native library {}: {details}", path.display())
            }
        }
    }
}

impl Error for PackageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::UnsafeEntry(_) | Self::NativeLibrary { .. } => None,
        }
    }
}

impl From<io::Error> for PackageError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Unpacks the bundle at `package` into `dest` and returns the number of
/// entries written.
pub fn unpack_package(package: &Path, dest: &Path) -> Result<usize, PackageError> {
    let mut archive = Archive::new(File::open(package)?);
    let mut unpacked = 0;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();
        if !entry.unpack_in(dest)? {
            return Err(PackageError::UnsafeEntry(entry_path));
        }
        unpacked += 1;
    }
    Ok(unpacked)
}

/// Returns true when `path` names a native library for the current platform.
pub fn is_native_library(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == std::env::consts::DLL_EXTENSION)
}

enum BundleEntry {
    Bytes { name: String, data: Vec<u8> },
    File { name: String, source: PathBuf },
}

/// Writes package bundles.
#[derive(Default)]
pub struct PackageBuilder {
    entries: Vec<BundleEntry>,
}

impl PackageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a manifest naming `class` as the entry point.
    pub fn entry_point(self, class: &str) -> Self {
        let manifest = serde_json::json!({ ENTRY_POINT_FIELD: class });
        self.manifest_json(manifest.to_string())
    }

    /// Adds raw manifest text verbatim, valid or not.
    pub fn manifest_json(self, raw: impl Into<String>) -> Self {
        self.file(MANIFEST_RESOURCE, raw.into().into_bytes())
    }

    /// Adds an in-memory file at the package root.
    pub fn file(mut self, name: &str, data: impl Into<Vec<u8>>) -> Self {
        self.entries.push(BundleEntry::Bytes {
            name: name.to_string(),
            data: data.into(),
        });
        self
    }

    /// Adds a native library from disk, keeping its file name.
    pub fn native_library(mut self, source: impl AsRef<Path>) -> Self {
        let source = source.as_ref().to_path_buf();
        let name = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.entries.push(BundleEntry::File { name, source });
        self
    }

    /// Writes the bundle to `path`, replacing any existing file.
    pub fn write_to(self, path: impl AsRef<Path>) -> Result<(), PackageError> {
        let mut builder = Builder::new(File::create(path.as_ref())?);
        for entry in self.entries {
            match entry {
                BundleEntry::Bytes { name, data } => {
                    let mut header = Header::new_gnu();
                    header.set_size(data.len() as u64);
                    header.set_mode(0o644);
                    header.set_cksum();
                    builder.append_data(&mut header, name, data.as_slice())?;
                }
                BundleEntry::File { name, source } => {
                    if name.is_empty() {
                        return Err(PackageError::UnsafeEntry(source));
                    }
                    builder.append_path_with_name(&source, name)?;
                }
            }
        }
        builder.into_inner()?;
        Ok(())
    }
}
