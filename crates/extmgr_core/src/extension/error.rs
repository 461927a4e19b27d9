//! Extension manager error taxonomy.

use crate::extension::capability::BoxError;
use crate::extension::manifest::ManifestError;
use crate::extension::package::PackageError;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub type ExtensionResult<T> = Result<T, ExtensionError>;

/// Failures surfaced by load, scan, and teardown operations.
#[derive(Debug)]
pub enum ExtensionError {
    /// A record already exists (or a load is in flight) for this path.
    AlreadyLoaded(PathBuf),
    /// No package file exists at this path.
    NotFound(PathBuf),
    /// The bundle could not be read or unpacked.
    Package { path: PathBuf, source: PackageError },
    /// The bundle has no `extension.json` at its root.
    ManifestMissing(PathBuf),
    /// The manifest could not be interpreted.
    ManifestMalformed { path: PathBuf, source: ManifestError },
    /// The manifest names an entry point the context cannot resolve.
    EntryPointNotFound { path: PathBuf, entry_point: String },
    /// The entry point declares neither supported constructor.
    NoUsableConstructor { path: PathBuf, entry_point: String },
    /// A declared constructor failed while running.
    InstantiationFailure { entry_point: String, source: BoxError },
    /// The extension's `load()` hook failed; the registration was rolled back.
    LoadHookFailure(BoxError),
    /// The extension's `unload()` hook failed during teardown.
    UnloadFailure(BoxError),
    /// A load context could not be released cleanly.
    ContextRelease(String),
}

impl ExtensionError {
    /// Stable machine-readable code used in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyLoaded(_) => "already_loaded",
            Self::NotFound(_) => "not_found",
            Self::Package { .. } => "package_unreadable",
            Self::ManifestMissing(_) => "manifest_missing",
            Self::ManifestMalformed { .. } => "manifest_malformed",
            Self::EntryPointNotFound { .. } => "entry_point_not_found",
            Self::NoUsableConstructor { .. } => "no_usable_constructor",
            Self::InstantiationFailure { .. } => "instantiation_failure",
            Self::LoadHookFailure(_) => "load_hook_failure",
            Self::UnloadFailure(_) => "unload_failure",
            Self::ContextRelease(_) => "context_release_failure",
        }
    }
}

impl Display for ExtensionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyLoaded(path) => {
                write!(f, "extension at path {} already loaded", path.display())
            }
            Self::NotFound(path) => write!(f, "no package file at {}", path.display()),
            Self::Package { path, source } => {
                write!(f, "package {} is unreadable: {source}", path.display())
            }
            Self::ManifestMissing(path) => {
                write!(f, "extension.json not present in {}", path.display())
            }
            Self::ManifestMalformed { path, source } => {
                write!(f, "malformed manifest in {}: {source}", path.display())
            }
            Self::EntryPointNotFound { path, entry_point } => write!(
                f,
                "entry point `{entry_point}` not found in {}",
                path.display()
            ),
            Self::NoUsableConstructor { path, entry_point } => write!(
                f,
                "entry point `{entry_point}` in {} has no usable constructor",
                path.display()
            ),
            Self::InstantiationFailure {
                entry_point,
                source,
            } => write!(f, "failed to instantiate `{entry_point}`: {source}"),
            Self::LoadHookFailure(err) => write!(f, "extension load hook failed: {err}"),
            Self::UnloadFailure(err) => write!(f, "extension unload hook failed: {err}"),
            Self::ContextRelease(details) => {
                write!(f, "failed to release load context: {details}")
            }
        }
    }
}

impl Error for ExtensionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Package { source, .. } => Some(source),
            Self::ManifestMalformed { source, .. } => Some(source),
            Self::InstantiationFailure { source, .. } => Some(source.as_ref()),
            Self::LoadHookFailure(err) => Some(err.as_ref()),
            Self::UnloadFailure(err) => Some(err.as_ref()),
            Self::AlreadyLoaded(_)
            | Self::NotFound(_)
            | Self::ManifestMissing(_)
            | Self::EntryPointNotFound { .. }
            | Self::NoUsableConstructor { .. }
            | Self::ContextRelease(_) => None,
        }
    }
}
