//! Isolated per-package load contexts.
//!
//! # Responsibility
//! - Unpack one package into a private scratch root.
//! - Serve root resources and resolve entry points scoped to that package.
//! - Release native library handles and scratch files deterministically.
//!
//! # Invariants
//! - One context is built from exactly one package path.
//! - Native libraries are opened from the context's own scratch copy with
//!   local symbol visibility, so no handle or symbol is shared with another
//!   context.
//! - Entry points returned by a context are valid only while the context is
//!   alive; `release` must run after every instance built from it is dropped.

use crate::extension::entry_point::{
    EntryPoint, EntryPointCatalog, EntryPointsExport, ENTRY_POINTS_SYMBOL,
};
use crate::extension::package::{is_native_library, unpack_package, PackageError};
use libloading::Library;
use log::{debug, info, warn};
use once_cell::sync::OnceCell;
use std::fmt::{Display, Formatter};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

const SCRATCH_PREFIX: &str = "extmgr-ctx-";

/// Stable identifier for one load context, used in log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadContextId(Uuid);

impl LoadContextId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for LoadContextId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Options shared by every context a loader opens.
#[derive(Debug, Clone, Default)]
pub struct LoaderOptions {
    /// Parent directory for context scratch roots; system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
}

struct NativeLibrary {
    path: PathBuf,
    entry_points: &'static [EntryPoint],
    library: Library,
}

/// Per-package load scope.
///
/// Dropping a context without [`LoadContext::release`] removes its scratch
/// files but leaves native code mapped, so instances that outlive the context
/// stay callable.
pub struct LoadContext {
    id: LoadContextId,
    source_path: PathBuf,
    root_path: PathBuf,
    // `None` once released.
    root: Option<TempDir>,
    parent: Arc<EntryPointCatalog>,
    libraries: OnceCell<Vec<NativeLibrary>>,
}

impl LoadContext {
    /// Opens a context for the package at `source_path`.
    ///
    /// # Side effects
    /// - Creates a scratch directory and unpacks the bundle into it.
    pub fn open(
        source_path: &Path,
        parent: Arc<EntryPointCatalog>,
        options: &LoaderOptions,
    ) -> Result<Self, PackageError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SCRATCH_PREFIX);
        let root = match &options.scratch_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempdir_in(dir)?
            }
            None => builder.tempdir()?,
        };

        let id = LoadContextId::new();
        match unpack_package(source_path, root.path()) {
            Ok(entries) => {
                debug!(
                    "event=context_open module=context status=ok context_id={} entries={} path={}",
                    id,
                    entries,
                    source_path.display()
                );
            }
            Err(err) => {
                if let Err(cleanup) = root.close() {
                    warn!(
                        "event=context_open module=context status=error error_code=scratch_cleanup_failed error={}",
                        cleanup
                    );
                }
                return Err(err);
            }
        }

        Ok(Self {
            id,
            source_path: source_path.to_path_buf(),
            root_path: root.path().to_path_buf(),
            root: Some(root),
            parent,
            libraries: OnceCell::new(),
        })
    }

    pub fn id(&self) -> LoadContextId {
        self.id
    }

    /// Package path this context was built from.
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Private scratch root holding the unpacked package.
    pub fn root(&self) -> &Path {
        &self.root_path
    }

    /// Reads one resource from the package root.
    ///
    /// Returns `Ok(None)` when the resource does not exist or `name` is not a
    /// plain root-level file name.
    pub fn resource(&self, name: &str) -> Result<Option<Vec<u8>>, PackageError> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => {}
            _ => return Ok(None),
        }

        let path = self.root_path.join(name);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(std::fs::read(path)?))
    }

    /// Resolves an entry point by name, parent catalog first.
    ///
    /// Native libraries are opened on first use and stay open until release.
    pub fn resolve_entry_point(&self, name: &str) -> Result<Option<EntryPoint>, PackageError> {
        if let Some(entry_point) = self.parent.get(name) {
            return Ok(Some(*entry_point));
        }

        let libraries = self
            .libraries
            .get_or_try_init(|| open_native_libraries(self.id, &self.root_path))?;
        Ok(libraries.iter().find_map(|lib| {
            lib.entry_points
                .iter()
                .find(|entry_point| entry_point.name() == name)
                .copied()
        }))
    }

    /// Closes every native library and removes the scratch root.
    ///
    /// Must not run while an instance built from this context is alive.
    pub fn release(mut self) -> Result<(), String> {
        let mut failures = Vec::new();
        for lib in self.take_libraries() {
            if let Err(err) = lib.library.close() {
                failures.push(format!("close {}: {err}", lib.path.display()));
            }
        }
        failures.extend(self.remove_root());
        finish_release(self.id, "closed", failures)
    }

    /// Removes the scratch root but keeps native code mapped for the rest of
    /// the process.
    ///
    /// Used when instances built from this context may still be referenced.
    pub fn release_keeping_code(mut self) -> Result<(), String> {
        self.retain_libraries();
        let failures = self.remove_root().into_iter().collect();
        finish_release(self.id, "retained", failures)
    }

    fn take_libraries(&mut self) -> Vec<NativeLibrary> {
        std::mem::take(&mut self.libraries)
            .into_inner()
            .unwrap_or_default()
    }

    fn retain_libraries(&mut self) {
        for lib in self.take_libraries() {
            std::mem::forget(lib.library);
        }
    }

    fn remove_root(&mut self) -> Option<String> {
        let root = self.root.take()?;
        root.close()
            .err()
            .map(|err| format!("remove scratch root: {err}"))
    }
}

impl Drop for LoadContext {
    fn drop(&mut self) {
        if self.root.is_none() {
            return;
        }
        self.retain_libraries();
        match self.remove_root() {
            None => debug!(
                "event=context_release module=context status=ok context_id={} code=dropped",
                self.id
            ),
            Some(details) => warn!(
                "event=context_release module=context status=error context_id={} code=dropped error={}",
                self.id, details
            ),
        }
    }
}

fn finish_release(id: LoadContextId, code: &str, failures: Vec<String>) -> Result<(), String> {
    if failures.is_empty() {
        info!(
            "event=context_release module=context status=ok context_id={} code={}",
            id, code
        );
        return Ok(());
    }
    let details = failures.join("; ");
    warn!(
        "event=context_release module=context status=error context_id={} code={} error={}",
        id, code, details
    );
    Err(details)
}

fn open_native_libraries(id: LoadContextId, root: &Path) -> Result<Vec<NativeLibrary>, PackageError> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_file() && is_native_library(&path) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut libraries = Vec::with_capacity(paths.len());
    for path in paths {
        // SAFETY: the library comes from the package the host chose to load;
        // running its initializers is the point of loading it.
        let library = unsafe { open_isolated(&path) }.map_err(|err| PackageError::NativeLibrary {
            path: path.clone(),
            details: err.to_string(),
        })?;
        // SAFETY: the symbol is generated by `export_entry_points!` with the
        // `EntryPointsExport` signature. The returned slice lives in the
        // library's static data and is never read after the library closes.
        let entry_points = unsafe {
            match library.get::<EntryPointsExport>(ENTRY_POINTS_SYMBOL.as_bytes()) {
                Ok(export) => export(),
                Err(_) => &[],
            }
        };
        debug!(
            "event=library_open module=context status=ok context_id={} library={} entry_points={}",
            id,
            path.display(),
            entry_points.len()
        );
        libraries.push(NativeLibrary {
            path,
            entry_points,
            library,
        });
    }
    Ok(libraries)
}

#[cfg(unix)]
unsafe fn open_isolated(path: &Path) -> Result<Library, libloading::Error> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_LAZY, RTLD_LOCAL};
    UnixLibrary::open(Some(path), RTLD_LAZY | RTLD_LOCAL).map(Library::from)
}

#[cfg(not(unix))]
unsafe fn open_isolated(path: &Path) -> Result<Library, libloading::Error> {
    Library::new(path)
}

#[cfg(test)]
mod tests {
    use super::{LoadContext, LoaderOptions};
    use crate::extension::entry_point::{EntryPoint, EntryPointCatalog};
    use crate::extension::package::PackageBuilder;
    use std::sync::Arc;

    fn scratch_options(dir: &std::path::Path) -> LoaderOptions {
        LoaderOptions {
            scratch_dir: Some(dir.join("scratch")),
        }
    }

    #[test]
    fn serves_root_resources_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let package = dir.path().join("demo.tar");
        PackageBuilder::new()
            .entry_point("demo.Greeter")
            .write_to(&package)
            .expect("write package");

        let context = LoadContext::open(
            &package,
            Arc::new(EntryPointCatalog::new()),
            &scratch_options(dir.path()),
        )
        .expect("open context");

        assert!(context
            .resource("extension.json")
            .expect("read")
            .is_some());
        assert!(context.resource("missing.json").expect("read").is_none());
        assert!(context.resource("../demo.tar").expect("read").is_none());
        assert!(context.resource("/etc/hostname").expect("read").is_none());
        context.release().expect("release");
    }

    #[test]
    fn contexts_from_same_package_use_separate_roots() {
        let dir = tempfile::tempdir().expect("tempdir");
        let package = dir.path().join("demo.tar");
        PackageBuilder::new()
            .entry_point("demo.Greeter")
            .write_to(&package)
            .expect("write package");
        let catalog = Arc::new(EntryPointCatalog::new());
        let options = scratch_options(dir.path());

        let first = LoadContext::open(&package, catalog.clone(), &options).expect("first");
        let second = LoadContext::open(&package, catalog, &options).expect("second");
        assert_ne!(first.root(), second.root());
        assert_ne!(first.id(), second.id());

        first.release().expect("release first");
        second.release().expect("release second");
    }

    #[test]
    fn resolves_parent_catalog_entries() {
        fn create() -> Result<Arc<dyn crate::Extension>, crate::BoxError> {
            Err("unused".into())
        }

        let dir = tempfile::tempdir().expect("tempdir");
        let package = dir.path().join("demo.tar");
        PackageBuilder::new()
            .entry_point("demo.Shared")
            .write_to(&package)
            .expect("write package");
        let catalog = Arc::new(
            EntryPointCatalog::new()
                .with(EntryPoint::new("demo.Shared").with_default_constructor(create)),
        );

        let context =
            LoadContext::open(&package, catalog, &scratch_options(dir.path())).expect("open");
        let found = context.resolve_entry_point("demo.Shared").expect("resolve");
        assert_eq!(found.map(|entry| entry.name()), Some("demo.Shared"));
        assert!(context
            .resolve_entry_point("demo.Unknown")
            .expect("resolve")
            .is_none());
        context.release().expect("release");
    }

    #[test]
    fn release_removes_scratch_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let package = dir.path().join("demo.tar");
        PackageBuilder::new()
            .entry_point("demo.Greeter")
            .write_to(&package)
            .expect("write package");

        let context = LoadContext::open(
            &package,
            Arc::new(EntryPointCatalog::new()),
            &scratch_options(dir.path()),
        )
        .expect("open context");
        let root = context.root().to_path_buf();
        assert!(root.is_dir());

        context.release().expect("release");
        assert!(!root.exists());
    }

    #[test]
    fn dropping_without_release_still_removes_scratch_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let package = dir.path().join("demo.tar");
        PackageBuilder::new()
            .entry_point("demo.Greeter")
            .write_to(&package)
            .expect("write package");

        let context = LoadContext::open(
            &package,
            Arc::new(EntryPointCatalog::new()),
            &scratch_options(dir.path()),
        )
        .expect("open context");
        let root = context.root().to_path_buf();

        drop(context);
        assert!(!root.exists());
    }

    #[test]
    fn failed_unpack_leaves_no_scratch_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let package = dir.path().join("broken.tar");
        std::fs::write(&package, vec![0x7f; 1024]).expect("write garbage");
        let options = scratch_options(dir.path());

        let result = LoadContext::open(&package, Arc::new(EntryPointCatalog::new()), &options);
        assert!(result.is_err());
        let leftovers = std::fs::read_dir(dir.path().join("scratch"))
            .expect("scratch dir exists")
            .count();
        assert_eq!(leftovers, 0);
    }
}
