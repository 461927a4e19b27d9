//! Process-wide extension registry.
//!
//! # Responsibility
//! - Own the set of load records and their uniqueness rules.
//! - Drive single-package, host-instance, and directory loads.
//! - Hand every record to the lifecycle teardown exactly once.
//!
//! # Invariants
//! - No two records share an instance (pointer identity) or a source path.
//! - A record owns a load context iff it has a source path.
//! - The registry lock is never held while extension code runs.
//! - A record is visible to snapshots only after its `load()` returned.
//! - Records still registered when the manager drops are torn down then.

use crate::extension::capability::{same_instance, Extension, ExtensionEvents};
use crate::extension::context::LoadContext;
use crate::extension::error::{ExtensionError, ExtensionResult};
use crate::extension::lifecycle::{
    detach, invoke_load, release_record, teardown, TeardownReport,
};
use crate::extension::loader::ExtensionLoader;
use crate::extension::package::PackageError;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Registry bookkeeping for one loaded extension.
pub(crate) struct LoadRecord {
    // Field order matters: the instance must drop before its context.
    instance: Arc<dyn Extension>,
    origin: Option<(LoadContext, PathBuf)>,
    /// Set once `load()` returned successfully.
    active: bool,
}

impl LoadRecord {
    fn hosted(instance: Arc<dyn Extension>) -> Self {
        Self {
            instance,
            origin: None,
            active: false,
        }
    }

    fn packaged(instance: Arc<dyn Extension>, context: LoadContext, path: PathBuf) -> Self {
        Self {
            instance,
            origin: Some((context, path)),
            active: false,
        }
    }

    pub(crate) fn instance(&self) -> &Arc<dyn Extension> {
        &self.instance
    }

    pub(crate) fn source_path(&self) -> Option<&Path> {
        self.origin.as_ref().map(|(_, path)| path.as_path())
    }

    pub(crate) fn into_parts(self) -> (Arc<dyn Extension>, Option<(LoadContext, PathBuf)>) {
        (self.instance, self.origin)
    }
}

/// One directory entry that failed to load.
#[derive(Debug)]
pub struct EntryFailure {
    pub path: PathBuf,
    pub error: ExtensionError,
}

/// Outcome of a best-effort directory load.
#[derive(Debug, Default)]
pub struct DirectoryLoadReport {
    pub loaded: Vec<PathBuf>,
    pub failures: Vec<EntryFailure>,
}

#[derive(Default)]
struct RegistryState {
    records: Vec<LoadRecord>,
    in_flight: BTreeSet<PathBuf>,
}

impl RegistryState {
    fn holds_path(&self, path: &Path) -> bool {
        self.in_flight.contains(path)
            || self
                .records
                .iter()
                .any(|record| record.source_path() == Some(path))
    }

    fn active(&self) -> impl Iterator<Item = &LoadRecord> + '_ {
        self.records.iter().filter(|record| record.active)
    }

    fn mark_active(&mut self, instance: &Arc<dyn Extension>) {
        if let Some(record) = self
            .records
            .iter_mut()
            .find(|record| same_instance(&record.instance, instance))
        {
            record.active = true;
        }
    }

    fn take_instance(&mut self, instance: &Arc<dyn Extension>) -> Option<LoadRecord> {
        let index = self
            .records
            .iter()
            .position(|record| same_instance(&record.instance, instance))?;
        Some(self.records.swap_remove(index))
    }
}

/// Extension manager: registry plus loader plus lifecycle coordination.
///
/// Construct once at host start, share as `Arc<ExtensionManager>`, and call
/// [`ExtensionManager::close`] once at host shutdown.
pub struct ExtensionManager {
    loader: ExtensionLoader,
    events: Arc<dyn ExtensionEvents>,
    state: Mutex<RegistryState>,
}

impl ExtensionManager {
    pub fn new(loader: ExtensionLoader, events: Arc<dyn ExtensionEvents>) -> Self {
        Self {
            loader,
            events,
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn loader(&self) -> &ExtensionLoader {
        &self.loader
    }

    /// Registers a host-supplied instance.
    ///
    /// Registering an instance that is already present is a silent no-op.
    /// This includes an instance whose first registration is still inside
    /// `load()`; that call returns `Ok(())` even if the first one later
    /// fails and is rolled back.
    ///
    /// # Errors
    /// - `LoadHookFailure` when the instance's `load()` fails; the
    ///   registration is rolled back.
    pub fn load_extension(&self, instance: Arc<dyn Extension>) -> ExtensionResult<()> {
        {
            let mut state = self.state.lock();
            if state
                .records
                .iter()
                .any(|record| same_instance(&record.instance, &instance))
            {
                debug!("event=extension_load module=registry status=skip mode=instance reason=already_registered");
                return Ok(());
            }
            state.records.push(LoadRecord::hosted(Arc::clone(&instance)));
        }

        self.activate(instance, None).map(|_| ())
    }

    /// Loads the package at `path` and registers the resulting instance.
    ///
    /// # Errors
    /// - `AlreadyLoaded` when the path is registered or being loaded.
    /// - Any loader error; the registry is left unchanged.
    /// - `LoadHookFailure` when `load()` fails; the registration is rolled back.
    pub fn load_extension_from_path(
        &self,
        path: impl AsRef<Path>,
    ) -> ExtensionResult<Arc<dyn Extension>> {
        let key = registry_key(path.as_ref());
        {
            let mut state = self.state.lock();
            if state.holds_path(&key) {
                warn!(
                    "event=extension_load module=registry status=error mode=path error_code=already_loaded path={}",
                    key.display()
                );
                return Err(ExtensionError::AlreadyLoaded(key));
            }
            state.in_flight.insert(key.clone());
        }

        let resolved = self.loader.resolve(&key);
        let mut state = self.state.lock();
        state.in_flight.remove(&key);
        let resolved = match resolved {
            Ok(resolved) => resolved,
            Err(err) => {
                drop(state);
                error!(
                    "event=extension_load module=registry status=error mode=path error_code={} path={} error={}",
                    err.code(),
                    key.display(),
                    err
                );
                return Err(err);
            }
        };

        let instance = Arc::clone(&resolved.instance);
        state.records.push(LoadRecord::packaged(
            resolved.instance,
            resolved.context,
            key.clone(),
        ));
        drop(state);

        self.activate(instance, Some(&key))
    }

    /// Loads every direct entry of `dir`, isolating per-entry failures.
    ///
    /// A missing path or a non-directory yields an empty report.
    pub fn load_extensions_from_directory(&self, dir: impl AsRef<Path>) -> DirectoryLoadReport {
        let dir = dir.as_ref();
        let mut report = DirectoryLoadReport::default();
        if !dir.is_dir() {
            debug!(
                "event=directory_scan module=registry status=skip reason=not_a_directory path={}",
                dir.display()
            );
            return report;
        }

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                error!(
                    "event=directory_scan module=registry status=error error_code=read_dir_failed path={} error={}",
                    dir.display(),
                    err
                );
                report.failures.push(EntryFailure {
                    path: dir.to_path_buf(),
                    error: ExtensionError::Package {
                        path: dir.to_path_buf(),
                        source: PackageError::Io(err),
                    },
                });
                return report;
            }
        };

        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(err) => {
                    report.failures.push(EntryFailure {
                        path: dir.to_path_buf(),
                        error: ExtensionError::Package {
                            path: dir.to_path_buf(),
                            source: PackageError::Io(err),
                        },
                    });
                    continue;
                }
            };

            match self.load_extension_from_path(&path) {
                Ok(_) => report.loaded.push(path),
                Err(error) => report.failures.push(EntryFailure { path, error }),
            }
        }

        info!(
            "event=directory_scan module=registry status=ok path={} loaded={} failed={}",
            dir.display(),
            report.loaded.len(),
            report.failures.len()
        );
        report
    }

    /// Snapshot of the currently registered instances.
    pub fn loaded_extensions(&self) -> Vec<Arc<dyn Extension>> {
        self.state
            .lock()
            .active()
            .map(|record| Arc::clone(&record.instance))
            .collect()
    }

    /// Source paths of every package-backed record.
    pub fn loaded_paths(&self) -> Vec<PathBuf> {
        self.state
            .lock()
            .active()
            .filter_map(|record| record.source_path().map(Path::to_path_buf))
            .collect()
    }

    pub fn is_loaded(&self, path: impl AsRef<Path>) -> bool {
        let key = registry_key(path.as_ref());
        self.state
            .lock()
            .active()
            .any(|record| record.source_path() == Some(key.as_path()))
    }

    /// Number of extensions whose `load()` completed.
    pub fn len(&self) -> usize {
        self.state.lock().active().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unloads every extension and releases every load context.
    ///
    /// Failures are collected in the report; teardown always completes. The
    /// registry is drained, so a later call returns an empty report.
    pub fn close(&self) -> TeardownReport {
        let records = std::mem::take(&mut self.state.lock().records);
        close_records(records)
    }

    /// Runs `load()` and notifies the host, rolling back on failure.
    fn activate(
        &self,
        instance: Arc<dyn Extension>,
        path: Option<&Path>,
    ) -> ExtensionResult<Arc<dyn Extension>> {
        let mode = if path.is_some() { "path" } else { "instance" };
        let path_label = path
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "<host>".to_string());

        if let Err(err) = invoke_load(&instance) {
            let err = detach(err);
            error!(
                "event=extension_load module=registry status=error mode={} error_code=load_hook_failure path={} error={}",
                mode, path_label, err
            );
            let record = self.state.lock().take_instance(&instance);
            drop(instance);
            if let Some(record) = record {
                if let Err(release_err) = release_record(record) {
                    warn!(
                        "event=context_release module=registry status=error error_code={} path={} error={}",
                        release_err.code(),
                        path_label,
                        release_err
                    );
                }
            }
            return Err(ExtensionError::LoadHookFailure(err));
        }

        self.state.lock().mark_active(&instance);
        info!(
            "event=extension_load module=registry status=ok mode={} path={}",
            mode, path_label
        );
        self.events.extension_loaded(&instance);
        Ok(instance)
    }
}

impl Drop for ExtensionManager {
    fn drop(&mut self) {
        let records = std::mem::take(&mut self.state.get_mut().records);
        if records.is_empty() {
            return;
        }
        warn!(
            "event=registry_drop module=registry status=warn reason=close_not_called records={}",
            records.len()
        );
        close_records(records);
    }
}

fn close_records(records: Vec<LoadRecord>) -> TeardownReport {
    info!(
        "event=registry_close module=registry status=start records={}",
        records.len()
    );
    let report = teardown(records);
    info!(
        "event=registry_close module=registry status=ok attempted={} unloaded={} contexts_released={} failed={}",
        report.attempted,
        report.unloaded,
        report.contexts_released,
        report.failures.len()
    );
    report
}

/// Normalizes a package path so the same file is recognized under different
/// spellings. Falls back to the path as given when it cannot be resolved.
fn registry_key(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
