//! Shared fixtures for extension manager integration tests.

#![allow(dead_code)]

use extmgr_core::{
    BoxError, EntryPoint, EntryPointCatalog, Extension, ExtensionEvents, ExtensionLoader,
    ExtensionManager, HostHandle, LoaderOptions, PackageBuilder,
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Records lifecycle calls made by fixture extensions.
#[derive(Default)]
pub struct Journal {
    entries: Mutex<Vec<String>>,
}

impl Journal {
    pub fn push(&self, entry: String) {
        self.entries.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries.lock().iter().filter(|e| e.as_str() == entry).count()
    }
}

/// Fixture extension that journals its hooks.
pub struct Recorder {
    name: &'static str,
    journal: Arc<Journal>,
    fail_load: bool,
    fail_unload: bool,
}

impl Recorder {
    pub fn hosted(name: &'static str, journal: Arc<Journal>) -> Self {
        Self {
            name,
            journal,
            fail_load: false,
            fail_unload: false,
        }
    }

    pub fn failing_unload(name: &'static str, journal: Arc<Journal>) -> Self {
        Self {
            fail_unload: true,
            ..Self::hosted(name, journal)
        }
    }
}

impl Extension for Recorder {
    fn load(&self) -> Result<(), BoxError> {
        self.journal.push(format!("load:{}", self.name));
        if self.fail_load {
            return Err(format!("{} refuses to load", self.name).into());
        }
        Ok(())
    }

    fn unload(&self) -> Result<(), BoxError> {
        self.journal.push(format!("unload:{}", self.name));
        if self.fail_unload {
            return Err(format!("{} refuses to unload", self.name).into());
        }
        Ok(())
    }
}

fn journal_of(host: &HostHandle) -> Result<Arc<Journal>, BoxError> {
    host.downcast_ref::<Arc<Journal>>()
        .cloned()
        .ok_or_else(|| "host handle does not carry a journal".into())
}

fn alpha(host: HostHandle) -> Result<Arc<dyn Extension>, BoxError> {
    Ok(Arc::new(Recorder::hosted("alpha", journal_of(&host)?)))
}

fn beta(host: HostHandle) -> Result<Arc<dyn Extension>, BoxError> {
    Ok(Arc::new(Recorder::hosted("beta", journal_of(&host)?)))
}

fn gamma(host: HostHandle) -> Result<Arc<dyn Extension>, BoxError> {
    Ok(Arc::new(Recorder::hosted("gamma", journal_of(&host)?)))
}

fn stubborn(host: HostHandle) -> Result<Arc<dyn Extension>, BoxError> {
    Ok(Arc::new(Recorder::failing_unload(
        "stubborn",
        journal_of(&host)?,
    )))
}

fn refuses_load(host: HostHandle) -> Result<Arc<dyn Extension>, BoxError> {
    Ok(Arc::new(Recorder {
        fail_load: true,
        ..Recorder::hosted("refuses_load", journal_of(&host)?)
    }))
}

fn dual_hosted(host: HostHandle) -> Result<Arc<dyn Extension>, BoxError> {
    Ok(Arc::new(Recorder::hosted("dual_hosted", journal_of(&host)?)))
}

fn dual_plain() -> Result<Arc<dyn Extension>, BoxError> {
    Err("no-arg constructor must not be chosen while a host constructor exists".into())
}

fn panics_on_unload() -> Result<Arc<dyn Extension>, BoxError> {
    struct Panicky;

    impl Extension for Panicky {
        fn load(&self) -> Result<(), BoxError> {
            Ok(())
        }

        fn unload(&self) -> Result<(), BoxError> {
            panic!("unload blew up")
        }
    }

    Ok(Arc::new(Panicky))
}

/// Entry points every fixture manager knows about.
pub fn catalog() -> EntryPointCatalog {
    EntryPointCatalog::new()
        .with(EntryPoint::new("demo.Alpha").with_host_constructor(alpha))
        .with(EntryPoint::new("demo.Beta").with_host_constructor(beta))
        .with(EntryPoint::new("demo.Gamma").with_host_constructor(gamma))
        .with(EntryPoint::new("demo.Stubborn").with_host_constructor(stubborn))
        .with(EntryPoint::new("demo.RefusesLoad").with_host_constructor(refuses_load))
        .with(EntryPoint::new("demo.Panicky").with_default_constructor(panics_on_unload))
        .with(
            EntryPoint::new("demo.Dual")
                .with_host_constructor(dual_hosted)
                .with_default_constructor(dual_plain),
        )
        .with(EntryPoint::new("demo.NoConstructor"))
}

/// Event collaborator counting notifications.
#[derive(Default)]
pub struct CountingEvents {
    count: AtomicUsize,
}

impl CountingEvents {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl ExtensionEvents for CountingEvents {
    fn extension_loaded(&self, _extension: &Arc<dyn Extension>) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Manager wired to a journal, a notification counter, and a private
/// scratch directory under `root`.
pub struct Harness {
    pub manager: ExtensionManager,
    pub journal: Arc<Journal>,
    pub events: Arc<CountingEvents>,
    pub scratch: PathBuf,
}

impl Harness {
    pub fn new(root: &Path) -> Self {
        let journal = Arc::new(Journal::default());
        let events = Arc::new(CountingEvents::default());
        let scratch = root.join("scratch");
        let loader = ExtensionLoader::new(HostHandle::new(Arc::clone(&journal)))
            .with_catalog(catalog())
            .with_options(LoaderOptions {
                scratch_dir: Some(scratch.clone()),
            });
        let manager = ExtensionManager::new(loader, events.clone());
        Self {
            manager,
            journal,
            events,
            scratch,
        }
    }

    /// Number of load-context scratch roots currently on disk.
    pub fn live_scratch_roots(&self) -> usize {
        std::fs::read_dir(&self.scratch)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

/// Writes a package whose manifest names `class`.
pub fn write_package(dir: &Path, file_name: &str, class: &str) -> PathBuf {
    let path = dir.join(file_name);
    PackageBuilder::new()
        .entry_point(class)
        .write_to(&path)
        .expect("write package");
    path
}

/// Writes a package with verbatim manifest text.
pub fn write_raw_package(dir: &Path, file_name: &str, manifest: &str) -> PathBuf {
    let path = dir.join(file_name);
    PackageBuilder::new()
        .manifest_json(manifest)
        .write_to(&path)
        .expect("write package");
    path
}
