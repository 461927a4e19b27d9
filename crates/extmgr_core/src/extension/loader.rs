//! Package-to-instance resolution.
//!
//! # Responsibility
//! - Validate the package path and open its load context.
//! - Resolve the manifest entry point inside that context.
//! - Instantiate it through the ordered constructor policy.
//!
//! # Invariants
//! - Any failure after the context is opened releases the context before
//!   returning; nothing is leaked to the caller.
//! - Constructor failures are wrapped, never swallowed.

use crate::extension::capability::{Extension, HostHandle};
use crate::extension::context::{LoadContext, LoaderOptions};
use crate::extension::entry_point::{ConstructorKind, EntryPointCatalog};
use crate::extension::error::{ExtensionError, ExtensionResult};
use crate::extension::lifecycle::{detach, run_hook};
use crate::extension::manifest::resolve_manifest;
use log::{error, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// An instantiated extension still bound to the context that produced it.
pub struct ResolvedExtension {
    pub instance: Arc<dyn Extension>,
    pub context: LoadContext,
    pub entry_point: String,
    pub constructor: ConstructorKind,
}

/// Turns package paths into extension instances.
#[derive(Debug, Clone, Default)]
pub struct ExtensionLoader {
    host: HostHandle,
    catalog: Arc<EntryPointCatalog>,
    options: LoaderOptions,
}

impl ExtensionLoader {
    pub fn new(host: HostHandle) -> Self {
        Self {
            host,
            catalog: Arc::new(EntryPointCatalog::new()),
            options: LoaderOptions::default(),
        }
    }

    /// Sets the entry points the host ships itself.
    pub fn with_catalog(mut self, catalog: EntryPointCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    pub fn with_options(mut self, options: LoaderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn host(&self) -> &HostHandle {
        &self.host
    }

    /// Resolves and instantiates the extension packaged at `path`.
    ///
    /// # Errors
    /// - `NotFound` when `path` is not an existing file.
    /// - `Package` when the bundle cannot be unpacked or its code opened.
    /// - `ManifestMissing` / `ManifestMalformed` from manifest resolution.
    /// - `EntryPointNotFound`, `NoUsableConstructor`, `InstantiationFailure`.
    pub fn resolve(&self, path: &Path) -> ExtensionResult<ResolvedExtension> {
        let started_at = Instant::now();
        if !path.is_file() {
            return Err(ExtensionError::NotFound(path.to_path_buf()));
        }

        let context = LoadContext::open(path, Arc::clone(&self.catalog), &self.options).map_err(
            |source| ExtensionError::Package {
                path: path.to_path_buf(),
                source,
            },
        )?;

        match self.instantiate(&context) {
            Ok((instance, entry_point, constructor)) => {
                info!(
                    "event=extension_resolve module=loader status=ok context_id={} entry_point={} constructor={} duration_ms={} path={}",
                    context.id(),
                    entry_point,
                    constructor.as_str(),
                    started_at.elapsed().as_millis(),
                    path.display()
                );
                Ok(ResolvedExtension {
                    instance,
                    context,
                    entry_point,
                    constructor,
                })
            }
            Err(err) => {
                error!(
                    "event=extension_resolve module=loader status=error context_id={} error_code={} duration_ms={} error={}",
                    context.id(),
                    err.code(),
                    started_at.elapsed().as_millis(),
                    err
                );
                if let Err(release_err) = context.release() {
                    warn!(
                        "event=context_release module=loader status=error error_code=context_release_failure error={}",
                        release_err
                    );
                }
                Err(err)
            }
        }
    }

    fn instantiate(
        &self,
        context: &LoadContext,
    ) -> ExtensionResult<(Arc<dyn Extension>, String, ConstructorKind)> {
        let path = context.source_path();
        let manifest = resolve_manifest(context)?;
        let entry_point = context
            .resolve_entry_point(&manifest.entry_point)
            .map_err(|source| ExtensionError::Package {
                path: path.to_path_buf(),
                source,
            })?
            .ok_or_else(|| ExtensionError::EntryPointNotFound {
                path: path.to_path_buf(),
                entry_point: manifest.entry_point.clone(),
            })?;

        for kind in ConstructorKind::INSTANTIATION_ORDER {
            if !entry_point.declares(kind) {
                continue;
            }
            let constructed = run_hook("constructor", || {
                entry_point
                    .construct(kind, &self.host)
                    .unwrap_or_else(|| Err("constructor vanished".into()))
            });
            return match constructed {
                Ok(instance) => Ok((instance, manifest.entry_point, kind)),
                Err(source) => Err(ExtensionError::InstantiationFailure {
                    entry_point: manifest.entry_point,
                    source: detach(source),
                }),
            };
        }

        Err(ExtensionError::NoUsableConstructor {
            path: path.to_path_buf(),
            entry_point: manifest.entry_point,
        })
    }
}
