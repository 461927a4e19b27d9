//! Entry-point declarations and constructor selection.
//!
//! # Responsibility
//! - Describe an entry-point type by name plus the constructors it offers.
//! - Fix the order used when instantiating an entry point.
//! - Provide the host-side catalog and the native export ABI.
//!
//! # Invariants
//! - `INSTANTIATION_ORDER` is tried front to back; the first declared
//!   constructor wins.
//! - Entry-point names are unique within one catalog.

use crate::extension::capability::{BoxError, Extension, HostHandle};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Symbol exported by native libraries that carry entry points.
pub const ENTRY_POINTS_SYMBOL: &str = "__extmgr_entry_points";

/// Constructor receiving the host handle.
pub type HostConstructor = fn(HostHandle) -> Result<Arc<dyn Extension>, BoxError>;
/// Constructor receiving nothing.
pub type DefaultConstructor = fn() -> Result<Arc<dyn Extension>, BoxError>;
/// Signature of the function behind [`ENTRY_POINTS_SYMBOL`].
pub type EntryPointsExport = fn() -> &'static [EntryPoint];

/// Constructor shapes an entry point can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstructorKind {
    WithHost,
    NoArgs,
}

impl ConstructorKind {
    /// Marker order used during instantiation.
    pub const INSTANTIATION_ORDER: [ConstructorKind; 2] =
        [ConstructorKind::WithHost, ConstructorKind::NoArgs];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::WithHost => "with_host",
            Self::NoArgs => "no_args",
        }
    }
}

/// Declared entry-point type.
#[derive(Debug, Clone, Copy)]
pub struct EntryPoint {
    name: &'static str,
    with_host: Option<HostConstructor>,
    no_args: Option<DefaultConstructor>,
}

impl EntryPoint {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            with_host: None,
            no_args: None,
        }
    }

    pub const fn with_host_constructor(mut self, constructor: HostConstructor) -> Self {
        self.with_host = Some(constructor);
        self
    }

    pub const fn with_default_constructor(mut self, constructor: DefaultConstructor) -> Self {
        self.no_args = Some(constructor);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns true when a constructor of `kind` is declared.
    pub fn declares(&self, kind: ConstructorKind) -> bool {
        match kind {
            ConstructorKind::WithHost => self.with_host.is_some(),
            ConstructorKind::NoArgs => self.no_args.is_some(),
        }
    }

    /// Runs the constructor of `kind`. Returns `None` when it is not declared.
    pub fn construct(
        &self,
        kind: ConstructorKind,
        host: &HostHandle,
    ) -> Option<Result<Arc<dyn Extension>, BoxError>> {
        match kind {
            ConstructorKind::WithHost => self.with_host.map(|ctor| ctor(host.clone())),
            ConstructorKind::NoArgs => self.no_args.map(|ctor| ctor()),
        }
    }
}

/// Entry points shipped by the host itself.
///
/// Load contexts consult this catalog before their own package, the same way
/// a child scope sees its parent's types.
#[derive(Debug, Clone, Default)]
pub struct EntryPointCatalog {
    entries: BTreeMap<&'static str, EntryPoint>,
}

impl EntryPointCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one entry point, replacing a previous one with the same name.
    pub fn register(&mut self, entry_point: EntryPoint) -> Option<EntryPoint> {
        self.entries.insert(entry_point.name, entry_point)
    }

    pub fn with(mut self, entry_point: EntryPoint) -> Self {
        self.register(entry_point);
        self
    }

    pub fn get(&self, name: &str) -> Option<&EntryPoint> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Exports entry points from a native extension library.
///
/// ```ignore
/// extmgr_core::export_entry_points![
///     EntryPoint::new("demo.Greeter").with_default_constructor(Greeter::create),
/// ];
/// ```
///
/// The library must be built with the same toolchain as the host.
#[macro_export]
macro_rules! export_entry_points {
    ($($entry:expr),* $(,)?) => {
        #[no_mangle]
        pub fn __extmgr_entry_points() -> &'static [$crate::EntryPoint] {
            static ENTRY_POINTS: &[$crate::EntryPoint] = &[$($entry),*];
            ENTRY_POINTS
        }
    };
}

#[cfg(test)]
mod tests {
    use super::{ConstructorKind, EntryPoint, EntryPointCatalog};
    use crate::extension::capability::{BoxError, Extension, HostHandle};
    use std::sync::Arc;

    struct Marker;

    impl Extension for Marker {
        fn load(&self) -> Result<(), BoxError> {
            Ok(())
        }

        fn unload(&self) -> Result<(), BoxError> {
            Ok(())
        }
    }

    fn with_host(host: HostHandle) -> Result<Arc<dyn Extension>, BoxError> {
        host.downcast_ref::<u32>().ok_or("host handle is not u32")?;
        Ok(Arc::new(Marker))
    }

    fn no_args() -> Result<Arc<dyn Extension>, BoxError> {
        Ok(Arc::new(Marker))
    }

    #[test]
    fn host_constructor_is_tried_first() {
        assert_eq!(
            ConstructorKind::INSTANTIATION_ORDER,
            [ConstructorKind::WithHost, ConstructorKind::NoArgs]
        );
    }

    #[test]
    fn construct_reports_undeclared_kinds_as_none() {
        let entry = EntryPoint::new("demo.Marker").with_default_constructor(no_args);
        let host = HostHandle::default();
        assert!(!entry.declares(ConstructorKind::WithHost));
        assert!(entry.construct(ConstructorKind::WithHost, &host).is_none());
        assert!(entry
            .construct(ConstructorKind::NoArgs, &host)
            .expect("declared")
            .is_ok());
    }

    #[test]
    fn host_constructor_receives_handle() {
        let entry = EntryPoint::new("demo.Marker").with_host_constructor(with_host);
        let ok = entry.construct(ConstructorKind::WithHost, &HostHandle::new(7_u32));
        assert!(ok.expect("declared").is_ok());
        let err = entry.construct(ConstructorKind::WithHost, &HostHandle::default());
        assert!(err.expect("declared").is_err());
    }

    #[test]
    fn catalog_replaces_same_name() {
        let mut catalog = EntryPointCatalog::new();
        assert!(catalog
            .register(EntryPoint::new("demo.Marker").with_default_constructor(no_args))
            .is_none());
        let previous =
            catalog.register(EntryPoint::new("demo.Marker").with_host_constructor(with_host));
        assert!(previous.is_some());
        assert_eq!(catalog.len(), 1);
        let current = catalog.get("demo.Marker").expect("registered");
        assert!(current.declares(ConstructorKind::WithHost));
        assert!(!current.declares(ConstructorKind::NoArgs));
    }
}
