//! Extension capability and host-facing collaborator contracts.
//!
//! # Responsibility
//! - Define the `Extension` lifecycle capability implemented by third parties.
//! - Define the opaque `HostHandle` injected into extension constructors.
//! - Define the `ExtensionEvents` collaborator notified after each load.
//!
//! # Invariants
//! - Extension identity is pointer identity of the shared `Arc` allocation,
//!   never structural equality.

use std::any::Any;
use std::error::Error;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Error type carried across the extension boundary.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Lifecycle capability exposed by every loaded extension.
///
/// Nothing else about an extension's internals is assumed by the manager.
pub trait Extension: Send + Sync {
    /// Called exactly once, right after the extension is registered.
    fn load(&self) -> Result<(), BoxError>;

    /// Called at most once, during teardown.
    fn unload(&self) -> Result<(), BoxError>;
}

/// Returns true when both handles point at the same extension instance.
pub fn same_instance(left: &Arc<dyn Extension>, right: &Arc<dyn Extension>) -> bool {
    // Compare data pointers only; vtable pointers may differ across codegen units.
    std::ptr::eq(
        Arc::as_ptr(left) as *const (),
        Arc::as_ptr(right) as *const (),
    )
}

/// Opaque reference to host-provided services.
///
/// The host decides what lives behind the handle; extensions recover a typed
/// view with [`HostHandle::downcast_ref`].
#[derive(Clone)]
pub struct HostHandle {
    inner: Arc<dyn Any + Send + Sync>,
}

impl HostHandle {
    pub fn new<T: Any + Send + Sync>(services: T) -> Self {
        Self {
            inner: Arc::new(services),
        }
    }

    pub fn from_arc(services: Arc<dyn Any + Send + Sync>) -> Self {
        Self { inner: services }
    }

    /// Returns the host services as `T`, or `None` when the host exposes a
    /// different type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl Default for HostHandle {
    fn default() -> Self {
        Self::new(())
    }
}

impl Debug for HostHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostHandle").finish_non_exhaustive()
    }
}

/// Host event collaborator.
pub trait ExtensionEvents: Send + Sync {
    /// Invoked synchronously once per successful load, after `load()` returned.
    fn extension_loaded(&self, extension: &Arc<dyn Extension>);
}

/// Event sink that drops every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentEvents;

impl ExtensionEvents for SilentEvents {
    fn extension_loaded(&self, _extension: &Arc<dyn Extension>) {}
}
