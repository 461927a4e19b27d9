//! Extension host runtime.
//! Loads packaged extensions into isolated contexts and tears them down
//! safely at shutdown.

pub mod config;
pub mod extension;
pub mod logging;

pub use config::{ConfigError, HostConfig, LoggingConfig};
pub use extension::capability::{
    same_instance, BoxError, Extension, ExtensionEvents, HostHandle, SilentEvents,
};
pub use extension::context::{LoadContext, LoadContextId, LoaderOptions};
pub use extension::entry_point::{
    ConstructorKind, DefaultConstructor, EntryPoint, EntryPointCatalog, HostConstructor,
    ENTRY_POINTS_SYMBOL,
};
pub use extension::error::{ExtensionError, ExtensionResult};
pub use extension::kernel::{DirectoryLoadReport, EntryFailure, ExtensionManager};
pub use extension::lifecycle::{TeardownFailure, TeardownReport};
pub use extension::loader::{ExtensionLoader, ResolvedExtension};
pub use extension::manifest::{Manifest, ManifestError, MANIFEST_RESOURCE};
pub use extension::package::{PackageBuilder, PackageError};
pub use logging::{default_log_level, init_logging, init_logging_from_config, logging_status};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
