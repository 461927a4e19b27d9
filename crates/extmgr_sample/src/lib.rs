//! Sample native extension.
//!
//! Build as a `cdylib` and bundle it with
//! `extmgr pack --class sample.Greeter --lib <libextmgr_sample.so> greeter.ext`.

use extmgr_core::{BoxError, EntryPoint, Extension, HostConfig, HostHandle};
use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Greets the host; built with the host handle.
pub struct Greeter {
    host: HostHandle,
    active: AtomicBool,
}

impl Greeter {
    fn create(host: HostHandle) -> Result<Arc<dyn Extension>, BoxError> {
        Ok(Arc::new(Self {
            host,
            active: AtomicBool::new(false),
        }))
    }

    /// Extensions directory the host was configured with, if the host
    /// exposes its configuration.
    pub fn host_extensions_dir(&self) -> Option<String> {
        self.host
            .downcast_ref::<HostConfig>()
            .and_then(|config| config.extensions_dir.as_ref())
            .map(|dir| dir.display().to_string())
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Extension for Greeter {
    fn load(&self) -> Result<(), BoxError> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Err("greeter already loaded".into());
        }
        info!(
            "event=sample_load module=sample status=ok extension=greeter extensions_dir={}",
            self.host_extensions_dir().as_deref().unwrap_or("<unset>")
        );
        Ok(())
    }

    fn unload(&self) -> Result<(), BoxError> {
        if !self.active.swap(false, Ordering::SeqCst) {
            return Err("greeter was never loaded".into());
        }
        info!("event=sample_unload module=sample status=ok extension=greeter");
        Ok(())
    }
}

/// Stateless ticker; built without host access.
pub struct Ticker;

impl Ticker {
    fn create() -> Result<Arc<dyn Extension>, BoxError> {
        Ok(Arc::new(Self))
    }
}

impl Extension for Ticker {
    fn load(&self) -> Result<(), BoxError> {
        info!("event=sample_load module=sample status=ok extension=ticker");
        Ok(())
    }

    fn unload(&self) -> Result<(), BoxError> {
        info!("event=sample_unload module=sample status=ok extension=ticker");
        Ok(())
    }
}

extmgr_core::export_entry_points![
    EntryPoint::new("sample.Greeter").with_host_constructor(Greeter::create),
    EntryPoint::new("sample.Ticker").with_default_constructor(Ticker::create),
];

#[cfg(test)]
mod tests {
    use super::__extmgr_entry_points;
    use extmgr_core::{ConstructorKind, Extension, HostConfig, HostHandle};
    use std::path::PathBuf;

    fn entry(name: &str) -> extmgr_core::EntryPoint {
        *__extmgr_entry_points()
            .iter()
            .find(|entry| entry.name() == name)
            .expect("exported entry point")
    }

    #[test]
    fn exports_both_entry_points() {
        let names: Vec<_> = __extmgr_entry_points()
            .iter()
            .map(|entry| entry.name())
            .collect();
        assert_eq!(names, vec!["sample.Greeter", "sample.Ticker"]);
    }

    #[test]
    fn greeter_declares_only_host_constructor() {
        let greeter = entry("sample.Greeter");
        assert!(greeter.declares(ConstructorKind::WithHost));
        assert!(!greeter.declares(ConstructorKind::NoArgs));

        let config = HostConfig {
            extensions_dir: Some(PathBuf::from("/srv/ext")),
            ..HostConfig::default()
        };
        let instance = greeter
            .construct(ConstructorKind::WithHost, &HostHandle::new(config))
            .expect("declared")
            .expect("constructed");
        instance.load().expect("load");
        assert!(instance.load().is_err());
        instance.unload().expect("unload");
        assert!(instance.unload().is_err());
    }

    #[test]
    fn ticker_declares_only_no_arg_constructor() {
        let ticker = entry("sample.Ticker");
        assert!(ticker.declares(ConstructorKind::NoArgs));
        assert!(!ticker.declares(ConstructorKind::WithHost));
        assert!(ticker
            .construct(ConstructorKind::WithHost, &HostHandle::default())
            .is_none());

        let instance = ticker
            .construct(ConstructorKind::NoArgs, &HostHandle::default())
            .expect("declared")
            .expect("constructed");
        instance.load().expect("load");
        instance.unload().expect("unload");
    }
}
