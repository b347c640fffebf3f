/// Module sources: where a location's classes come from
use crate::loader::context::{ClassRegistrar, LoadingContext, LocationError};
use crate::loader::dylib::DylibSource;
use crate::plugin::guard;
use enum_dispatch::enum_dispatch;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Turns one location into registered classes.
#[enum_dispatch]
pub trait ModuleSource {
    /// Contribute the classes found at `location` to `context`.
    ///
    /// A location with nothing in it is not an error. Failures that should be
    /// reported when the requested class turns out to be missing may either be
    /// returned or recorded on the context.
    fn open(&self, location: &Path, context: &mut LoadingContext) -> Result<(), LocationError>;
}

/// The module sources a [`crate::loader::ClassLoader`] can be built on.
#[enum_dispatch(ModuleSource)]
pub enum Source {
    /// Shared libraries on disk.
    Dylib(DylibSource),
    /// Modules linked into the host and installed under a location name.
    Static(StaticSource),
}

/// Registration entry point of a statically linked module.
pub type ModuleRegistration = fn(&mut dyn ClassRegistrar);

/// Modules compiled into the host, keyed by the location they answer for.
///
/// Cloning shares the module table, so a host can keep one clone to install or
/// replace modules while a loader holds another. Replacing the module behind a
/// location is picked up by the next resolution only: contexts that were
/// already built keep the classes they resolved.
#[derive(Clone, Default)]
pub struct StaticSource {
    modules: Arc<RwLock<BTreeMap<PathBuf, ModuleRegistration>>>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or replace) the module answering for `location`.
    pub fn install(&self, location: impl Into<PathBuf>, module: ModuleRegistration) {
        let location = location.into();
        log::debug!("Installing static module at {}", location.display());
        match self.modules.write() {
            Ok(mut modules) => {
                modules.insert(location, module);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(location, module);
            }
        }
    }

    pub fn remove(&self, location: &Path) -> bool {
        self.modules
            .write()
            .map(|mut modules| modules.remove(location).is_some())
            .unwrap_or(false)
    }

    fn lookup(&self, location: &Path) -> Option<ModuleRegistration> {
        self.modules.read().ok()?.get(location).copied()
    }
}

impl ModuleSource for StaticSource {
    fn open(&self, location: &Path, context: &mut LoadingContext) -> Result<(), LocationError> {
        let Some(module) = self.lookup(location) else {
            log::trace!("No static module at {}", location.display());
            return Ok(());
        };

        let mut registrar = context.registrar_for(location);
        guard::catch(|| module(&mut registrar)).map_err(|reason| LocationError::Initialization {
            path: location.to_path_buf(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::LogMessage;
    use crate::plugin::{Capabilities, Destination, DestinationContext};
    use crate::runtime::Runtime;

    struct Nop;

    impl Destination for Nop {
        fn init(&mut self) -> bool {
            true
        }
        fn deinit(&mut self) {}
        fn queue(&mut self, _message: &LogMessage) -> bool {
            true
        }
        fn flush(&mut self) -> bool {
            true
        }
    }

    fn nop(_: DestinationContext) -> Box<dyn Destination> {
        Box::new(Nop)
    }

    fn sample_module(registrar: &mut dyn ClassRegistrar) {
        registrar.register("Sample", Capabilities::DESTINATION, nop);
    }

    #[allow(clippy::panic)]
    fn broken_module(_registrar: &mut dyn ClassRegistrar) {
        panic!("static initializer failed");
    }

    #[test]
    fn test_installed_module_registers_classes() {
        let source = StaticSource::new();
        source.install("/b", sample_module);

        let mut ctx = LoadingContext::new(Runtime::acquire().unwrap());
        source.open(Path::new("/a"), &mut ctx).unwrap();
        assert!(!ctx.contains("Sample"));

        source.open(Path::new("/b"), &mut ctx).unwrap();
        assert!(ctx.contains("Sample"));
    }

    #[test]
    fn test_panicking_registration_is_reported() {
        let source = StaticSource::new();
        source.install("/broken", broken_module);

        let mut ctx = LoadingContext::new(Runtime::acquire().unwrap());
        let err = source.open(Path::new("/broken"), &mut ctx).unwrap_err();
        assert!(matches!(err, LocationError::Initialization { .. }));
        assert!(err.to_string().contains("static initializer failed"));
    }

    #[test]
    fn test_clones_share_modules() {
        let source = StaticSource::new();
        let handle = source.clone();
        handle.install("/a", sample_module);

        assert!(source.lookup(Path::new("/a")).is_some());
        assert!(handle.remove(Path::new("/a")));
        assert!(source.lookup(Path::new("/a")).is_none());
    }

    #[test]
    fn test_source_enum_dispatches() {
        let static_source = StaticSource::new();
        static_source.install("/s", sample_module);
        let source: Source = static_source.into();

        let mut ctx = LoadingContext::new(Runtime::acquire().unwrap());
        source.open(Path::new("/s"), &mut ctx).unwrap();
        assert!(ctx.contains("Sample"));
    }
}
