/// Loading contexts and class registration
use crate::plugin::guard::{self, GuardedDestination, GuardedFactory, Outcome};
use crate::plugin::{Capabilities, DestinationContext, DestinationFactory};
use crate::runtime::Runtime;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Sink modules register their exported classes into.
///
/// Shared libraries receive one through their registration symbol, statically
/// linked modules through the function installed in a `StaticSource`.
pub trait ClassRegistrar {
    /// Register a class built by a plain factory. The host guards its calls.
    fn register(
        &mut self,
        class_name: &str,
        capabilities: Capabilities,
        factory: DestinationFactory,
    );

    /// Register a class that contains its own panics. Shared libraries use this,
    /// through [`export_destinations!`](crate::export_destinations).
    fn register_guarded(
        &mut self,
        class_name: &str,
        capabilities: Capabilities,
        factory: GuardedFactory,
    );

    /// Logger of the host the module is being loaded into.
    fn logger(&self) -> &'static dyn log::Log;

    fn max_level(&self) -> log::LevelFilter;
}

/// Why a location could not contribute its classes.
#[derive(Debug, thiserror::Error)]
pub enum LocationError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to load library {path}: {source}")]
    Library {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("library {path} was built for ABI version {found}, expected {expected}")]
    AbiMismatch {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
    #[error("class registration in {path} panicked: {reason}")]
    Initialization { path: PathBuf, reason: String },
}

/// How instances of a registered class are built.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Constructor {
    /// Built and called in the host image, guarded there.
    Plain(DestinationFactory),
    /// Guarded inside the image that registered it.
    Guarded(GuardedFactory),
}

impl Constructor {
    pub(crate) fn construct(self, ctx: DestinationContext) -> Outcome<Box<dyn GuardedDestination>> {
        match self {
            Constructor::Plain(factory) => guard::construct(ctx, factory),
            Constructor::Guarded(factory) => factory(ctx),
        }
    }
}

/// A class as registered by its module.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ClassExport {
    pub(crate) capabilities: Capabilities,
    pub(crate) constructor: Constructor,
    pub(crate) origin: usize,
}

/// Isolated scope holding the classes of one set of locations.
///
/// Every `load_class` call builds a new context, so two resolutions never share
/// classes, library images or shadow copies. Fields drop in declaration order:
/// libraries are unloaded before their shadow copies are removed, and both
/// before the runtime reference is released.
pub struct LoadingContext {
    id: u64,
    locations: Vec<PathBuf>,
    classes: BTreeMap<String, ClassExport>,
    failures: Vec<LocationError>,
    libraries: Vec<libloading::Library>,
    shadow: Option<TempDir>,
    runtime: Arc<Runtime>,
}

impl LoadingContext {
    pub(crate) fn new(runtime: Arc<Runtime>) -> Self {
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        log::trace!("Created loading context {id}");
        Self {
            id,
            locations: Vec::new(),
            classes: BTreeMap::new(),
            failures: Vec::new(),
            libraries: Vec::new(),
            shadow: None,
            runtime,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Locations visited so far, in path-list order.
    pub fn locations(&self) -> &[PathBuf] {
        &self.locations
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.classes.contains_key(class_name)
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    pub fn failures(&self) -> &[LocationError] {
        &self.failures
    }

    /// Registrar that attributes classes to `location`.
    pub(crate) fn registrar_for(&mut self, location: &Path) -> LocationRegistrar<'_> {
        let origin = match self.locations.iter().position(|l| l == location) {
            Some(origin) => origin,
            None => {
                self.locations.push(location.to_path_buf());
                self.locations.len() - 1
            }
        };
        LocationRegistrar {
            context: self,
            origin,
        }
    }

    pub(crate) fn enter(&mut self, location: &Path) {
        if !self.locations.iter().any(|l| l == location) {
            self.locations.push(location.to_path_buf());
        }
    }

    pub(crate) fn record_failure(&mut self, error: LocationError) {
        log::warn!("Loading context {}: {error}", self.id);
        self.failures.push(error);
    }

    pub(crate) fn take_first_failure(&mut self) -> Option<LocationError> {
        if self.failures.is_empty() {
            None
        } else {
            Some(self.failures.remove(0))
        }
    }

    pub(crate) fn class(&self, class_name: &str) -> Option<ClassExport> {
        self.classes.get(class_name).copied()
    }

    pub(crate) fn origin(&self, export: &ClassExport) -> Option<&Path> {
        self.locations.get(export.origin).map(PathBuf::as_path)
    }

    /// Keep a library image alive for as long as this context lives.
    pub(crate) fn keep_library(&mut self, library: libloading::Library) {
        self.libraries.push(library);
    }

    pub(crate) fn library_count(&self) -> usize {
        self.libraries.len()
    }

    /// Directory for this context's shadow copies, created on first use.
    pub(crate) fn shadow_dir(&mut self) -> std::io::Result<&Path> {
        if self.shadow.is_none() {
            let prefix = format!("ctx{}-", self.id);
            let dir = tempfile::Builder::new()
                .prefix(&prefix)
                .tempdir_in(self.runtime.scratch_dir())?;
            self.shadow = Some(dir);
        }
        match &self.shadow {
            Some(dir) => Ok(dir.path()),
            None => Err(std::io::Error::other("shadow directory unavailable")),
        }
    }
}

impl std::fmt::Debug for LoadingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadingContext")
            .field("id", &self.id)
            .field("locations", &self.locations)
            .field("classes", &self.classes.keys().collect::<Vec<_>>())
            .field("libraries", &self.libraries.len())
            .finish()
    }
}

impl Drop for LoadingContext {
    fn drop(&mut self) {
        log::trace!(
            "Dropping loading context {} ({} libraries)",
            self.id,
            self.libraries.len()
        );
    }
}

pub(crate) struct LocationRegistrar<'a> {
    context: &'a mut LoadingContext,
    origin: usize,
}

impl LocationRegistrar<'_> {
    fn insert(&mut self, class_name: &str, capabilities: Capabilities, constructor: Constructor) {
        if let Some(existing) = self.context.classes.get(class_name) {
            log::debug!(
                "Class {class_name} already provided by {:?}, ignoring later definition",
                self.context.locations.get(existing.origin)
            );
            return;
        }
        log::trace!("Context {} registered class {class_name}", self.context.id);
        self.context.classes.insert(
            class_name.to_string(),
            ClassExport {
                capabilities,
                constructor,
                origin: self.origin,
            },
        );
    }
}

impl ClassRegistrar for LocationRegistrar<'_> {
    fn register(
        &mut self,
        class_name: &str,
        capabilities: Capabilities,
        factory: DestinationFactory,
    ) {
        self.insert(class_name, capabilities, Constructor::Plain(factory));
    }

    fn register_guarded(
        &mut self,
        class_name: &str,
        capabilities: Capabilities,
        factory: GuardedFactory,
    ) {
        self.insert(class_name, capabilities, Constructor::Guarded(factory));
    }

    fn logger(&self) -> &'static dyn log::Log {
        log::logger()
    }

    fn max_level(&self) -> log::LevelFilter {
        log::max_level()
    }
}
