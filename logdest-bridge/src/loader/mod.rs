//! Class loading for destination plugins.
//!
//! A [`ClassLoader`] resolves a class name against a path list. Each call builds
//! a fresh [`LoadingContext`] scoped to exactly the listed locations, asks the
//! loader's [`Source`] to open them in order until the class shows up, and hands
//! back a [`ClassHandle`] that keeps the context (and any library images it
//! loaded) alive. Nothing is cached between calls: resolving the same name again
//! after a location changed gives a new, independent class.
//!
//! Only the contract types in [`crate::plugin`] are shared between the host and
//! a context. Implementation classes always come from the context's own
//! locations.

mod context;
mod descriptor;
mod dylib;
mod path_list;
mod source;

pub use context::{ClassRegistrar, LoadingContext, LocationError};

use context::Constructor;
pub use descriptor::PluginDescriptor;
pub use dylib::{DylibSource, ABI_VERSION, ABI_VERSION_SYMBOL, REGISTER_SYMBOL};
pub use path_list::{PathList, PATH_LIST_SEPARATOR};
pub use source::{ModuleRegistration, ModuleSource, Source, StaticSource};

use crate::plugin::{Capabilities, DestinationContext, GuardedDestination, Outcome};
use crate::runtime::Runtime;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ClassResolutionError {
    #[error("class {class_name} not found in {path_list:?}")]
    NotFound {
        class_name: String,
        path_list: String,
    },
    #[error("class {class_name} could not be resolved: {source}")]
    LocationFailed {
        class_name: String,
        #[source]
        source: LocationError,
    },
    #[error("class {class_name} does not provide {missing:?}")]
    MissingCapabilities {
        class_name: String,
        missing: Capabilities,
    },
}

/// Identity of a resolved class: its name plus the context it was resolved in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassId {
    context: u64,
    name: String,
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@ctx{}", self.name, self.context)
    }
}

/// A class resolved in some loading context.
#[derive(Clone)]
pub struct ClassHandle {
    name: String,
    capabilities: Capabilities,
    constructor: Constructor,
    context: Arc<LoadingContext>,
}

impl ClassHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> ClassId {
        ClassId {
            context: self.context.id(),
            name: self.name.clone(),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Location the class was registered from.
    pub fn origin(&self) -> Option<&Path> {
        let export = self.context.class(&self.name)?;
        self.context.origin(&export)
    }

    pub fn context(&self) -> &LoadingContext {
        &self.context
    }

    /// Run the class constructor. A panic inside it comes back as `Err` with
    /// the panic message, and so does a panic in any later call on the instance.
    ///
    /// The returned instance may point into a library owned by this handle's
    /// context, so it must be dropped before the last clone of the handle.
    pub fn instantiate(&self, ctx: DestinationContext) -> Outcome<Box<dyn GuardedDestination>> {
        self.constructor.construct(ctx)
    }
}

impl fmt::Debug for ClassHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassHandle")
            .field("id", &self.id())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// Resolves plugin classes against path lists.
pub struct ClassLoader {
    source: Source,
    runtime: Arc<Runtime>,
}

impl ClassLoader {
    pub fn new(source: impl Into<Source>) -> std::io::Result<Self> {
        Ok(Self::with_runtime(source, Runtime::acquire()?))
    }

    pub fn with_runtime(source: impl Into<Source>, runtime: Arc<Runtime>) -> Self {
        Self {
            source: source.into(),
            runtime,
        }
    }

    /// Loader over shared libraries on disk.
    pub fn dylib() -> std::io::Result<Self> {
        Self::new(DylibSource::new())
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Resolve `class_name` in a fresh context over `path_list`.
    pub fn load_class(
        &self,
        path_list: &str,
        class_name: &str,
    ) -> Result<ClassHandle, ClassResolutionError> {
        self.load_class_with(path_list, class_name, Capabilities::DESTINATION)
    }

    pub fn load(&self, descriptor: &PluginDescriptor) -> Result<ClassHandle, ClassResolutionError> {
        self.load_class(descriptor.path_list(), descriptor.class_name())
    }

    /// Resolve `class_name` and require it to advertise `required`.
    pub fn load_class_with(
        &self,
        path_list: &str,
        class_name: &str,
        required: Capabilities,
    ) -> Result<ClassHandle, ClassResolutionError> {
        let paths = PathList::parse(path_list);
        let mut context = LoadingContext::new(self.runtime.clone());
        log::debug!(
            "Resolving {class_name} in context {} over {} locations",
            context.id(),
            paths.locations().len()
        );

        for location in paths.iter() {
            if let Err(e) = self.source.open(location, &mut context) {
                context.record_failure(e);
            }
            if context.contains(class_name) {
                break;
            }
        }

        let Some(export) = context.class(class_name) else {
            return Err(match context.take_first_failure() {
                Some(source) => ClassResolutionError::LocationFailed {
                    class_name: class_name.to_string(),
                    source,
                },
                None => ClassResolutionError::NotFound {
                    class_name: class_name.to_string(),
                    path_list: path_list.to_string(),
                },
            });
        };

        if !export.capabilities.contains(required) {
            return Err(ClassResolutionError::MissingCapabilities {
                class_name: class_name.to_string(),
                missing: required - export.capabilities,
            });
        }

        log::debug!(
            "Resolved {class_name} in context {} from {:?}",
            context.id(),
            context.origin(&export)
        );
        Ok(ClassHandle {
            name: class_name.to_string(),
            capabilities: export.capabilities,
            constructor: export.constructor,
            context: Arc::new(context),
        })
    }
}
