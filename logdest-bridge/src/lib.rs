//! Loading and lifecycle bridge for log destination plugins.
//!
//! A host names a destination by a path list and a class name. The
//! [`loader`] resolves that class in a fresh, isolated loading context; the
//! [`bridge`] constructs an instance bound to the destination's configuration
//! handle and drives it through `init`, `queue`, `flush` and `deinit`, turning
//! every outcome (including a panic inside the plugin) into a plain `bool`.
//! Plugins read their options through [`options::Options`] and the records they
//! are handed through [`message::LogMessage`].
#![deny(unsafe_code)]

pub mod bridge;
pub mod config;
pub mod handle;
pub mod loader;
pub mod message;
pub mod options;
pub mod plugin;
pub mod runtime;
pub mod worker;

///
/// Everything a plugin library or a host embedding the bridge usually needs
///
/// ```
/// use logdest_bridge::prelude::*;
/// ```
pub mod prelude {
    pub use crate::bridge::{CallArgs, DeinitPolicy, FaultRecord, PluginHost, PluginRef};
    pub use crate::config::DestinationConfig;
    pub use crate::handle::{ConfigHandle, MessageHandle};
    pub use crate::loader::{ClassLoader, ClassRegistrar, DylibSource, StaticSource};
    pub use crate::message::{Fields, LogMessage, MessageStore};
    pub use crate::options::{ConfigStore, ConfigurationError, Options};
    pub use crate::plugin::{Capabilities, Destination, DestinationContext, LifecycleState};
    pub use crate::worker::{DestinationWorker, StopHandle};
}
