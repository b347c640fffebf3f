//! Host bridge for destination plugins.
//!
//! The host talks to plugins only through this module:
//!
//! - [`PluginHost::create`] resolves a class and constructs an instance bound to
//!   a configuration handle;
//! - [`PluginRef::dispatch`] drives the instance through its lifecycle and
//!   reports each call as a plain `bool`.
//!
//! Panics raised by plugin code are caught in the image that raised them (see
//! [`crate::plugin::guard`]) and reach this module as values. They are logged,
//! turned into `false` (or a [`BridgeError::Fault`] at construction) and kept as
//! [`FaultRecord`]s.
//! Calls that would break the lifecycle ordering are refused before they reach
//! the plugin.

mod host;
mod plugin_ref;

pub use host::{DeinitPolicy, PluginHost};
pub use plugin_ref::{CallArgs, FaultKind, FaultRecord, PluginRef};

use crate::loader::ClassResolutionError;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    ClassResolution(#[from] ClassResolutionError),
    #[error("constructor of {class} panicked: {detail}")]
    Fault { class: String, detail: String },
}
