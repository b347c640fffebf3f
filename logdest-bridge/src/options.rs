//! Option resolution for destination plugins.
//!
//! The host owns every configuration block. A plugin only ever sees an
//! [`Options`] view: the configuration handle it was created with, bound to the
//! host's [`OptionResolver`]. Lookups are forwarded on every call and never cached.

use crate::handle::{ConfigHandle, HandleError, HandleTable};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Host-side lookup of configuration values.
///
/// A missing key is `None`, not an error. A stale handle also resolves to `None`;
/// implementations are expected to log it.
#[cfg_attr(test, mockall::automock)]
pub trait OptionResolver: Send + Sync {
    fn get_option(&self, handle: ConfigHandle, key: &str) -> Option<String>;
}

/// Raised by plugins when their configuration is unusable.
///
/// The bridge never sees this type directly: a plugin converts it into `false`
/// from `init`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("{0} is a required option for this destination")]
    MissingOption(String),
    #[error("invalid value for option {key}: {reason}")]
    InvalidOption { key: String, reason: String },
}

/// Configuration view handed to a plugin at construction time.
#[derive(Clone)]
pub struct Options {
    resolver: Arc<dyn OptionResolver>,
    handle: ConfigHandle,
}

impl Options {
    pub fn new(resolver: Arc<dyn OptionResolver>, handle: ConfigHandle) -> Self {
        Self { resolver, handle }
    }

    pub fn handle(&self) -> ConfigHandle {
        self.handle
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.resolver.get_option(self.handle, key)
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// Look up an option the plugin cannot work without.
    pub fn require(&self, key: &str) -> Result<String, ConfigurationError> {
        self.get(key)
            .ok_or_else(|| ConfigurationError::MissingOption(key.to_string()))
    }

    /// Look up an option and parse it with `FromStr`.
    pub fn parse<T>(&self, key: &str) -> Result<Option<T>, ConfigurationError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|e: T::Err| ConfigurationError::InvalidOption {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
        }
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Host-owned store of configuration blocks.
#[derive(Default)]
pub struct ConfigStore {
    table: RwLock<HandleTable<BTreeMap<String, String>>>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a configuration block and return the handle plugins will use.
    pub fn register(&self, options: BTreeMap<String, String>) -> Result<ConfigHandle, HandleError> {
        let mut table = match self.table.write() {
            Ok(table) => table,
            Err(poisoned) => {
                log::warn!("Config store lock poisoned, registering anyway");
                poisoned.into_inner()
            }
        };
        table.insert(options).map(ConfigHandle)
    }

    /// Release a configuration block. Later lookups through `handle` resolve to `None`.
    pub fn release(&self, handle: ConfigHandle) -> bool {
        let Ok(mut table) = self.table.write() else {
            log::warn!("Config store lock poisoned while releasing {handle}");
            return false;
        };
        match table.remove(handle.0) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Failed to release {handle}: {e}");
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.table.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OptionResolver for ConfigStore {
    fn get_option(&self, handle: ConfigHandle, key: &str) -> Option<String> {
        let table = match self.table.read() {
            Ok(table) => table,
            Err(poisoned) => {
                log::warn!("Config store lock poisoned while looking up {key} through {handle}");
                poisoned.into_inner()
            }
        };
        match table.get(handle.0) {
            Ok(options) => options.get(key).cloned(),
            Err(e) => {
                log::warn!("Option lookup for {key} rejected: {e}");
                None
            }
        }
    }
}
