//! Destination configuration blocks.
//!
//! A host describes each destination with a JSON object:
//!
//! ```json
//! {
//!     "name": "d_stdout",
//!     "class_path": "/opt/plugins:/usr/lib/logdest",
//!     "class_name": "StdoutDestination",
//!     "options": { "name": "stdout-1" },
//!     "deinit_policy": "always"
//! }
//! ```
//!
//! Only `class_name` is required. `class_path` defaults to the current
//! directory, `options` to an empty block and `deinit_policy` to
//! `only-after-init`.

use crate::bridge::DeinitPolicy;
use crate::loader::PluginDescriptor;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Path list used when a block does not name one.
pub const DEFAULT_CLASS_PATH: &str = ".";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("destination configuration must be a JSON object")]
    NotAnObject,
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{key} must be {expected}")]
    WrongType { key: String, expected: &'static str },
    #[error("unknown deinit policy {0:?}")]
    UnknownPolicy(String),
}

/// One parsed destination block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationConfig {
    pub name: Option<String>,
    pub class_path: String,
    pub class_name: String,
    pub options: BTreeMap<String, String>,
    pub deinit_policy: DeinitPolicy,
}

impl DestinationConfig {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            name: None,
            class_path: DEFAULT_CLASS_PATH.to_string(),
            class_name: class_name.into(),
            options: BTreeMap::new(),
            deinit_policy: DeinitPolicy::default(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let object = value.as_object().ok_or(ConfigError::NotAnObject)?;

        let class_name = string_field(object, "class_name")?
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::Missing("class_name"))?;
        let class_path =
            string_field(object, "class_path")?.unwrap_or_else(|| DEFAULT_CLASS_PATH.to_string());
        let name = string_field(object, "name")?;

        let deinit_policy = match string_field(object, "deinit_policy")? {
            Some(policy) => DeinitPolicy::from_str(&policy)
                .map_err(|_| ConfigError::UnknownPolicy(policy.clone()))?,
            None => DeinitPolicy::default(),
        };

        let options = match object.get("options") {
            None | Some(Value::Null) => BTreeMap::new(),
            Some(Value::Object(block)) => block
                .iter()
                .map(|(key, value)| match value {
                    Value::String(s) => Ok((key.clone(), s.clone())),
                    _ => Err(ConfigError::WrongType {
                        key: format!("options.{key}"),
                        expected: "a string",
                    }),
                })
                .collect::<Result<_, _>>()?,
            Some(_) => {
                return Err(ConfigError::WrongType {
                    key: "options".to_string(),
                    expected: "an object",
                })
            }
        };

        Ok(Self {
            name,
            class_path,
            class_name,
            options,
            deinit_policy,
        })
    }

    pub fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor::new(self.class_path.clone(), self.class_name.clone())
    }

    /// Name used in logs: the block's name, else the class name.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.class_name)
    }
}

fn string_field(object: &Map<String, Value>, key: &'static str) -> Result<Option<String>, ConfigError> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ConfigError::WrongType {
            key: key.to_string(),
            expected: "a string",
        }),
    }
}
