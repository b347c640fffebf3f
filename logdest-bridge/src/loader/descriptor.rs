/// Plugin descriptor: where to look and what to look for
use crate::loader::path_list::PathList;

/// Search path list plus class name. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescriptor {
    path_list: String,
    class_name: String,
}

impl PluginDescriptor {
    pub fn new(path_list: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            path_list: path_list.into(),
            class_name: class_name.into(),
        }
    }

    pub fn path_list(&self) -> &str {
        &self.path_list
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn locations(&self) -> PathList {
        PathList::parse(&self.path_list)
    }
}

impl std::fmt::Display for PluginDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} from {}", self.class_name, self.path_list)
    }
}
