/// Path-list parsing for class loading
use std::fmt;
use std::path::{Path, PathBuf};

/// Separator between locations in a path list.
pub const PATH_LIST_SEPARATOR: char = ':';

/// Ordered list of locations a loading context is scoped to.
///
/// Parsing is best-effort: malformed segments (empty, or containing a NUL byte)
/// are skipped with a warning and the remaining ones are kept in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathList {
    raw: String,
    locations: Vec<PathBuf>,
}

impl PathList {
    pub fn parse(raw: &str) -> Self {
        let mut locations = Vec::new();

        for (position, segment) in raw.split(PATH_LIST_SEPARATOR).enumerate() {
            let segment = segment.trim();
            if segment.is_empty() {
                log::warn!("Skipping empty segment {position} in path list {raw:?}");
                continue;
            }
            if segment.contains('\0') {
                log::warn!("Skipping malformed segment {position} in path list {raw:?}");
                continue;
            }
            locations.push(PathBuf::from(segment));
        }

        Self {
            raw: raw.to_string(),
            locations,
        }
    }

    pub fn locations(&self) -> &[PathBuf] {
        &self.locations
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.locations.iter().map(PathBuf::as_path)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

impl fmt::Display for PathList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
