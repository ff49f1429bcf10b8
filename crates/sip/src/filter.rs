use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

/// Paths already ignored or claimed by another rule, as seen from one
/// selected source item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentFilter {
    ignored: BTreeSet<PathBuf>,
    mapped: BTreeSet<PathBuf>,
}
impl ContentFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ignore(&mut self, path: impl AsRef<Path>) {
        self.ignored.insert(normalize(path.as_ref()));
    }

    pub fn map(&mut self, path: impl AsRef<Path>) {
        self.mapped.insert(normalize(path.as_ref()));
    }

    pub fn is_empty(&self) -> bool {
        self.ignored.is_empty() && self.mapped.is_empty()
    }

    /// Whether `path` equals, or lies below, any ignored or mapped path.
    /// Matching is component-wise, so `/a/bc` does not match `/a/b`.
    pub fn matches(&self, path: &Path) -> bool {
        let path = normalize(path);
        self.ignored.iter().chain(self.mapped.iter()).any(|member| path.starts_with(member))
    }
}

/// One [`ContentFilter`] per selected source item. A path is excluded if any
/// of them match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet(Vec<ContentFilter>);
impl FilterSet {
    pub fn new(filters: Vec<ContentFilter>) -> Self {
        Self(filters)
    }

    pub fn is_filtered(&self, path: &Path) -> bool {
        self.0.iter().any(|filter| filter.matches(path))
    }

    pub fn filters(&self) -> &[ContentFilter] {
        &self.0
    }
}

/// Lexically normalizes a path: drops `.` components and resolves `..`
/// against preceding normal components. Does not touch the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {},
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            },
            other => normalized.push(other),
        }
    }
    normalized
}
