use crate::filter::{ContentFilter, FilterSet, normalize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Claim state of a filesystem path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathState {
    #[default]
    Normal,
    /// Excluded by the user.
    Ignored,
    /// Held by a SIP of some rule.
    Mapped,
}

/// Shared record of which paths are ignored or already claimed.
///
/// This is the single source of truth consulted when building the filters of
/// a new rule. Cloning is cheap and every clone sees the same state.
#[derive(Debug, Clone, Default)]
pub struct PathRegistry {
    states: Arc<RwLock<BTreeMap<PathBuf, PathState>>>,
}
impl PathRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The state recorded for exactly this path.
    pub fn state(&self, path: &Path) -> PathState {
        let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
        states.get(&normalize(path)).copied().unwrap_or_default()
    }

    pub fn ignore(&self, path: impl AsRef<Path>) {
        self.set(path.as_ref(), PathState::Ignored);
    }

    pub fn map(&self, path: impl AsRef<Path>) {
        self.set(path.as_ref(), PathState::Mapped);
    }

    /// Returns the path to the normal state.
    pub fn reset(&self, path: impl AsRef<Path>) {
        self.set(path.as_ref(), PathState::Normal);
    }

    fn set(&self, path: &Path, state: PathState) {
        let path = normalize(path);
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        match state {
            PathState::Normal => {
                states.remove(&path);
            },
            _ => {
                states.insert(path, state);
            },
        }
    }

    /// Number of paths currently in the given state.
    pub fn count(&self, state: PathState) -> usize {
        let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
        states.values().filter(|s| **s == state).count()
    }

    /// Builds one filter per source item from every ignored or mapped path
    /// inside that item, or above it.
    pub fn filters_for(&self, sources: &[PathBuf]) -> FilterSet {
        let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
        let filters = sources
            .iter()
            .map(|source| {
                let source = normalize(source);
                let mut filter = ContentFilter::new();
                for (path, state) in states.iter() {
                    if !path.starts_with(&source) && !source.starts_with(path) {
                        continue;
                    }
                    match state {
                        PathState::Ignored => filter.ignore(path),
                        PathState::Mapped => filter.map(path),
                        PathState::Normal => {},
                    }
                }
                filter
            })
            .collect();
        let filters = FilterSet::new(filters);
        debug!(sources = sources.len(), "derived content filters");
        filters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_states_round_trip() {
        let registry = PathRegistry::new();
        registry.ignore("/a/tmp");
        registry.map("/a/done/");
        assert_eq!(registry.state(Path::new("/a/tmp")), PathState::Ignored);
        assert_eq!(registry.state(Path::new("/a/done")), PathState::Mapped);
        assert_eq!(registry.state(Path::new("/a")), PathState::Normal);
        registry.reset("/a/done");
        assert_eq!(registry.state(Path::new("/a/done")), PathState::Normal);
        assert_eq!(registry.count(PathState::Mapped), 0);
    }

    #[test]
    fn test_filters_for_sources() {
        let registry = PathRegistry::new();
        registry.ignore("/a/tmp");
        registry.map("/b");
        registry.map("/c/x");
        let set = registry.filters_for(&[PathBuf::from("/a"), PathBuf::from("/b/inner")]);
        assert_eq!(set.filters().len(), 2);
        assert!(set.is_filtered(Path::new("/a/tmp/f")));
        assert!(set.is_filtered(Path::new("/b/inner/f")));
        assert!(!set.is_filtered(Path::new("/c/x/f")));
        assert!(!set.is_filtered(Path::new("/a/keep")));
    }

    #[test]
    fn test_clones_share_state() {
        let registry = PathRegistry::new();
        registry.clone().map("/z");
        assert_eq!(registry.state(Path::new("/z")), PathState::Mapped);
    }
}
