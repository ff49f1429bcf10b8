//! One SIP per selected path.

use super::{Frame, Grouping, Strategy};
use crate::tree::TreeNode;
use std::path::Path;

fn is_selected(strategy: &Strategy, path: &Path) -> bool {
    matches!(&strategy.grouping, Grouping::PerSelection(selection) if selection.contains(path))
}

pub(super) fn file(strategy: &mut Strategy, node: TreeNode) {
    if is_selected(strategy, node.path()) {
        strategy.create_from_file(node, None);
    } else if !strategy.stack.is_empty() {
        strategy.attach(node);
    }
}

/// Bundles everything accumulated under a selected directory. Unselected
/// directories are handed up to their parent, or dropped at the top.
pub(super) fn post_directory(strategy: &mut Strategy, frame: Frame) {
    if is_selected(strategy, frame.node.path()) {
        strategy.create_from_directory(frame.node, None);
    } else if !strategy.stack.is_empty() {
        strategy.attach(frame.node);
    }
}

#[cfg(test)]
mod tests {
    use super::super::Grouping;
    use super::super::testing::*;
    use crate::registry::{PathRegistry, PathState};
    use std::collections::BTreeSet;

    #[tokio::test]
    async fn test_sip_per_selected_path() {
        let dir = fixture();
        let root = dir.path().join("root");
        let selection = BTreeSet::from([root.join("docs"), root.join("a.txt")]);
        let registry = PathRegistry::new();
        let sips = run(Grouping::PerSelection(selection), &[root.clone()], &registry).await;
        assert_eq!(names(&sips), vec!["a.txt", "docs"]);
        assert_eq!(sips[1].file_count(), 3);
        assert_eq!(sips[1].source.as_deref(), Some(root.join("docs").as_path()));
        assert_eq!(registry.state(&root.join("photos/e.jpg")), PathState::Normal);
        assert_eq!(registry.state(&root.join("docs/inner/d.txt")), PathState::Mapped);
    }

    #[tokio::test]
    async fn test_nested_selection_is_split() {
        let dir = fixture();
        let root = dir.path().join("root");
        let selection = BTreeSet::from([root.join("docs"), root.join("docs/inner")]);
        let sips = run(Grouping::PerSelection(selection), &[root.clone()], &PathRegistry::new()).await;
        assert_eq!(names(&sips), vec!["inner", "docs"]);
        assert_eq!(sips[0].file_count(), 1);
        assert_eq!(sips[1].file_count(), 2);
    }
}
