//! One SIP per directory down to a fixed depth.

use super::{Frame, Strategy};
use crate::tree::TreeNode;

/// Files given directly as start paths are their own SIPs.
pub(super) fn file(strategy: &mut Strategy, node: TreeNode, depth: usize) {
    match depth {
        0 => {
            strategy.create_from_file(node, None);
        },
        _ => strategy.attach(node),
    }
}

/// Directories at or above `level` become SIPs; their sub-directories at or
/// above `level` have already been consumed, so only direct files and deeper
/// content remain. Deeper directories are absorbed by their parent.
pub(super) fn post_directory(strategy: &mut Strategy, frame: Frame, level: usize) {
    if frame.depth <= level {
        strategy.create_from_directory(frame.node, None);
    } else {
        strategy.attach(frame.node);
    }
}

#[cfg(test)]
mod tests {
    use super::super::Grouping;
    use super::super::testing::*;
    use crate::registry::PathRegistry;
    use rstest::rstest;

    #[rstest]
    #[case(0, vec!["root"])]
    #[case(1, vec!["docs", "photos", "root"])]
    #[case(2, vec!["inner", "docs", "photos", "root"])]
    #[case(9, vec!["inner", "docs", "photos", "root"])]
    #[tokio::test]
    async fn test_no_sip_deeper_than_level(#[case] level: usize, #[case] expected: Vec<&str>) {
        let dir = fixture();
        let root = dir.path().join("root");
        let sips = run(Grouping::PerFolder { level }, &[root.clone()], &PathRegistry::new()).await;
        assert_eq!(names(&sips), expected);
        let all = files(&sips);
        let mut unique = all.clone();
        unique.dedup();
        assert_eq!(all, unique, "a file belongs to more than one SIP");
        assert_eq!(all.len(), 5);
        for sip in &sips {
            let source = sip.source.as_ref().unwrap();
            let depth = source.strip_prefix(&root).unwrap().components().count();
            assert!(depth <= level);
        }
    }

    #[tokio::test]
    async fn test_file_start_path() {
        let dir = fixture();
        let root = dir.path().join("root");
        let sips = run(Grouping::PerFolder { level: 1 }, &[root.join("a.txt")], &PathRegistry::new()).await;
        assert_eq!(names(&sips), vec!["a.txt"]);
    }
}
