//! One SIP per file.

use super::Strategy;
use crate::tree::TreeNode;
use std::path::Path;

pub(super) fn file(strategy: &mut Strategy, node: TreeNode) {
    strategy.create_from_file(node, None);
}

/// Directories never become SIPs, but are claimed once fully visited.
pub(super) fn post_directory(strategy: &mut Strategy, path: &Path) {
    strategy.claim(path);
}
