use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A file or directory held by a SIP.
///
/// Children are keyed by their absolute path, so iteration order is stable
/// and matches the walker's name-sorted order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    path: PathBuf,
    directory: bool,
    children: BTreeMap<PathBuf, TreeNode>,
}
impl TreeNode {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), directory: false, children: BTreeMap::new() }
    }

    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), directory: true, children: BTreeMap::new() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Final path component, or the whole path for roots.
    pub fn name(&self) -> String {
        match self.path.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => self.path.display().to_string(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.directory
    }

    pub fn children(&self) -> impl Iterator<Item = &TreeNode> {
        self.children.values()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Adds a child. Files never have children, so this is a no-op on them.
    pub fn add(&mut self, child: TreeNode) {
        if self.directory {
            self.children.insert(child.path.clone(), child);
        }
    }

    /// Consumes the node, returning its children.
    pub fn into_children(self) -> Vec<TreeNode> {
        self.children.into_values().collect()
    }

    /// Detaches the node at `path` from anywhere below this node.
    pub fn remove(&mut self, path: &Path) -> Option<TreeNode> {
        if let Some(removed) = self.children.remove(path) {
            return Some(removed);
        }
        self.children.values_mut().filter(|child| path.starts_with(&child.path)).find_map(|child| child.remove(path))
    }

    /// Replaces the children with every leaf file found underneath,
    /// collapsing intermediate directories.
    pub fn flatten(&mut self) {
        let leaves: Vec<TreeNode> =
            std::mem::take(&mut self.children).into_values().flat_map(TreeNode::into_leaves).collect();
        self.children = leaves.into_iter().map(|leaf| (leaf.path.clone(), leaf)).collect();
    }

    fn into_leaves(self) -> Vec<TreeNode> {
        if !self.directory {
            return vec![self];
        }
        self.children.into_values().flat_map(TreeNode::into_leaves).collect()
    }

    /// Every file path underneath (or the node itself if it is a file).
    pub fn files(&self) -> Vec<&Path> {
        if !self.directory {
            return vec![&self.path];
        }
        self.children.values().flat_map(TreeNode::files).collect()
    }

    /// Every path in this subtree, the node's own path first.
    pub fn paths(&self) -> Vec<&Path> {
        let mut paths = vec![self.path.as_path()];
        paths.extend(self.children.values().flat_map(TreeNode::paths));
        paths
    }
}
