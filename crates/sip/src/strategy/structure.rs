//! Mirror the directory structure.
//!
//! A directory holding files but no (non-empty) sub-directories becomes one
//! flat SIP named after it. A directory with sub-directories becomes a
//! classification node: its direct files become single-file SIPs below it
//! and its sub-directories recurse. Empty directories are pruned.
//!
//! Nothing is created until the walk ends, since a directory's shape is only
//! known once its whole subtree has been seen.

use super::{Frame, Strategy};
use crate::sip::SipKind;
use crate::tree::TreeNode;
use std::path::PathBuf;
use tracing::debug;

/// A directory that will become a single flat SIP, or a top-level file.
pub(super) struct PseudoSip {
    node: TreeNode,
}

/// A directory that will become a classification node.
pub(super) struct PseudoDescriptionObject {
    path: PathBuf,
    title: String,
    files: Vec<TreeNode>,
    children: Vec<Pseudo>,
}

pub(super) enum Pseudo {
    Sip(PseudoSip),
    Description(PseudoDescriptionObject),
}

fn push(strategy: &mut Strategy, pseudo: Pseudo) {
    match strategy.stack.last_mut() {
        Some(parent) => parent.pseudo.push(pseudo),
        None => strategy.pseudo_roots.push(pseudo),
    }
}

pub(super) fn file(strategy: &mut Strategy, node: TreeNode) {
    match strategy.stack.is_empty() {
        true => push(strategy, Pseudo::Sip(PseudoSip { node })),
        false => strategy.attach(node),
    }
}

/// Sub-directories never attach to their parent's node; they arrive as
/// pseudo entries instead, so the node only ever holds direct files.
pub(super) fn post_directory(strategy: &mut Strategy, frame: Frame) {
    let Frame { node, pseudo, .. } = frame;
    let pseudo = match (pseudo.is_empty(), node.is_empty()) {
        (true, true) => {
            debug!(path = %node.path().display(), "pruning empty directory");
            return;
        },
        (true, false) => Pseudo::Sip(PseudoSip { node }),
        (false, _) => Pseudo::Description(PseudoDescriptionObject {
            path: node.path().to_path_buf(),
            title: node.name(),
            files: node.into_children(),
            children: pseudo,
        }),
    };
    push(strategy, pseudo);
}

/// Materializes every pseudo entry, then claims the classification
/// directories.
pub(super) fn end(strategy: &mut Strategy) {
    let roots = std::mem::take(&mut strategy.pseudo_roots);
    let mut classified = Vec::new();
    for pseudo in roots {
        materialize(strategy, pseudo, None, &mut classified);
    }
    for path in classified {
        strategy.ctx.registry.map(path);
    }
}

fn materialize(strategy: &mut Strategy, pseudo: Pseudo, parent_id: Option<String>, classified: &mut Vec<PathBuf>) {
    match pseudo {
        Pseudo::Sip(PseudoSip { mut node }) if node.is_dir() => {
            node.flatten();
            strategy.create_from_directory(node, parent_id);
        },
        Pseudo::Sip(PseudoSip { node }) => {
            strategy.create_from_file(node, parent_id);
        },
        Pseudo::Description(description) => {
            let id = strategy.create(
                description.title,
                SipKind::Classification,
                Vec::new(),
                Some(description.path.clone()),
                parent_id,
            );
            let parent = Some(id.to_string());
            for file in description.files {
                strategy.create_from_file(file, parent.clone());
            }
            for child in description.children {
                materialize(strategy, child, parent.clone(), classified);
            }
            classified.push(description.path);
        },
    }
}
