//! Grouping strategies decide where SIP boundaries fall.
//!
//! A single driver, [`Strategy`], receives the walker's events, builds
//! [`TreeNode`]s for everything that is not filtered out and hands finished
//! nodes to the per-kind functions in the submodules, which decide when a
//! node becomes a SIP. Created SIPs queue up and are pulled with
//! [`Iterator::next`] while the walk is still running.

mod per_file;
mod per_folder;
mod per_selection;
mod single;
mod structure;

use crate::error::Error;
use crate::filter::{FilterSet, normalize};
use crate::registry::PathRegistry;
use crate::resolve::MetadataResolver;
use crate::sip::{SipId, SipKind, SipPreview};
use crate::tree::TreeNode;
use crate::walk::Visitor;
use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

use self::structure::Pseudo;

/// How the selected paths are grouped into SIPs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grouping {
    /// Everything in one SIP.
    SingleSip,
    /// One SIP per file.
    PerFile,
    /// One SIP per selected path, holding everything below it.
    PerSelection(BTreeSet<PathBuf>),
    /// One SIP per directory down to `level` (start paths are level 0).
    PerFolder { level: usize },
    /// Mirror the directory structure as classification nodes and SIPs.
    Structure,
}

/// Everything a strategy needs besides the walk itself.
pub struct StrategyContext {
    pub resolver: MetadataResolver,
    pub registry: PathRegistry,
    pub filters: FilterSet,
    /// Parent reference for SIPs that have no classification node above them.
    pub parent_id: Option<String>,
    pub file_level: String,
    pub aggregation_level: String,
}

/// A directory whose subtree is still being walked.
struct Frame {
    node: TreeNode,
    depth: usize,
    /// Structure-preserving strategy only: already classified
    /// sub-directories.
    pseudo: Vec<Pseudo>,
}

/// Traversal driver shared by every [`Grouping`].
pub struct Strategy {
    grouping: Grouping,
    ctx: StrategyContext,
    stack: Vec<Frame>,
    /// Finished nodes with no open parent.
    roots: Vec<TreeNode>,
    pseudo_roots: Vec<Pseudo>,
    created: Vec<SipId>,
    pending: VecDeque<SipPreview>,
    /// Paths mapped without belonging to any SIP.
    claimed: Vec<PathBuf>,
    ended: bool,
}
impl Strategy {
    pub fn new(grouping: Grouping, ctx: StrategyContext) -> Self {
        let grouping = match grouping {
            Grouping::PerSelection(selection) => {
                Grouping::PerSelection(selection.iter().map(|path| normalize(path)).collect())
            },
            other => other,
        };
        Self {
            grouping,
            ctx,
            stack: Vec::new(),
            roots: Vec::new(),
            pseudo_roots: Vec::new(),
            created: Vec::new(),
            pending: VecDeque::new(),
            claimed: Vec::new(),
            ended: false,
        }
    }

    pub fn grouping(&self) -> &Grouping {
        &self.grouping
    }

    /// Ids of every SIP created so far, in creation order.
    pub fn sips(&self) -> &[SipId] {
        &self.created
    }

    /// Number of SIPs created so far.
    pub fn sip_count(&self) -> usize {
        self.created.len()
    }

    /// Whether created SIPs are waiting to be pulled.
    pub fn has_next(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Drains the paths the grouping mapped outside of any SIP, so their
    /// owner can release them later.
    pub fn take_claimed(&mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.claimed)
    }

    fn claim(&mut self, path: &Path) {
        self.ctx.registry.map(path);
        self.claimed.push(path.to_path_buf());
    }

    fn is_filtered(&self, path: &Path) -> bool {
        self.ctx.filters.is_filtered(path)
    }

    /// Adds a finished node to the innermost open directory, or to the roots.
    fn attach(&mut self, node: TreeNode) {
        match self.stack.last_mut() {
            Some(frame) => frame.node.add(node),
            None => self.roots.push(node),
        }
    }

    /// Creates a SIP for a directory node, holding the directory's contents.
    fn create_from_directory(&mut self, node: TreeNode, parent_id: Option<String>) -> Option<SipId> {
        if node.files().is_empty() {
            debug!(path = %node.path().display(), "skipping directory without files");
            return None;
        }
        let name = node.name();
        let source = node.path().to_path_buf();
        Some(self.create(name, SipKind::Sip, node.into_children(), Some(source), parent_id))
    }

    fn create_from_file(&mut self, node: TreeNode, parent_id: Option<String>) -> SipId {
        let name = node.name();
        let source = node.path().to_path_buf();
        self.create(name, SipKind::Sip, vec![node], Some(source), parent_id)
    }

    /// Builds a SIP, attaches its metadata and queues it. Every path a SIP
    /// holds is marked mapped straight away; classification nodes are left
    /// to the caller.
    fn create(
        &mut self,
        name: String,
        kind: SipKind,
        files: Vec<TreeNode>,
        source: Option<PathBuf>,
        parent_id: Option<String>,
    ) -> SipId {
        let mut sip = SipPreview::new(name, kind, files);
        sip.source = source;
        sip.parent_id = parent_id.or_else(|| self.ctx.parent_id.clone());
        sip.description_level = match kind {
            SipKind::Sip => self.ctx.file_level.clone(),
            SipKind::Classification => self.ctx.aggregation_level.clone(),
        };
        self.ctx.resolver.resolve(&mut sip);
        if kind == SipKind::Sip {
            for path in sip.paths() {
                self.ctx.registry.map(path);
            }
        }
        debug!(sip = %sip.id, name = %sip.name, files = sip.file_count(), "created SIP");
        let id = sip.id;
        self.created.push(id);
        self.pending.push_back(sip);
        id
    }

    fn finish_directory(&mut self, frame: Frame) {
        match &self.grouping {
            Grouping::SingleSip => single::post_directory(self, frame),
            Grouping::PerFile => {},
            Grouping::PerSelection(_) => per_selection::post_directory(self, frame),
            Grouping::PerFolder { level } => {
                let level = *level;
                per_folder::post_directory(self, frame, level)
            },
            Grouping::Structure => structure::post_directory(self, frame),
        }
    }
}
impl Iterator for Strategy {
    type Item = SipPreview;

    /// Pulls the next created SIP.
    fn next(&mut self) -> Option<SipPreview> {
        self.pending.pop_front()
    }
}
impl Visitor for Strategy {
    fn pre_visit_directory(&mut self, path: &Path, depth: usize) {
        if self.grouping == Grouping::PerFile || self.is_filtered(path) {
            return;
        }
        self.stack.push(Frame { node: TreeNode::directory(path), depth, pseudo: Vec::new() });
    }

    fn visit_file(&mut self, path: &Path, depth: usize) {
        if self.is_filtered(path) || self.ctx.resolver.is_metadata(path) {
            return;
        }
        let node = TreeNode::file(path);
        match &self.grouping {
            Grouping::SingleSip => self.attach(node),
            Grouping::PerFile => per_file::file(self, node),
            Grouping::PerSelection(_) => per_selection::file(self, node),
            Grouping::PerFolder { .. } => per_folder::file(self, node, depth),
            Grouping::Structure => structure::file(self, node),
        }
    }

    fn post_visit_directory(&mut self, path: &Path, _depth: usize) {
        if self.grouping == Grouping::PerFile {
            if !self.is_filtered(path) {
                per_file::post_directory(self, path);
            }
            return;
        }
        // Filtered and unreadable directories never pushed a frame.
        if self.stack.last().is_none_or(|frame| frame.node.path() != path) {
            return;
        }
        if let Some(frame) = self.stack.pop() {
            self.finish_directory(frame);
        }
    }

    fn visit_failed(&mut self, path: &Path, depth: usize, error: &Error) {
        debug!(path = %path.display(), depth, ?error, "path skipped");
    }

    /// Closes any directories left open by a cancelled walk, then lets the
    /// grouping create its final SIPs.
    #[instrument(skip_all, fields(grouping = ?self.grouping))]
    fn end(&mut self) {
        if self.ended {
            return;
        }
        while let Some(frame) = self.stack.pop() {
            self.finish_directory(frame);
        }
        match &self.grouping {
            Grouping::SingleSip => single::end(self),
            Grouping::Structure => structure::end(self),
            _ => {},
        }
        self.ended = true;
        debug!(sips = self.created.len(), "strategy ended");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::resolve::MetadataSource;
    use crate::walk::TreeWalker;
    use sipkit_metadata::MemoryCatalog;
    use std::fs;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    /// ```text
    /// root/
    ///   a.txt
    ///   docs/b.txt
    ///   docs/c.txt
    ///   docs/inner/d.txt
    ///   empty/
    ///   photos/e.jpg
    /// ```
    pub(crate) fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(root.join("docs/inner")).unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();
        fs::create_dir_all(root.join("photos")).unwrap();
        for file in ["a.txt", "docs/b.txt", "docs/c.txt", "docs/inner/d.txt", "photos/e.jpg"] {
            fs::write(root.join(file), file).unwrap();
        }
        dir
    }

    pub(crate) async fn context(registry: &PathRegistry, sources: &[PathBuf]) -> StrategyContext {
        let catalog = Arc::new(MemoryCatalog::empty());
        let resolver = MetadataResolver::new(MetadataSource::None, catalog, sources).await.unwrap();
        context_with(registry, sources, resolver)
    }

    pub(crate) fn context_with(
        registry: &PathRegistry,
        sources: &[PathBuf],
        resolver: MetadataResolver,
    ) -> StrategyContext {
        StrategyContext {
            resolver,
            registry: registry.clone(),
            filters: registry.filters_for(sources),
            parent_id: Some("destination".to_string()),
            file_level: "file".to_string(),
            aggregation_level: "series".to_string(),
        }
    }

    /// A resolver attaching `*.meta.xml` files found next to the content.
    pub(crate) async fn same_directory_resolver(sources: &[PathBuf]) -> MetadataResolver {
        let catalog = Arc::new(MemoryCatalog::empty().with_config("pattern.note", "*.meta.xml"));
        let source = MetadataSource::SameDirectory { template_type: "note".to_string() };
        MetadataResolver::new(source, catalog, sources).await.unwrap()
    }

    /// Walks `sources` with a fresh strategy and drains every SIP.
    pub(crate) async fn run(grouping: Grouping, sources: &[PathBuf], registry: &PathRegistry) -> Vec<SipPreview> {
        run_in(Strategy::new(grouping, context(registry, sources).await), sources).await
    }

    pub(crate) async fn run_in(mut strategy: Strategy, sources: &[PathBuf]) -> Vec<SipPreview> {
        TreeWalker::new(sources.to_vec(), CancellationToken::new()).walk(&mut strategy).await;
        assert!(strategy.is_ended());
        let count = strategy.sip_count();
        let sips: Vec<SipPreview> = strategy.by_ref().collect();
        assert_eq!(sips.len(), count);
        sips
    }

    pub(crate) fn names(sips: &[SipPreview]) -> Vec<String> {
        sips.iter().map(|sip| sip.name.clone()).collect()
    }

    /// Every content file path across `sips`, sorted.
    pub(crate) fn files(sips: &[SipPreview]) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = sips
            .iter()
            .flat_map(|sip| sip.representations.iter())
            .flat_map(|rep| rep.files.iter())
            .flat_map(TreeNode::files)
            .map(Path::to_path_buf)
            .collect();
        files.sort();
        files
    }
}
