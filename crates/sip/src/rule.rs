//! Rules tie a selection to a grouping and a metadata source, and own the
//! SIPs produced by walking it.

use crate::error::{ErrorKind, Result};
use crate::filter::FilterSet;
use crate::registry::PathRegistry;
use crate::resolve::{MetadataResolver, MetadataSource};
use crate::sip::{SipId, SipPreview};
use crate::strategy::{Grouping, Strategy, StrategyContext};
use crate::walk::{TreeWalker, Visitor, WalkSummary};
use async_stream::stream;
use exn::OptionExt;
use futures::{Stream, StreamExt};
use sipkit_metadata::Catalog;
use sipkit_metadata::catalog::{AGGREGATION_LEVEL_KEY, FILE_LEVEL_KEY};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Newly created SIPs are published at most this often while walking.
const PUBLISH_INTERVAL: Duration = Duration::from_millis(100);
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(Uuid);
impl RuleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}
impl Default for RuleId {
    fn default() -> Self {
        Self::new()
    }
}
impl Display for RuleId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "rule-{}", self.0)
    }
}

/// Change notifications published by a [`Rule`].
#[derive(Debug, Clone, PartialEq)]
pub enum RuleEvent {
    /// A walk has begun; previous SIPs were released.
    Started { rule: RuleId },
    /// A batch of SIPs was created.
    SipsAdded { rule: RuleId, added: usize, total: usize },
    /// The walk finished (or was cancelled) and every SIP is published.
    Finished { rule: RuleId, sips: usize, cancelled: bool },
    /// A single SIP was removed.
    SipRemoved { rule: RuleId, sip: SipId },
    /// The rule released every path and holds no SIPs.
    Removed { rule: RuleId },
}

/// Progress of [`Rule::remove`].
#[derive(Debug, Clone, PartialEq)]
pub enum RemoveEvent {
    /// Every SIP is marked removed; `paths` will be reverted.
    Started { paths: usize },
    /// Fraction of paths reverted so far, in `0.0..=1.0`.
    Progress(f64),
    Removed,
}

/// What a rule walks and how it groups and describes the result.
#[derive(Debug, Clone)]
pub struct RuleConfig {
    pub sources: Vec<PathBuf>,
    pub grouping: Grouping,
    pub metadata: MetadataSource,
    /// Classification destination every top-level SIP attaches to.
    pub destination: Option<String>,
}

#[derive(Default)]
struct RuleState {
    filters: FilterSet,
    sips: BTreeMap<SipId, SipPreview>,
    order: Vec<SipId>,
    /// Directories mapped by the grouping that no SIP holds.
    claimed: Vec<PathBuf>,
}
impl RuleState {
    /// Every path held by the rule.
    fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> =
            self.sips.values().flat_map(SipPreview::paths).chain(self.claimed.iter().cloned()).collect();
        paths.sort();
        paths.dedup();
        paths
    }

    fn clear(&mut self) -> Vec<PathBuf> {
        let paths = self.paths();
        self.sips.clear();
        self.order.clear();
        self.claimed.clear();
        paths
    }
}

struct RuleInner {
    id: RuleId,
    config: RuleConfig,
    registry: PathRegistry,
    catalog: Arc<dyn Catalog>,
    state: Mutex<RuleState>,
    events: broadcast::Sender<RuleEvent>,
}

/// A handle to a rule. Clones share the same rule.
#[derive(Clone)]
pub struct Rule {
    inner: Arc<RuleInner>,
}
impl Rule {
    pub fn new(config: RuleConfig, registry: PathRegistry, catalog: Arc<dyn Catalog>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = RuleInner {
            id: RuleId::new(),
            config,
            registry,
            catalog,
            state: Mutex::new(RuleState::default()),
            events,
        };
        Self { inner: Arc::new(inner) }
    }

    pub fn id(&self) -> RuleId {
        self.inner.id
    }

    pub fn config(&self) -> &RuleConfig {
        &self.inner.config
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.inner.catalog
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuleEvent> {
        self.inner.events.subscribe()
    }

    fn state(&self) -> MutexGuard<'_, RuleState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: RuleEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    /// Filters derived on the last [`apply`](Self::apply).
    pub fn filters(&self) -> FilterSet {
        self.state().filters.clone()
    }

    pub fn sip_count(&self) -> usize {
        self.state().sips.len()
    }

    /// Snapshots of every SIP, in creation order.
    pub fn sips(&self) -> Vec<SipPreview> {
        let state = self.state();
        state.order.iter().filter_map(|id| state.sips.get(id)).cloned().collect()
    }

    pub fn sip(&self, id: SipId) -> Option<SipPreview> {
        self.state().sips.get(&id).cloned()
    }

    /// Edits a SIP in place.
    pub fn update_sip<R>(&self, id: SipId, edit: impl FnOnce(&mut SipPreview) -> R) -> Result<R> {
        let mut state = self.state();
        let sip = state.sips.get_mut(&id).ok_or_raise(|| ErrorKind::UnknownSip(id.to_string()))?;
        Ok(edit(sip))
    }

    /// Walks the rule's sources and rebuilds its SIPs.
    ///
    /// Paths held by the previous run are released first, so re-applying a
    /// rule never filters out its own content. SIPs are published in batches
    /// while walking and completely once the walk ends.
    #[instrument(skip_all, fields(rule = %self.id()))]
    pub async fn apply(&self, cancel: CancellationToken) -> Result<WalkSummary> {
        let released = self.state().clear();
        for path in &released {
            self.inner.registry.reset(path);
        }
        let config = &self.inner.config;
        let filters = self.inner.registry.filters_for(&config.sources);
        self.state().filters = filters.clone();

        let catalog = &self.inner.catalog;
        let ctx = StrategyContext {
            resolver: MetadataResolver::new(config.metadata.clone(), catalog.clone(), &config.sources).await?,
            registry: self.inner.registry.clone(),
            filters,
            parent_id: config.destination.clone(),
            file_level: catalog.config(FILE_LEVEL_KEY).unwrap_or_else(|| "file".to_string()),
            aggregation_level: catalog.config(AGGREGATION_LEVEL_KEY).unwrap_or_else(|| "series".to_string()),
        };
        self.publish(RuleEvent::Started { rule: self.id() });
        let mut publisher = Publisher::new(self, Strategy::new(config.grouping.clone(), ctx));
        let summary = TreeWalker::new(config.sources.clone(), cancel).walk(&mut publisher).await;
        let sips = self.sip_count();
        info!(sips, cancelled = summary.cancelled, "rule applied");
        self.publish(RuleEvent::Finished { rule: self.id(), sips, cancelled: summary.cancelled });
        Ok(summary)
    }

    /// Removes every SIP and returns their paths to the normal state.
    ///
    /// All SIPs are marked removed before any path is reverted. The stream
    /// reports fractional progress while reverting.
    pub fn remove(&self) -> impl Stream<Item = RemoveEvent> + '_ {
        stream! {
            let paths = {
                let mut state = self.state();
                for sip in state.sips.values_mut() {
                    sip.removed = true;
                }
                state.paths()
            };
            let total = paths.len();
            yield RemoveEvent::Started { paths: total };

            let mut reported = 0;
            for (done, path) in paths.iter().enumerate() {
                self.inner.registry.reset(path);
                let percent = (done + 1) * 100 / total;
                if percent > reported {
                    reported = percent;
                    yield RemoveEvent::Progress((done + 1) as f64 / total as f64);
                }
            }

            self.state().clear();
            debug!(rule = %self.id(), paths = total, "rule removed");
            self.publish(RuleEvent::Removed { rule: self.id() });
            yield RemoveEvent::Removed;
        }
    }

    /// Removes one SIP, releasing its paths. A rule left without SIPs
    /// removes itself; returns whether that happened.
    #[instrument(skip(self), fields(rule = %self.id()))]
    pub async fn remove_sip(&self, id: SipId) -> Result<bool> {
        let (paths, remaining) = {
            let mut state = self.state();
            let mut sip = state.sips.remove(&id).ok_or_raise(|| ErrorKind::UnknownSip(id.to_string()))?;
            sip.removed = true;
            state.order.retain(|other| *other != id);
            // Paths shared with the remaining SIPs, like a single metadata
            // file, stay claimed.
            let held: BTreeSet<PathBuf> = state.paths().into_iter().collect();
            let released: Vec<PathBuf> = sip.paths().into_iter().filter(|path| !held.contains(path)).collect();
            (released, state.sips.len())
        };
        for path in &paths {
            self.inner.registry.reset(path);
        }
        self.publish(RuleEvent::SipRemoved { rule: self.id(), sip: id });
        if remaining > 0 {
            return Ok(false);
        }
        let mut removal = pin!(self.remove());
        while removal.next().await.is_some() {}
        Ok(true)
    }

    fn store(&self, sips: Vec<SipPreview>) -> usize {
        let mut state = self.state();
        for sip in sips {
            state.order.push(sip.id);
            state.sips.insert(sip.id, sip);
        }
        state.sips.len()
    }

    /// Whether `path` is held by one of this rule's SIPs.
    pub fn holds(&self, path: &Path) -> bool {
        self.state().sips.values().any(|sip| sip.paths().iter().any(|held| held == path))
    }
}

/// Forwards walk events to the strategy and moves finished SIPs into the
/// rule in rate-limited batches.
struct Publisher<'a> {
    rule: &'a Rule,
    strategy: Strategy,
    last: Instant,
}
impl<'a> Publisher<'a> {
    fn new(rule: &'a Rule, strategy: Strategy) -> Self {
        Self { rule, strategy, last: Instant::now() }
    }

    fn flush(&mut self, force: bool) {
        if !self.strategy.has_next() || (!force && self.last.elapsed() < PUBLISH_INTERVAL) {
            return;
        }
        let batch: Vec<SipPreview> = self.strategy.by_ref().collect();
        let added = batch.len();
        let total = self.rule.store(batch);
        self.last = Instant::now();
        self.rule.publish(RuleEvent::SipsAdded { rule: self.rule.id(), added, total });
    }
}
impl Visitor for Publisher<'_> {
    fn pre_visit_directory(&mut self, path: &Path, depth: usize) {
        self.strategy.pre_visit_directory(path, depth);
        self.flush(false);
    }

    fn visit_file(&mut self, path: &Path, depth: usize) {
        self.strategy.visit_file(path, depth);
        self.flush(false);
    }

    fn post_visit_directory(&mut self, path: &Path, depth: usize) {
        self.strategy.post_visit_directory(path, depth);
        self.flush(false);
    }

    fn visit_failed(&mut self, path: &Path, depth: usize, error: &crate::error::Error) {
        self.strategy.visit_failed(path, depth, error);
    }

    fn end(&mut self) {
        self.strategy.end();
        self.flush(true);
        let claimed = self.strategy.take_claimed();
        self.rule.state().claimed.extend(claimed);
    }
}
