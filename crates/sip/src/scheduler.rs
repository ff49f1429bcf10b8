//! Background execution of rule walks.
//!
//! Rules are applied one at a time, in submission order, by a single worker
//! task. Each submission gets its own cancellation token and a watch channel
//! carrying its [`RunState`].

use crate::error::{ErrorKind, Result};
use crate::rule::{Rule, RuleId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotSubmitted,
    Queued,
    Running,
    Done,
    Cancelled,
    /// The rule could not be applied; the error was logged.
    Failed,
}
impl RunState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Failed)
    }
}

struct Job {
    rule: Rule,
    cancel: CancellationToken,
    state: watch::Sender<RunState>,
}

struct Run {
    cancel: CancellationToken,
    state: watch::Receiver<RunState>,
}

type Runs = Arc<Mutex<HashMap<RuleId, Run>>>;

pub struct RuleScheduler {
    queue: mpsc::UnboundedSender<Job>,
    runs: Runs,
    worker: JoinHandle<()>,
}
impl RuleScheduler {
    /// Spawns the worker on the current Tokio runtime.
    pub fn start() -> Self {
        let (queue, jobs) = mpsc::unbounded_channel();
        let worker = tokio::spawn(work(jobs));
        Self { queue, runs: Arc::default(), worker }
    }

    fn runs(&self) -> MutexGuard<'_, HashMap<RuleId, Run>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues `rule` for application. A run of the same rule that is still
    /// queued or running is cancelled first.
    #[instrument(skip_all, fields(rule = %rule.id()))]
    pub fn submit(&self, rule: Rule) -> Result<()> {
        let cancel = CancellationToken::new();
        let (state, receiver) = watch::channel(RunState::Queued);
        let id = rule.id();
        let job = Job { rule, cancel: cancel.clone(), state };
        self.queue.send(job).map_err(|_| ErrorKind::SchedulerClosed)?;
        let previous = self.runs().insert(id, Run { cancel, state: receiver });
        if let Some(previous) = previous {
            debug!("superseding previous run");
            previous.cancel.cancel();
        }
        Ok(())
    }

    /// Cancels the latest run of a rule. Returns `false` if it already
    /// finished or was never submitted.
    pub fn cancel(&self, id: RuleId) -> bool {
        let runs = self.runs();
        match runs.get(&id) {
            Some(run) if !run.state.borrow().is_finished() => {
                run.cancel.cancel();
                true
            },
            _ => false,
        }
    }

    pub fn state(&self, id: RuleId) -> RunState {
        self.runs().get(&id).map(|run| *run.state.borrow()).unwrap_or(RunState::NotSubmitted)
    }

    /// Waits for the latest run of a rule to finish.
    pub async fn wait(&self, id: RuleId) -> RunState {
        let Some(mut state) = self.runs().get(&id).map(|run| run.state.clone()) else {
            return RunState::NotSubmitted;
        };
        match state.wait_for(RunState::is_finished).await {
            Ok(finished) => *finished,
            // The worker went away without reporting.
            Err(_) => RunState::Cancelled,
        }
    }

    /// Cancels every pending run and waits for the worker to exit.
    pub async fn shutdown(self) {
        for run in self.runs().values() {
            run.cancel.cancel();
        }
        drop(self.queue);
        if let Err(error) = self.worker.await {
            warn!(%error, "rule scheduler worker failed");
        }
        info!("rule scheduler stopped");
    }
}

async fn work(mut jobs: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = jobs.recv().await {
        let rule = job.rule.id();
        if job.cancel.is_cancelled() {
            debug!(%rule, "skipping cancelled run");
            job.state.send_replace(RunState::Cancelled);
            continue;
        }
        job.state.send_replace(RunState::Running);
        let finished = match job.rule.apply(job.cancel.clone()).await {
            Ok(summary) if summary.cancelled => RunState::Cancelled,
            Ok(_) => RunState::Done,
            Err(error) => {
                warn!(%rule, ?error, "unable to apply rule");
                RunState::Failed
            },
        };
        job.state.send_replace(finished);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PathRegistry;
    use crate::resolve::MetadataSource;
    use crate::rule::RuleConfig;
    use crate::strategy::Grouping;
    use crate::strategy::testing::fixture;
    use sipkit_metadata::MemoryCatalog;
    use std::path::PathBuf;

    fn rule(source: PathBuf, metadata: MetadataSource) -> Rule {
        let config = RuleConfig { sources: vec![source], grouping: Grouping::PerFile, metadata, destination: None };
        Rule::new(config, PathRegistry::new(), Arc::new(MemoryCatalog::empty()))
    }

    #[tokio::test]
    async fn test_runs_in_order() {
        let dir = fixture();
        let root = dir.path().join("root");
        let scheduler = RuleScheduler::start();
        let first = rule(root.join("docs"), MetadataSource::None);
        let second = rule(root.join("photos"), MetadataSource::None);
        assert_eq!(scheduler.state(first.id()), RunState::NotSubmitted);

        scheduler.submit(first.clone()).unwrap();
        scheduler.submit(second.clone()).unwrap();
        assert_eq!(scheduler.state(second.id()), RunState::Queued);
        assert_eq!(scheduler.wait(first.id()).await, RunState::Done);
        assert_eq!(scheduler.wait(second.id()).await, RunState::Done);
        assert_eq!(first.sip_count(), 3);
        assert_eq!(second.sip_count(), 1);
        assert!(!scheduler.cancel(first.id()));
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_queued_run() {
        let dir = fixture();
        let root = dir.path().join("root");
        let scheduler = RuleScheduler::start();
        let first = rule(root.clone(), MetadataSource::None);
        let second = rule(root.join("photos"), MetadataSource::None);
        scheduler.submit(first.clone()).unwrap();
        scheduler.submit(second.clone()).unwrap();
        // The worker has not been polled yet on this runtime.
        assert!(scheduler.cancel(second.id()));
        assert_eq!(scheduler.wait(second.id()).await, RunState::Cancelled);
        assert_eq!(scheduler.wait(first.id()).await, RunState::Done);
        assert_eq!(second.sip_count(), 0);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_resubmission_supersedes() {
        let dir = fixture();
        let scheduler = RuleScheduler::start();
        let rule = rule(dir.path().join("root"), MetadataSource::None);
        scheduler.submit(rule.clone()).unwrap();
        scheduler.submit(rule.clone()).unwrap();
        assert_eq!(scheduler.wait(rule.id()).await, RunState::Done);
        assert_eq!(rule.sip_count(), 5);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_run() {
        let dir = fixture();
        let scheduler = RuleScheduler::start();
        let metadata = MetadataSource::DiffDirectory { directory: dir.path().join("missing"), template_type: None };
        let rule = rule(dir.path().join("root"), metadata);
        scheduler.submit(rule.clone()).unwrap();
        assert_eq!(scheduler.wait(rule.id()).await, RunState::Failed);
        scheduler.shutdown().await;
    }
}
