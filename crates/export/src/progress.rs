use derive_more::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// What the exporter is doing with the current SIP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum Action {
    #[default]
    #[display("waiting")]
    Idle,
    #[display("creating package")]
    Creating,
    #[display("copying content")]
    CopyingContent,
    #[display("writing metadata")]
    WritingMetadata,
    #[display("writing manifests")]
    WritingManifests,
    #[display("compressing")]
    Compressing,
    #[display("finished")]
    Finished,
}

/// Polled state of an export session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    pub created: usize,
    pub errors: usize,
    pub total: usize,
    /// Name of the SIP being exported.
    pub current: Option<String>,
    pub action: Action,
    /// Estimated from the average time per finished SIP.
    pub remaining: Option<Duration>,
}
impl Progress {
    pub fn done(&self) -> usize {
        self.created + self.errors
    }

    pub fn fraction(&self) -> f64 {
        match self.total {
            0 => 0.0,
            total => self.done() as f64 / total as f64,
        }
    }

    pub(crate) fn estimate(&mut self, elapsed: Duration) {
        let done = self.done();
        self.remaining = match done {
            0 => None,
            _ => Some(elapsed.div_f64(done as f64).mul_f64(self.total.saturating_sub(done) as f64)),
        };
    }
}

/// Lets package builders running on blocking threads announce their action.
#[derive(Clone)]
pub(crate) struct Reporter(Arc<watch::Sender<Progress>>);
impl Reporter {
    pub(crate) fn new(sender: Arc<watch::Sender<Progress>>) -> Self {
        Self(sender)
    }

    pub(crate) fn action(&self, action: Action) {
        self.0.send_modify(|progress| progress.action = action);
    }
}
