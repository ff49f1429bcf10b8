use crate::error::{Error, ErrorKind};
use crate::format::ExportFormat;
use crate::package::PackageJob;
use crate::progress::{Action, Progress, Reporter};
use async_stream::stream;
use exn::ResultExt;
use futures::Stream;
use sipkit_metadata::Catalog;
use sipkit_metadata::catalog::LANGUAGE_KEY;
use sipkit_sip::{SipId, SipPreview};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// A SIP to export, and the destination it attaches to when it has no
/// parent of its own.
#[derive(Debug, Clone)]
pub struct ExportItem {
    pub sip: SipPreview,
    pub destination: Option<String>,
}
impl From<SipPreview> for ExportItem {
    fn from(sip: SipPreview) -> Self {
        Self { sip, destination: None }
    }
}

/// A SIP that could not be exported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsuccessful {
    pub sip: SipId,
    pub name: String,
    pub cause: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    /// Paths of the packages written, in export order.
    pub created: Vec<PathBuf>,
    pub unsuccessful: Vec<Unsuccessful>,
    pub cancelled: bool,
}

#[derive(Debug)]
pub enum ExportEvent {
    Started { total: usize },
    Created { sip: SipId, path: PathBuf },
    Failed { sip: SipId, name: String, error: Error },
    Finished(ExportSummary),
}

/// Writes SIPs to packages, one at a time.
pub struct Exporter {
    format: ExportFormat,
    output: PathBuf,
    catalog: Arc<dyn Catalog>,
    language: Option<String>,
    progress: Arc<watch::Sender<Progress>>,
}
impl Exporter {
    pub fn new(format: ExportFormat, output: impl Into<PathBuf>, catalog: Arc<dyn Catalog>) -> Self {
        let language = catalog.config(LANGUAGE_KEY);
        Self {
            format,
            output: output.into(),
            catalog,
            language,
            progress: Arc::new(watch::Sender::new(Progress::default())),
        }
    }

    pub fn format(&self) -> ExportFormat {
        self.format
    }

    pub fn progress(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    /// Exports `items` in order. Removed SIPs are skipped.
    ///
    /// Each package is built on a blocking thread. A failing SIP is recorded
    /// and the export carries on with the next one. Cancellation is checked
    /// before each SIP starts; a package already being written is finished.
    #[instrument(skip_all, fields(format = %self.format, output = %self.output.display()))]
    pub fn export(&self, items: Vec<ExportItem>, cancel: CancellationToken) -> impl Stream<Item = ExportEvent> + '_ {
        stream! {
            let items: Vec<ExportItem> = items.into_iter().filter(|item| !item.sip.removed).collect();
            let total = items.len();
            self.progress.send_replace(Progress { total, ..Progress::default() });
            yield ExportEvent::Started { total };

            let started = Instant::now();
            let mut summary = ExportSummary::default();
            for item in items {
                if cancel.is_cancelled() {
                    summary.cancelled = true;
                    break;
                }
                let sip = item.sip.id;
                let name = item.sip.name.clone();
                self.progress.send_modify(|progress| {
                    progress.current = Some(name.clone());
                    progress.action = Action::Creating;
                });
                let job = PackageJob {
                    parent: item.sip.parent_id.clone().or(item.destination),
                    sip: item.sip,
                    output: self.output.clone(),
                    catalog: self.catalog.clone(),
                    language: self.language.clone(),
                    reporter: Reporter::new(self.progress.clone()),
                };
                let format = self.format;
                let result = tokio::task::spawn_blocking(move || format.build(job))
                    .await
                    .or_raise(|| ErrorKind::Task)
                    .and_then(|result| result);
                let event = match result {
                    Ok(path) => {
                        info!(%sip, path = %path.display(), "package created");
                        summary.created.push(path.clone());
                        self.progress.send_modify(|progress| progress.created += 1);
                        ExportEvent::Created { sip, path }
                    },
                    Err(error) => {
                        warn!(%sip, ?error, "unable to export SIP");
                        summary.unsuccessful.push(Unsuccessful { sip, name: name.clone(), cause: (*error).to_string() });
                        self.progress.send_modify(|progress| progress.errors += 1);
                        ExportEvent::Failed { sip, name, error }
                    },
                };
                self.progress.send_modify(|progress| progress.estimate(started.elapsed()));
                yield event;
            }

            self.progress.send_modify(|progress| {
                progress.current = None;
                progress.action = Action::Finished;
            });
            info!(
                created = summary.created.len(),
                errors = summary.unsuccessful.len(),
                cancelled = summary.cancelled,
                "export finished"
            );
            yield ExportEvent::Finished(summary);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use sipkit_metadata::MemoryCatalog;
    use sipkit_sip::{SipKind, TreeNode};
    use std::fs;
    use std::path::Path;

    fn sip(dir: &Path, name: &str) -> SipPreview {
        let path = dir.join(name);
        fs::write(&path, name).unwrap();
        SipPreview::new(name, SipKind::Sip, vec![TreeNode::file(path)])
    }

    async fn run(exporter: &Exporter, items: Vec<ExportItem>, cancel: CancellationToken) -> Vec<ExportEvent> {
        exporter.export(items, cancel).collect().await
    }

    fn summary(events: &[ExportEvent]) -> &ExportSummary {
        match events.last() {
            Some(ExportEvent::Finished(summary)) => summary,
            other => panic!("unexpected last event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let broken = SipPreview::new("broken", SipKind::Sip, vec![TreeNode::file(input.path().join("gone.txt"))]);
        let broken_id = broken.id;
        let items: Vec<ExportItem> =
            vec![sip(input.path(), "one.txt"), broken, sip(input.path(), "two.txt")].into_iter().map(Into::into).collect();

        let exporter = Exporter::new(ExportFormat::BagIt, output.path(), Arc::new(MemoryCatalog::new()));
        let events = run(&exporter, items, CancellationToken::new()).await;
        assert!(matches!(events[0], ExportEvent::Started { total: 3 }));
        assert!(matches!(&events[2], ExportEvent::Failed { sip, .. } if *sip == broken_id));

        let summary = summary(&events);
        assert_eq!(summary.created.len(), 2);
        assert_eq!(summary.unsuccessful.len(), 1);
        assert_eq!(summary.unsuccessful[0].name, "broken");
        let mut written: Vec<String> =
            fs::read_dir(output.path()).unwrap().map(|e| e.unwrap().file_name().to_string_lossy().into_owned()).collect();
        written.sort();
        assert_eq!(written.len(), 2);
        assert!(written.iter().all(|name| name.ends_with(".txt.zip")), "{written:?}");

        let progress = exporter.progress().borrow().clone();
        assert_eq!((progress.created, progress.errors, progress.total), (2, 1, 3));
        assert_eq!(progress.action, Action::Finished);
        assert_eq!(progress.fraction(), 1.0);
        assert_eq!(progress.remaining, Some(std::time::Duration::ZERO));
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let exporter = Exporter::new(ExportFormat::EArk, output.path(), Arc::new(MemoryCatalog::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let events = run(&exporter, vec![sip(input.path(), "a.txt").into()], cancel).await;
        let summary = summary(&events);
        assert!(summary.cancelled);
        assert!(summary.created.is_empty());
        assert_eq!(fs::read_dir(output.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_removed_sips_are_skipped_and_destination_applies() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let mut removed = sip(input.path(), "removed.txt");
        removed.removed = true;
        let kept = ExportItem { sip: sip(input.path(), "kept.txt"), destination: Some("fonds-9".into()) };

        let exporter = Exporter::new(ExportFormat::EArk, output.path(), Arc::new(MemoryCatalog::new()));
        let events = run(&exporter, vec![removed.into(), kept], CancellationToken::new()).await;
        let summary = summary(&events);
        assert_eq!(summary.created.len(), 1);
        let mets = fs::read_to_string(summary.created[0].join("METS.xml")).unwrap();
        assert!(mets.contains(r#"xlink:href="fonds-9""#));
    }
}
