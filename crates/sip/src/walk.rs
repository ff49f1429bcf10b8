//! Cancellable depth-first filesystem traversal.
//!
//! The walker delivers events to a [`Visitor`] in name-sorted order. It never
//! fails: unreadable directories are reported through
//! [`Visitor::visit_failed`] and traversal carries on with their siblings.

use crate::error::{Error, ErrorKind};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Receives traversal events.
///
/// For each directory the walker delivers either
/// [`pre_visit_directory`](Self::pre_visit_directory) or, if the directory
/// cannot be read, [`visit_failed`](Self::visit_failed); both are always
/// followed by [`post_visit_directory`](Self::post_visit_directory) once the
/// subtree is done. A start path that cannot be read at all is reported with
/// `visit_failed` alone. Start paths have depth `0`.
pub trait Visitor: Send {
    fn pre_visit_directory(&mut self, path: &Path, depth: usize);
    fn visit_file(&mut self, path: &Path, depth: usize);
    fn post_visit_directory(&mut self, path: &Path, depth: usize);
    fn visit_failed(&mut self, path: &Path, depth: usize, error: &Error);
    /// Called exactly once, after every start path or on cancellation.
    fn end(&mut self);
}

/// Counters describing a finished walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkSummary {
    pub directories: u64,
    pub files: u64,
    pub failures: u64,
    pub cancelled: bool,
}

enum Step {
    Enter(PathBuf, usize),
    File(PathBuf, usize),
    Exit(PathBuf, usize),
}

/// A single-use traversal over a set of start paths.
pub struct TreeWalker {
    starts: Vec<PathBuf>,
    cancel: CancellationToken,
}
impl TreeWalker {
    pub fn new(starts: impl IntoIterator<Item = PathBuf>, cancel: CancellationToken) -> Self {
        Self { starts: starts.into_iter().collect(), cancel }
    }

    /// Walks every start path in order, then calls [`Visitor::end`].
    #[instrument(skip_all, fields(starts = self.starts.len()))]
    pub async fn walk<V: Visitor + ?Sized>(self, visitor: &mut V) -> WalkSummary {
        let mut summary = WalkSummary::default();
        'starts: for start in &self.starts {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break 'starts;
            }
            let mut stack = match fs::metadata(start).await {
                Ok(metadata) if metadata.is_dir() => vec![Step::Enter(start.clone(), 0)],
                Ok(_) => vec![Step::File(start.clone(), 0)],
                Err(e) => {
                    let error = Error::from(ErrorKind::from_io(e, start));
                    warn!(path = %start.display(), error = ?error, "unable to read start path");
                    summary.failures += 1;
                    visitor.visit_failed(start, 0, &error);
                    continue 'starts;
                },
            };
            while let Some(step) = stack.pop() {
                if self.cancel.is_cancelled() {
                    summary.cancelled = true;
                    break 'starts;
                }
                match step {
                    Step::Enter(dir, depth) => {
                        summary.directories += 1;
                        stack.push(Step::Exit(dir.clone(), depth));
                        match read_sorted(&dir).await {
                            Ok(entries) => {
                                visitor.pre_visit_directory(&dir, depth);
                                for (path, is_dir) in entries.into_iter().rev() {
                                    stack.push(match is_dir {
                                        true => Step::Enter(path, depth + 1),
                                        false => Step::File(path, depth + 1),
                                    });
                                }
                            },
                            Err(error) => {
                                warn!(path = %dir.display(), error = ?error, "unable to read directory");
                                summary.failures += 1;
                                visitor.visit_failed(&dir, depth, &error);
                            },
                        }
                    },
                    Step::File(path, depth) => {
                        summary.files += 1;
                        visitor.visit_file(&path, depth);
                    },
                    Step::Exit(dir, depth) => visitor.post_visit_directory(&dir, depth),
                }
            }
        }
        visitor.end();
        debug!(?summary, "walk finished");
        summary
    }
}

/// Lists a directory as `(path, is_dir)` pairs sorted by name.
///
/// Links to files count as files. Links to directories are skipped, so a link
/// back up the tree cannot send the walk round in circles. Broken links and
/// entries whose type cannot be read are dropped.
async fn read_sorted(dir: &Path) -> Result<Vec<(PathBuf, bool)>, Error> {
    let mut entries = fs::read_dir(dir).await.map_err(|e| ErrorKind::from_io(e, dir))?;
    let mut found = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => exn::bail!(ErrorKind::from_io(e, dir)),
        };
        let path = entry.path();
        let file_type = match entry.file_type().await {
            Ok(file_type) => file_type,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "skipping unreadable entry");
                continue;
            },
        };
        if !file_type.is_symlink() {
            found.push((path, file_type.is_dir()));
            continue;
        }
        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_dir() => debug!(path = %path.display(), "skipping directory link"),
            Ok(_) => found.push((path, false)),
            Err(e) => debug!(path = %path.display(), error = %e, "skipping broken link"),
        }
    }
    found.sort_by(|a, b| a.0.file_name().cmp(&b.0.file_name()));
    Ok(found)
}
