//! Attaching descriptive metadata to freshly built SIPs.

use crate::error::{ErrorKind, Result};
use crate::sip::SipPreview;
use exn::ResultExt;
use globset::{Glob, GlobMatcher};
use sipkit_metadata::Catalog;
use sipkit_metadata::catalog::LANGUAGE_KEY;
use sipkit_metadata::models::{CreatorSource, DescriptiveMetadata};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, instrument, warn};

/// Where a rule's SIPs take their descriptive metadata from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MetadataSource {
    #[default]
    None,
    /// Render one document per SIP from a catalog template.
    Template { template_type: String },
    /// Attach the same file to every SIP.
    SingleFile { path: PathBuf, template_type: Option<String> },
    /// Attach files next to the SIP's content matching the template's
    /// filename pattern.
    SameDirectory { template_type: String },
    /// Attach files from `directory` whose stem equals the SIP's name stem.
    DiffDirectory { directory: PathBuf, template_type: Option<String> },
}

/// Resolves a [`MetadataSource`] for individual SIPs.
///
/// Built once per rule application: the different-directory index and the
/// same-directory listings are prepared up front, so resolving never touches
/// the filesystem.
pub struct MetadataResolver {
    source: MetadataSource,
    catalog: Arc<dyn Catalog>,
    language: Option<String>,
    matcher: Option<GlobMatcher>,
    index: HashMap<String, Vec<PathBuf>>,
    /// Every directory below the sources, with its files matching `matcher`.
    listings: HashMap<PathBuf, Vec<PathBuf>>,
}
impl MetadataResolver {
    #[instrument(skip(catalog, sources))]
    pub async fn new(source: MetadataSource, catalog: Arc<dyn Catalog>, sources: &[PathBuf]) -> Result<Self> {
        let matcher = match &source {
            MetadataSource::SameDirectory { template_type } => {
                let pattern = catalog.filename_pattern(template_type);
                let glob = Glob::new(&pattern).or_raise(|| ErrorKind::InvalidPattern(pattern.clone()))?;
                Some(glob.compile_matcher())
            },
            _ => None,
        };
        let index = match &source {
            MetadataSource::DiffDirectory { directory, .. } => index_directory(directory).await?,
            _ => HashMap::new(),
        };
        let listings = match &matcher {
            Some(matcher) => list_directories(sources, matcher).await,
            None => HashMap::new(),
        };
        let language = catalog.config(LANGUAGE_KEY);
        Ok(Self { source, catalog, language, matcher, index, listings })
    }

    /// Whether `path` is a same-directory metadata file. Such files describe
    /// content and never become content themselves.
    pub fn is_metadata(&self, path: &Path) -> bool {
        let Some(matcher) = &self.matcher else { return false };
        path.file_name().is_some_and(|name| matcher.is_match(name))
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    pub fn language(&self) -> Option<String> {
        self.language.clone()
    }

    /// Attaches metadata to `sip` according to the rule's source. Failures
    /// are logged and leave the SIP without that document.
    pub fn resolve(&self, sip: &mut SipPreview) {
        match &self.source {
            MetadataSource::None => {},
            MetadataSource::Template { template_type } => {
                let autofill = sip.autofill(self.language.clone());
                match DescriptiveMetadata::from_template(
                    self.catalog.as_ref(),
                    template_type,
                    &autofill,
                    CreatorSource::Template,
                ) {
                    Ok(metadata) => sip.metadata.push(metadata),
                    Err(error) => warn!(sip = %sip.id, ?error, "unable to render metadata template"),
                }
            },
            MetadataSource::SingleFile { path, template_type } => {
                sip.metadata.push(DescriptiveMetadata::from_file(
                    path,
                    template_type.as_deref(),
                    CreatorSource::SingleFile,
                ));
            },
            MetadataSource::SameDirectory { template_type } => {
                for path in self.same_directory(sip) {
                    // Metadata files are descriptive, not content.
                    let modified = sip.content_modified;
                    sip.remove_content(&path);
                    sip.content_modified = modified;
                    debug!(sip = %sip.id, path = %path.display(), "attaching same-directory metadata");
                    sip.metadata.push(DescriptiveMetadata::from_file(
                        path,
                        Some(template_type.as_str()),
                        CreatorSource::SameDirectory,
                    ));
                }
            },
            MetadataSource::DiffDirectory { template_type, .. } => {
                let Some(paths) = self.index.get(&stem(&sip.name)) else { return };
                for path in paths {
                    sip.metadata.push(DescriptiveMetadata::from_file(
                        path,
                        template_type.as_deref(),
                        CreatorSource::DiffDirectory,
                    ));
                }
            },
        }
    }

    /// Files directly inside the SIP's directory whose name matches the
    /// pattern. For single-file SIPs the directory is the file's parent.
    fn same_directory(&self, sip: &SipPreview) -> Vec<PathBuf> {
        let Some(source) = &sip.source else { return Vec::new() };
        if let Some(found) = self.listings.get(source) {
            return found.clone();
        }
        let Some(found) = source.parent().and_then(|parent| self.listings.get(parent)) else { return Vec::new() };
        found.iter().filter(|path| *path != source).cloned().collect()
    }
}

/// Lists every directory below `sources` (or holding a file source) with the
/// files in it matching `matcher`. Directory links are not followed.
async fn list_directories(sources: &[PathBuf], matcher: &GlobMatcher) -> HashMap<PathBuf, Vec<PathBuf>> {
    let mut pending = Vec::new();
    for source in sources {
        match fs::metadata(source).await {
            Ok(metadata) if metadata.is_dir() => pending.push(source.clone()),
            Ok(_) => pending.extend(source.parent().map(Path::to_path_buf)),
            Err(error) => debug!(path = %source.display(), %error, "source not listed for metadata"),
        }
    }
    let mut listings: HashMap<PathBuf, Vec<PathBuf>> = HashMap::new();
    while let Some(directory) = pending.pop() {
        if listings.contains_key(&directory) {
            continue;
        }
        let readable = match directory.as_os_str().is_empty() {
            true => Path::new("."),
            false => directory.as_path(),
        };
        let mut found = Vec::new();
        match fs::read_dir(readable).await {
            Ok(mut entries) => loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(error) => {
                        warn!(path = %directory.display(), %error, "unable to list metadata directory");
                        break;
                    },
                };
                let path = entry.path();
                let Ok(file_type) = entry.file_type().await else { continue };
                if file_type.is_dir() {
                    pending.push(path);
                } else if path.file_name().is_some_and(|name| matcher.is_match(name))
                    && (!file_type.is_symlink() || fs::metadata(&path).await.is_ok_and(|m| m.is_file()))
                {
                    found.push(path);
                }
            },
            Err(error) => warn!(path = %directory.display(), %error, "unable to list metadata directory"),
        }
        found.sort();
        listings.insert(directory, found);
    }
    debug!(directories = listings.len(), "listed same-directory metadata");
    listings
}

/// Base name without its final extension.
fn stem(name: &str) -> String {
    Path::new(name).file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| name.to_string())
}

async fn index_directory(directory: &Path) -> Result<HashMap<String, Vec<PathBuf>>> {
    let mut index: HashMap<String, Vec<PathBuf>> = HashMap::new();
    let mut entries = fs::read_dir(directory).await.map_err(|e| ErrorKind::from_io(e, directory))?;
    while let Some(entry) = entries.next_entry().await.map_err(|e| ErrorKind::from_io(e, directory))? {
        let path = entry.path();
        let is_file = fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else { continue };
        index.entry(stem(&name)).or_default().push(path);
    }
    for paths in index.values_mut() {
        paths.sort();
    }
    debug!(directory = %directory.display(), stems = index.len(), "indexed metadata directory");
    Ok(index)
}
