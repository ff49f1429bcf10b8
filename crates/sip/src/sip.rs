use crate::error::{ErrorKind, Result};
use crate::tree::TreeNode;
use sipkit_metadata::models::{CreatorSource, DescriptiveMetadata, MetadataValue};
use sipkit_metadata::{AutoFill, Catalog};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Stable identifier of a SIP or classification node.
///
/// Displayed as `uuid-<uuid>`, which is also the form used for parent
/// references in exported packages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SipId(Uuid);
impl SipId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}
impl Default for SipId {
    fn default() -> Self {
        Self::new()
    }
}
impl Display for SipId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "uuid-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SipKind {
    Sip,
    /// A node of the classification scheme; holds no content of its own.
    Classification,
}

/// One representation of a SIP's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipRepresentation {
    pub name: String,
    pub files: Vec<TreeNode>,
}
impl SipRepresentation {
    pub fn new(name: impl Into<String>, files: Vec<TreeNode>) -> Self {
        Self { name: name.into(), files }
    }

    pub fn file_count(&self) -> usize {
        self.files.iter().map(|node| node.files().len()).sum()
    }
}

/// An in-memory SIP awaiting export.
#[derive(Debug, Clone)]
pub struct SipPreview {
    pub id: SipId,
    pub name: String,
    pub title: String,
    /// Either a classification node's [`SipId`] or an external destination id.
    pub parent_id: Option<String>,
    pub description_level: String,
    pub kind: SipKind,
    /// The directory (or file) the SIP was built from.
    pub source: Option<PathBuf>,
    pub representations: Vec<SipRepresentation>,
    pub documentation: Vec<TreeNode>,
    pub metadata: Vec<DescriptiveMetadata>,
    pub removed: bool,
    pub content_modified: bool,
    pub metadata_modified: bool,
}
impl SipPreview {
    pub fn new(name: impl Into<String>, kind: SipKind, files: Vec<TreeNode>) -> Self {
        let name = name.into();
        let representations = match kind {
            SipKind::Sip => vec![SipRepresentation::new("rep1", files)],
            SipKind::Classification => Vec::new(),
        };
        Self {
            id: SipId::new(),
            title: name.clone(),
            name,
            parent_id: None,
            description_level: String::new(),
            kind,
            source: None,
            representations,
            documentation: Vec::new(),
            metadata: Vec::new(),
            removed: false,
            content_modified: false,
            metadata_modified: false,
        }
    }

    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn is_classification(&self) -> bool {
        self.kind == SipKind::Classification
    }

    /// Every path held by the SIP: its own source, content, documentation
    /// and on-disk metadata documents.
    pub fn paths(&self) -> Vec<PathBuf> {
        let content = self.representations.iter().flat_map(|rep| rep.files.iter());
        let mut paths: Vec<PathBuf> = content
            .chain(self.documentation.iter())
            .flat_map(TreeNode::paths)
            .map(Path::to_path_buf)
            .chain(self.source.iter().cloned())
            .chain(self.metadata.iter().filter_map(|m| m.source_path.clone()))
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }

    /// Total number of content files across representations.
    pub fn file_count(&self) -> usize {
        self.representations.iter().map(SipRepresentation::file_count).sum()
    }

    /// The values auto-fill derives from this SIP.
    pub fn autofill(&self, language: Option<String>) -> AutoFill {
        AutoFill {
            title: Some(self.title.clone()),
            id: Some(self.id.to_string()),
            level: Some(self.description_level.clone()).filter(|level| !level.is_empty()),
            parent_id: self.parent_id.clone(),
            language,
        }
    }

    /// Detaches a content node from whichever representation holds it.
    pub fn remove_content(&mut self, path: &Path) -> Option<TreeNode> {
        for rep in &mut self.representations {
            if let Some(index) = rep.files.iter().position(|node| node.path() == path) {
                self.content_modified = true;
                return Some(rep.files.remove(index));
            }
            if let Some(removed) = rep.files.iter_mut().find_map(|node| node.remove(path)) {
                self.content_modified = true;
                return Some(removed);
            }
        }
        None
    }

    /// Moves a content node into the documentation set.
    pub fn move_to_documentation(&mut self, path: &Path) -> bool {
        match self.remove_content(path) {
            Some(node) => {
                self.documentation.push(node);
                true
            },
            None => false,
        }
    }

    /// Renders a new metadata document from a template and attaches it.
    pub fn add_metadata(&mut self, catalog: &dyn Catalog, template_type: &str, language: Option<String>) -> Result<()> {
        let autofill = self.autofill(language);
        let metadata = DescriptiveMetadata::from_template(catalog, template_type, &autofill, CreatorSource::NewFile)
            .map_err(ErrorKind::metadata)?;
        self.metadata.push(metadata);
        self.metadata_modified = true;
        Ok(())
    }

    /// Writes edited values into the metadata document at `index`.
    pub fn apply_values(&mut self, catalog: &dyn Catalog, index: usize, values: &[MetadataValue]) -> Result<bool> {
        let Some(metadata) = self.metadata.get_mut(index) else {
            exn::bail!(ErrorKind::NoSuchDocument(index));
        };
        let changed = metadata.apply_values(catalog, values).map_err(ErrorKind::metadata)?;
        if changed {
            debug!(sip = %self.id, index, "metadata modified");
            self.metadata_modified = true;
        }
        Ok(changed)
    }
}
