use crate::autofill::AutoFill;
use crate::catalog::Catalog;
use crate::ead;
use crate::error::{ErrorKind, Result};
use crate::models::MetadataValue;
use crate::normalize_line_endings;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use exn::ResultExt;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// How a metadata document came to be attached to a SIP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreatorSource {
    /// Added afterwards from a template.
    NewFile,
    /// One fixed file shared by every SIP of a rule.
    SingleFile,
    /// Found next to the SIP's content.
    SameDirectory,
    /// Matched by base name in a separate directory.
    DiffDirectory,
    /// Rendered from a template when the SIP was created.
    Template,
}
impl Display for CreatorSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Self::NewFile => "new file",
            Self::SingleFile => "single file",
            Self::SameDirectory => "same directory",
            Self::DiffDirectory => "different directory",
            Self::Template => "template",
        };
        f.write_str(name)
    }
}

/// The descriptive schema family of a metadata document. Determines how its
/// fields are bound and the file name it is exported under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataType {
    DublinCore,
    Ead,
    Ead3,
    Custom,
}
impl MetadataType {
    pub fn from_template_type(template_type: &str) -> Self {
        match template_type.trim().to_lowercase().as_str() {
            "dc" | "simpledc" => Self::DublinCore,
            ead::METADATA_TYPE => Self::Ead,
            "ead3" => Self::Ead3,
            _ => Self::Custom,
        }
    }

    /// File name under `metadata/descriptive/` in E-ARK packages.
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::DublinCore => "dc.xml",
            Self::Ead => "ead.xml",
            Self::Ead3 => "ead3.xml",
            Self::Custom => "custom.xml",
        }
    }

    /// METS `MDTYPE` attribute value.
    pub fn mets_type(&self) -> &'static str {
        match self {
            Self::DublinCore => "DC",
            Self::Ead | Self::Ead3 => "EAD",
            Self::Custom => "OTHER",
        }
    }
}

/// A descriptive metadata document attached to a SIP.
///
/// The document text is carried base64-encoded and, for documents found on
/// disk, only read from [`source_path`](Self::source_path) on first access.
/// Field values are derived from the text on first access and cached until
/// the text changes.
#[derive(Debug, Clone)]
pub struct DescriptiveMetadata {
    pub id: Uuid,
    pub template_type: Option<String>,
    pub metadata_type: MetadataType,
    pub metadata_version: Option<String>,
    pub creator: CreatorSource,
    pub source_path: Option<PathBuf>,
    content: Option<String>,
    values: Option<Vec<MetadataValue>>,
}
impl DescriptiveMetadata {
    /// A document backed by a file on disk. Nothing is read yet.
    pub fn from_file(path: impl Into<PathBuf>, template_type: Option<&str>, creator: CreatorSource) -> Self {
        let metadata_type = template_type.map(MetadataType::from_template_type).unwrap_or(MetadataType::Custom);
        Self {
            id: Uuid::new_v4(),
            template_type: template_type.map(str::to_string),
            metadata_type,
            metadata_version: version(metadata_type),
            creator,
            source_path: Some(path.into()),
            content: None,
            values: None,
        }
    }

    /// A new document rendered from a catalog template.
    ///
    /// Declared fields are auto-filled before rendering. If rendering fails
    /// the raw template text is kept as the content.
    #[instrument(skip(catalog, autofill))]
    pub fn from_template(
        catalog: &dyn Catalog,
        template_type: &str,
        autofill: &AutoFill,
        creator: CreatorSource,
    ) -> Result<Self> {
        let metadata_type = MetadataType::from_template_type(template_type);
        let mut metadata = Self {
            id: Uuid::new_v4(),
            template_type: Some(template_type.to_string()),
            metadata_type,
            metadata_version: version(metadata_type),
            creator,
            source_path: None,
            content: None,
            values: None,
        };
        let template = catalog.compile(template_type)?;
        let mut values = match metadata_type {
            MetadataType::Ead => ead::fields(),
            _ => template.fields(),
        };
        autofill.apply(&mut values);
        let content = match template.render(&values) {
            Ok(rendered) => rendered,
            Err(err) => {
                warn!(error = ?err, template_type, "unable to render template, keeping it unrendered");
                template.source().to_string()
            },
        };
        metadata.set_content(&content);
        Ok(metadata)
    }

    pub fn is_ead(&self) -> bool {
        self.metadata_type == MetadataType::Ead
    }

    /// Name of the document inside a package: the source file name when the
    /// document came from disk, otherwise the E-ARK name for its type.
    pub fn file_name(&self) -> String {
        self.source_path
            .as_deref()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.metadata_type.file_name().to_string())
    }

    /// The document text, loading it from disk if it was never read.
    pub fn content(&mut self) -> Result<String> {
        if self.content.is_none() {
            let path = self.source_path.clone().unwrap_or_default();
            debug!(path = %path.display(), "loading metadata content");
            let text = std::fs::read_to_string(&path).or_raise(|| ErrorKind::Source(path.clone()))?;
            self.content = Some(STANDARD.encode(text));
        }
        let encoded = self.content.as_deref().unwrap_or_default();
        let bytes = STANDARD.decode(encoded).or_raise(|| ErrorKind::Encoding)?;
        String::from_utf8(bytes).or_raise(|| ErrorKind::Encoding)
    }

    /// Replaces the document text. Cached values are dropped.
    pub fn set_content(&mut self, content: &str) {
        self.content = Some(STANDARD.encode(content));
        self.values = None;
    }

    /// The document's field values, derived on first access.
    ///
    /// EAD documents use the fixed EAD field set; other documents use the
    /// fields declared by their template. Documents without a template have
    /// no fields. Empty values are auto-filled from `autofill`.
    pub fn values(&mut self, catalog: &dyn Catalog, autofill: &AutoFill) -> Result<&[MetadataValue]> {
        if self.values.is_none() {
            let content = self.content()?;
            let mut values = if self.is_ead() {
                ead::extract(&content)?
            } else {
                match &self.template_type {
                    Some(template_type) => catalog.compile(template_type)?.extract(&content)?,
                    None => Vec::new(),
                }
            };
            autofill.apply(&mut values);
            self.values = Some(values);
        }
        Ok(self.values.as_deref().unwrap_or_default())
    }

    /// Writes edited values back into the document.
    ///
    /// EAD documents have the values injected in place; template-backed
    /// documents are re-rendered. A render failure is logged and leaves the
    /// content untouched. Returns whether the content changed, ignoring line
    /// ending differences.
    #[instrument(skip_all, fields(id = %self.id))]
    pub fn apply_values(&mut self, catalog: &dyn Catalog, values: &[MetadataValue]) -> Result<bool> {
        let current = self.content()?;
        let updated = if self.is_ead() {
            ead::inject(&current, values)?
        } else {
            let Some(template_type) = &self.template_type else {
                return Ok(false);
            };
            match catalog.compile(template_type)?.render(values) {
                Ok(rendered) => rendered,
                Err(err) => {
                    warn!(error = ?err, "unable to re-render metadata, keeping previous content");
                    return Ok(false);
                },
            }
        };
        let changed = normalize_line_endings(&updated) != normalize_line_endings(&current);
        if changed {
            self.set_content(&updated);
        }
        self.values = Some(values.to_vec());
        Ok(changed)
    }
}

fn version(metadata_type: MetadataType) -> Option<String> {
    match metadata_type {
        MetadataType::DublinCore => Some("1.1".to_string()),
        MetadataType::Ead => Some("2002".to_string()),
        MetadataType::Ead3 => Some("1.1.1".to_string()),
        MetadataType::Custom => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use std::fs;

    const RECORD: &str = r#"{# field name="title" xpath="/*:record/*:title" #}{# field name="id" xpath="/*:record/@id" #}<record id="{{ id }}"><title>{{ title }}</title></record>"#;

    fn catalog() -> MemoryCatalog {
        MemoryCatalog::empty().with_template("record", RECORD).with_template("broken", "{{ missing }}")
    }

    fn autofill() -> AutoFill {
        AutoFill { title: Some("Box 1".into()), id: Some("uuid-7".into()), ..AutoFill::default() }
    }

    #[test]
    fn test_from_template_autofills() {
        let mut metadata =
            DescriptiveMetadata::from_template(&catalog(), "record", &autofill(), CreatorSource::Template).unwrap();
        assert_eq!(metadata.content().unwrap(), r#"<record id="uuid-7"><title>Box 1</title></record>"#);
        assert_eq!(metadata.metadata_type, MetadataType::Custom);
        assert_eq!(metadata.file_name(), "custom.xml");
    }

    #[test]
    fn test_render_failure_keeps_raw_template() {
        let mut metadata =
            DescriptiveMetadata::from_template(&catalog(), "broken", &autofill(), CreatorSource::NewFile).unwrap();
        assert_eq!(metadata.content().unwrap(), "{{ missing }}");
    }

    #[test]
    fn test_content_is_loaded_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.xml");
        let mut metadata = DescriptiveMetadata::from_file(&path, Some("record"), CreatorSource::SameDirectory);
        fs::write(&path, r#"<record id="a"><title>On disk</title></record>"#).unwrap();
        let values = metadata.values(&catalog(), &AutoFill::default()).unwrap();
        assert_eq!(values[0].as_str(), "On disk");
        assert_eq!(values[1].as_str(), "a");
        assert_eq!(metadata.file_name(), "meta.xml");
    }

    #[test]
    fn test_missing_source_is_retryable() {
        let mut metadata = DescriptiveMetadata::from_file("/nonexistent/meta.xml", None, CreatorSource::SingleFile);
        let err = metadata.content().unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_apply_values_reports_changes() {
        let catalog = catalog();
        let mut metadata =
            DescriptiveMetadata::from_template(&catalog, "record", &autofill(), CreatorSource::Template).unwrap();
        let mut values = metadata.values(&catalog, &AutoFill::default()).unwrap().to_vec();
        assert!(!metadata.apply_values(&catalog, &values).unwrap());
        values[0].set("Box 2");
        assert!(metadata.apply_values(&catalog, &values).unwrap());
        assert!(metadata.content().unwrap().contains("<title>Box 2</title>"));
    }

    #[test]
    fn test_line_endings_are_not_a_change() {
        let catalog = MemoryCatalog::empty().with_template("lines", "{# field name=\"a\" #}<a>\n{{ a }}\n</a>");
        let mut metadata = DescriptiveMetadata::from_file("unused.xml", Some("lines"), CreatorSource::SingleFile);
        metadata.set_content("<a>\r\nx\r\n</a>");
        let values = vec![MetadataValue::new("a", "a", "text").with_value("x")];
        assert!(!metadata.apply_values(&catalog, &values).unwrap());
        assert_eq!(metadata.content().unwrap(), "<a>\r\nx\r\n</a>");
    }
}
