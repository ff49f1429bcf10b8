//! Template catalogs.
//!
//! A [`Catalog`] maps template identifiers (e.g. `"dc"`, `"ead"`) to raw
//! template text and optional schemas, and answers string configuration
//! lookups such as per-template filename patterns. Built-in templates are
//! embedded into the binary at compile time using [`rust-embed`](rust_embed).

use crate::error::{ErrorKind, Result};
use crate::template::MetadataTemplate;
use exn::OptionExt;
use rust_embed::Embed;
use std::borrow::Cow;
use std::collections::HashMap;

/// Configuration key holding the filename glob for a template type, as in
/// `pattern.ead`.
pub const PATTERN_KEY_PREFIX: &str = "pattern.";
/// Configuration key for the description level of classification nodes.
pub const AGGREGATION_LEVEL_KEY: &str = "level.aggregation";
/// Configuration key for the description level of SIPs.
pub const FILE_LEVEL_KEY: &str = "level.file";
/// Configuration key for the display name used by the `language` generator.
pub const LANGUAGE_KEY: &str = "language";

/// Source of templates, schemas and metadata configuration.
pub trait Catalog: Send + Sync {
    /// Raw template text for a template type.
    fn template(&self, template_type: &str) -> Option<Cow<'_, str>>;

    /// Optional XML schema associated with a template type.
    fn schema(&self, template_type: &str) -> Option<Cow<'_, [u8]>>;

    /// A configuration value, e.g. [`FILE_LEVEL_KEY`].
    fn config(&self, key: &str) -> Option<String>;

    /// Every template type this catalog can serve.
    fn template_types(&self) -> Vec<String>;

    /// Loads and compiles a template, failing with
    /// [`ErrorKind::TemplateNotFound`] if it is not in the catalog.
    fn compile(&self, template_type: &str) -> Result<MetadataTemplate> {
        self.template(template_type)
            .ok_or_raise(|| ErrorKind::TemplateNotFound(template_type.to_string()))?
            .parse()
    }

    /// The filename glob used to find metadata files of this type next to
    /// content. Defaults to `*.xml`.
    fn filename_pattern(&self, template_type: &str) -> String {
        self.config(&format!("{PATTERN_KEY_PREFIX}{template_type}")).unwrap_or_else(|| "*.xml".to_string())
    }
}

/// Templates shipped with the binary.
#[derive(Embed)]
#[folder = "../../assets/templates/"]
pub struct Builtins;
impl Builtins {
    fn file_name(template_type: &str) -> String {
        format!("{}.xml", template_type.trim().to_lowercase())
    }

    pub fn exists(template_type: &str) -> bool {
        Self::get(&Self::file_name(template_type)).is_some()
    }
}
impl Catalog for Builtins {
    fn template(&self, template_type: &str) -> Option<Cow<'_, str>> {
        let file = Self::get(&Self::file_name(template_type))?;
        Some(Cow::Owned(String::from_utf8_lossy(&file.data).into_owned()))
    }

    fn schema(&self, _template_type: &str) -> Option<Cow<'_, [u8]>> {
        None
    }

    fn config(&self, key: &str) -> Option<String> {
        match key {
            AGGREGATION_LEVEL_KEY => Some("series".to_string()),
            FILE_LEVEL_KEY => Some("file".to_string()),
            "pattern.ead" => Some("ead*.xml".to_string()),
            "pattern.dc" => Some("dc*.xml".to_string()),
            _ => None,
        }
    }

    fn template_types(&self) -> Vec<String> {
        Self::iter().filter_map(|f| f.strip_suffix(".xml").map(str::to_string)).collect()
    }
}

/// An in-memory catalog layered over another catalog (usually [`Builtins`]).
///
/// Entries added here shadow the fallback's.
pub struct MemoryCatalog {
    templates: HashMap<String, String>,
    schemas: HashMap<String, Vec<u8>>,
    config: HashMap<String, String>,
    fallback: Option<Box<dyn Catalog>>,
}
impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}
impl MemoryCatalog {
    /// An empty catalog falling back to the built-in templates.
    pub fn new() -> Self {
        Self::empty().with_fallback(Builtins)
    }

    /// An empty catalog with no fallback at all.
    pub fn empty() -> Self {
        Self { templates: HashMap::new(), schemas: HashMap::new(), config: HashMap::new(), fallback: None }
    }

    pub fn with_fallback(mut self, fallback: impl Catalog + 'static) -> Self {
        self.fallback = Some(Box::new(fallback));
        self
    }

    pub fn with_template(mut self, template_type: impl Into<String>, content: impl Into<String>) -> Self {
        self.templates.insert(template_type.into(), content.into());
        self
    }

    pub fn with_schema(mut self, template_type: impl Into<String>, schema: impl Into<Vec<u8>>) -> Self {
        self.schemas.insert(template_type.into(), schema.into());
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}
impl Catalog for MemoryCatalog {
    fn template(&self, template_type: &str) -> Option<Cow<'_, str>> {
        match self.templates.get(template_type) {
            Some(content) => Some(Cow::Borrowed(content)),
            None => self.fallback.as_ref()?.template(template_type),
        }
    }

    fn schema(&self, template_type: &str) -> Option<Cow<'_, [u8]>> {
        match self.schemas.get(template_type) {
            Some(schema) => Some(Cow::Borrowed(schema)),
            None => self.fallback.as_ref()?.schema(template_type),
        }
    }

    fn config(&self, key: &str) -> Option<String> {
        match self.config.get(key) {
            Some(value) => Some(value.clone()),
            None => self.fallback.as_ref()?.config(key),
        }
    }

    fn template_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.templates.keys().cloned().collect();
        if let Some(fallback) = &self.fallback {
            types.extend(fallback.template_types());
        }
        types.sort();
        types.dedup();
        types
    }
}
