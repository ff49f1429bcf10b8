use crate::error::Result;
use crate::xml::PathQuery;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// The value held by a [`MetadataValue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Free text.
    Text(String),
    /// A value picked from the field's option list (`key`, `label`).
    Pair { key: String, label: String },
}
impl FieldValue {
    /// The string written into documents: the text itself, or the option key.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::Pair { key, .. } => key,
        }
    }

    /// Whether auto-fill may overwrite this value.
    ///
    /// An option pair always counts as populated, even if its key is blank.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Pair { .. } => false,
        }
    }
}
impl Default for FieldValue {
    fn default() -> Self {
        Self::Text(String::new())
    }
}
impl Display for FieldValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}
impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}
impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// A single named field of a descriptive metadata document.
///
/// Fields drive template substitution (by [`id`](Self::id)) and, when they
/// carry [`xpaths`](Self::xpaths), bind to one or more locations inside the
/// rendered XML for extraction and injection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataValue {
    pub id: String,
    pub title: String,
    pub field_type: String,
    /// `None` until something (extraction, auto-fill, the user) provides one.
    pub value: Option<FieldValue>,
    /// Ordered path queries; extraction reads the first non-empty match,
    /// injection writes to every match.
    pub xpaths: Vec<String>,
    /// `(key, label)` pairs for list fields.
    pub options: Vec<(String, String)>,
}
impl MetadataValue {
    pub fn new(id: impl Into<String>, title: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            field_type: field_type.into(),
            value: None,
            xpaths: Vec::new(),
            options: Vec::new(),
        }
    }

    pub fn with_xpath(mut self, xpath: impl Into<String>) -> Self {
        self.xpaths.push(xpath.into());
        self
    }

    pub fn with_options<K: Into<String>, L: Into<String>>(mut self, options: impl IntoIterator<Item = (K, L)>) -> Self {
        self.options.extend(options.into_iter().map(|(k, l)| (k.into(), l.into())));
        self
    }

    pub fn with_value(mut self, value: impl Into<FieldValue>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// The value as written into documents; empty when unset.
    pub fn as_str(&self) -> &str {
        self.value.as_ref().map(FieldValue::as_str).unwrap_or_default()
    }

    /// `true` when no value is set or the value is empty text.
    pub fn is_empty(&self) -> bool {
        self.value.as_ref().is_none_or(FieldValue::is_empty)
    }

    /// Sets a value, promoting it to an option pair when it matches one of
    /// the field's option keys.
    pub fn set(&mut self, value: impl Into<String>) {
        let value = value.into();
        self.value = Some(match self.options.iter().find(|(key, _)| *key == value) {
            Some((key, label)) => FieldValue::Pair { key: key.clone(), label: label.clone() },
            None => FieldValue::Text(value),
        });
    }

    /// Compiles the field's path queries.
    pub fn queries(&self) -> Result<Vec<PathQuery>> {
        self.xpaths.iter().map(|xpath| PathQuery::parse(xpath)).collect()
    }
}
