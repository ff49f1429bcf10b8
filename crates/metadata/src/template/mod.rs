//! Descriptive metadata templates.
//!
//! A template is an XML document written in [upon]'s Mustache-like syntax
//! (`{{ variable }}`, `{% if ... %}`), where every variable is a field id.
//! Fields are declared with comment markers (see the `fields` module docs) so
//! that they can be enumerated without rendering. Two extensions are
//! registered on the engine:
//!
//! - **`if_cond`**: gates a region on two values and an operator, e.g.
//!   `{% if creator|if_cond: "||", rights %}`. Supported operators are `||`,
//!   `&&`, `==`, `!=`, `<`, `<=`, `>` and `>=` (lexical comparison); anything
//!   else is false.
//! - **field markers**: `{# field name="..." ... #}`; these are comments and
//!   never produce output.
//!
//! Values are XML-escaped before substitution, so templates can place them
//! in both text and attribute positions.
//!
//! # Example
//!
//! ```
//! use sipkit_metadata::MetadataTemplate;
//! use std::collections::BTreeMap;
//!
//! let template: MetadataTemplate = r#"{# field name="title" xpath="/t" #}<t>{{ title }}</t>"#.parse().unwrap();
//! let data = BTreeMap::from([("title".to_string(), "Letters & Notes".to_string())]);
//! let xml = template.render_data(&data).unwrap();
//! assert_eq!(xml, "<t>Letters &amp; Notes</t>");
//! assert_eq!(template.extract(&xml).unwrap()[0].as_str(), "Letters & Notes");
//! ```

mod fields;

use crate::error::{Error, ErrorKind, Result};
use crate::models::MetadataValue;
use crate::xml::Document;
use exn::ResultExt;
use quick_xml::escape::escape;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::instrument;
use upon::{Engine, Template, Value};

/// A compiled metadata template together with the fields it declares.
///
/// Constructed via [`FromStr`], which compiles the template eagerly so that
/// syntax errors surface at creation time rather than at render time.
pub struct MetadataTemplate {
    engine: Engine<'static>,
    template: Template<'static>,
    source: String,
    fields: Vec<MetadataValue>,
}
impl FromStr for MetadataTemplate {
    type Err = Error;

    /// Compiles the given template, registering the `if_cond` function first.
    /// Returns [`ErrorKind::Template`] if the syntax is invalid.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut engine = Engine::new();
        addons::configure(&mut engine);
        let template = engine.compile(s.to_string()).or_raise(|| ErrorKind::Template)?;
        Ok(Self { engine, template, source: s.to_string(), fields: fields::parse(s) })
    }
}
impl MetadataTemplate {
    /// The raw template text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Fresh copies of the declared fields, holding only marker defaults.
    pub fn fields(&self) -> Vec<MetadataValue> {
        self.fields.clone()
    }

    /// Renders the template from a set of field values.
    ///
    /// Every declared field is present in the data map (empty when no value is
    /// supplied), so templates never fail on a missing declared variable.
    pub fn render(&self, values: &[MetadataValue]) -> Result<String> {
        self.render_data(&data(values))
    }

    /// Renders the template from a raw `field id → value` map.
    #[instrument(skip_all, fields(fields = data.len()))]
    pub fn render_data(&self, data: &BTreeMap<String, String>) -> Result<String> {
        let mut map: BTreeMap<String, Value> =
            self.fields.iter().map(|field| (field.id.clone(), Value::String(String::new()))).collect();
        for (key, value) in data {
            map.insert(key.clone(), Value::String(escape(value.as_str()).into_owned()));
        }
        self.template.render(&self.engine, Value::Map(map)).to_string().or_raise(|| ErrorKind::Template)
    }

    /// Extracts the declared fields from a document rendered from this
    /// template (or any document sharing its structure).
    ///
    /// Each field takes the first non-empty match across its ordered path
    /// queries; fields without a match keep their marker default.
    pub fn extract(&self, content: &str) -> Result<Vec<MetadataValue>> {
        let doc = Document::parse(content)?;
        let mut values = self.fields();
        for field in &mut values {
            for query in field.queries()? {
                if let Some(found) = doc.first_value(&query) {
                    field.set(found);
                    break;
                }
            }
        }
        Ok(values)
    }
}

/// Builds the `field id → value` map used for rendering.
pub fn data(values: &[MetadataValue]) -> BTreeMap<String, String> {
    values.iter().map(|value| (value.id.clone(), value.as_str().to_string())).collect()
}

/// Custom [`upon`] extensions for metadata templates.
mod addons {
    use upon::Engine;

    /// Conditional helper comparing two values with an operator.
    ///
    /// Logical operators treat empty strings as false.
    fn if_cond(left: &str, operator: String, right: String) -> bool {
        let right = right.as_str();
        match operator.trim() {
            "||" | "or" => !left.is_empty() || !right.is_empty(),
            "&&" | "and" => !left.is_empty() && !right.is_empty(),
            "==" | "===" => left == right,
            "!=" | "!==" => left != right,
            "<" => left < right,
            "<=" => left <= right,
            ">" => left > right,
            ">=" => left >= right,
            _ => false,
        }
    }

    /// Registers the `if_cond` function on the given engine.
    pub(crate) fn configure(engine: &mut Engine<'_>) {
        engine.add_function("if_cond", if_cond);
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
{# field name="title" label="Title" xpath="/*:record/*:title" #}
{# field name="creator" label="Creator" xpath="/*:record/*:creator" #}
{# field name="rights" label="Rights" xpath="/*:record/*:rights" #}
{# field name="level" type="list" options="fonds|file" xpath="/*:record/@level" #}
<record level="{{ level }}">
  <title>{{ title }}</title>
  {% if creator|if_cond: "||", rights %}<creator>{{ creator }}</creator><rights>{{ rights }}</rights>{% endif %}
</record>
"#;

    fn template() -> MetadataTemplate {
        TEMPLATE.parse().unwrap()
    }

    fn values(pairs: &[(&str, &str)]) -> Vec<MetadataValue> {
        let mut fields = template().fields();
        for (id, value) in pairs {
            if let Some(field) = fields.iter_mut().find(|f| f.id == *id) {
                field.set(*value);
            }
        }
        fields
    }

    #[test]
    fn test_declared_fields() {
        let ids: Vec<_> = template().fields().into_iter().map(|f| f.id).collect();
        assert_eq!(ids, vec!["title", "creator", "rights", "level"]);
    }

    #[test]
    fn test_conditional_region() {
        let without = template().render(&values(&[("title", "T")])).unwrap();
        assert!(!without.contains("<creator>"));
        let with = template().render(&values(&[("title", "T"), ("rights", "CC-BY")])).unwrap();
        assert!(with.contains("<creator></creator><rights>CC-BY</rights>"));
    }

    #[test]
    fn test_escapes_values() {
        let rendered = template().render(&values(&[("title", "<b> & \"q\"")])).unwrap();
        assert!(rendered.contains("<title>&lt;b&gt; &amp; &quot;q&quot;</title>"));
    }

    #[test]
    fn test_round_trip_is_stable() {
        let template = template();
        let original = values(&[("title", "Fonds & Co"), ("creator", "Someone"), ("level", "file")]);
        let first = template.render(&original).unwrap();
        let extracted = template.extract(&first).unwrap();
        let second = template.render(&extracted).unwrap();
        assert_eq!(first, second);
        for (a, b) in original.iter().zip(extracted.iter()) {
            assert_eq!(a.as_str(), b.as_str(), "field {}", a.id);
        }
    }

    #[test]
    fn test_invalid_syntax_fails_fast() {
        let result = "{% if %}".parse::<MetadataTemplate>();
        assert!(matches!(&*result.map(|_| ()).unwrap_err(), ErrorKind::Template));
    }

    #[test]
    fn test_undeclared_variable_fails_render() {
        let template: MetadataTemplate = "<a>{{ missing }}</a>".parse().unwrap();
        assert!(template.render(&[]).is_err());
    }
}
