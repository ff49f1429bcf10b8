//! Field marker discovery.
//!
//! Templates declare their fields with comment markers so that the set of
//! expected fields can be enumerated without rendering anything:
//!
//! ```text
//! {# field name="level" label="Level" type="list" options="fonds:Fonds|file:File" xpath="/*:ead/*:archdesc/@level" #}
//! ```
//!
//! | Attribute        | Meaning                                                 |
//! |------------------|---------------------------------------------------------|
//! | `name` / `id`    | field id, also the template variable name (required)    |
//! | `label`/`title`  | human readable title (defaults to the id)               |
//! | `type`           | field type (defaults to `text`)                         |
//! | `xpath`          | bound path query; may be repeated, order is kept        |
//! | `options`        | `key:Label` pairs separated by `|` (label optional)     |
//! | `value`          | default value                                           |

use crate::consts::{DEFAULT_FIELD_TYPE, FIELD_MARKER_REGEX, MARKER_ATTRIBUTE_REGEX};
use crate::models::MetadataValue;
use tracing::warn;

/// Returns the fields declared in `source`, in declaration order. Later
/// markers reusing an id are ignored.
pub(crate) fn parse(source: &str) -> Vec<MetadataValue> {
    let mut fields: Vec<MetadataValue> = Vec::new();
    for marker in FIELD_MARKER_REGEX.captures_iter(source) {
        let Some(body) = marker.get(1) else { continue };
        let mut id = None;
        let mut title = None;
        let mut field_type = None;
        let mut xpaths = Vec::new();
        let mut options = Vec::new();
        let mut value = None;
        for attribute in MARKER_ATTRIBUTE_REGEX.captures_iter(body.as_str()) {
            let key = &attribute[1];
            let content = attribute.get(2).or_else(|| attribute.get(3)).map(|m| m.as_str()).unwrap_or_default();
            match key {
                "name" | "id" => id = Some(content.trim().to_string()),
                "label" | "title" => title = Some(content.to_string()),
                "type" => field_type = Some(content.trim().to_string()),
                "xpath" => xpaths.push(content.trim().to_string()),
                "options" => options.extend(parse_options(content)),
                "value" => value = Some(content.to_string()),
                other => warn!(attribute = other, "ignoring unknown field marker attribute"),
            }
        }
        let Some(id) = id.filter(|id| is_identifier(id)) else {
            warn!(marker = body.as_str().trim(), "field marker without a usable name");
            continue;
        };
        if fields.iter().any(|f| f.id == id) {
            continue;
        }
        let mut field = MetadataValue::new(id.clone(), title.unwrap_or(id), field_type.unwrap_or(DEFAULT_FIELD_TYPE.into()));
        field.xpaths = xpaths;
        field.options = options;
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            field.set(value);
        }
        fields.push(field);
    }
    fields
}

fn parse_options(raw: &str) -> impl Iterator<Item = (String, String)> + '_ {
    raw.split('|').map(str::trim).filter(|o| !o.is_empty()).map(|option| match option.split_once(':') {
        Some((key, label)) => (key.trim().to_string(), label.trim().to_string()),
        None => (option.to_string(), option.to_string()),
    })
}

/// Field ids double as template variable names.
fn is_identifier(id: &str) -> bool {
    let mut chars = id.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
