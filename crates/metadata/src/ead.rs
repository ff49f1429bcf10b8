//! EAD (Encoded Archival Description) field binding.
//!
//! EAD documents are not template-driven: they carry a fixed set of six fields
//! bound to ordered path queries. Extraction reads the first non-empty match
//! for every field; injection writes a field's value to every node matched by
//! any of its queries and never creates missing nodes.
//!
//! Documents are checked against a structural rendition of the EAD 2002
//! schema before anything is read from them.

use crate::error::{ErrorKind, Result};
use crate::models::MetadataValue;
use crate::xml::{Document, NodeId};
use exn::OptionExt;
use tracing::{debug, instrument};

/// Metadata type identifier for EAD documents.
pub const METADATA_TYPE: &str = "ead";

/// Values allowed for the `level` attribute of `archdesc`.
pub const LEVELS: &[&str] = &[
    "class",
    "collection",
    "fonds",
    "subfonds",
    "series",
    "subseries",
    "file",
    "item",
    "otherlevel",
    "recordgrp",
    "subgrp",
];

/// The fixed EAD field set, in display order.
pub fn fields() -> Vec<MetadataValue> {
    vec![
        MetadataValue::new("title", "Title", "text")
            .with_xpath("/*:ead/*:archdesc/*:did/*:unittitle")
            .with_xpath("/*:ead/*:eadheader/*:filedesc/*:titlestmt/*:titleproper"),
        MetadataValue::new("date", "Date", "text")
            .with_xpath("/*:ead/*:archdesc/*:did/*:unitdate")
            .with_xpath("/*:ead/*:archdesc/*:did/*:unitdate/@normal"),
        MetadataValue::new("repositorycode", "Repository code", "text")
            .with_xpath("/*:ead/*:archdesc/*:did/*:unitid/@repositorycode")
            .with_xpath("/*:ead/*:eadheader/*:eadid/@mainagencycode"),
        MetadataValue::new("id", "Identifier", "text")
            .with_xpath("/*:ead/*:archdesc/*:did/*:unitid")
            .with_xpath("/*:ead/*:eadheader/*:eadid"),
        MetadataValue::new("level", "Level", "list")
            .with_xpath("/*:ead/*:archdesc/@level")
            .with_options(LEVELS.iter().map(|level| (*level, capitalize(level)))),
        MetadataValue::new("description", "Description", "textarea")
            .with_xpath("/*:ead/*:archdesc/*:scopecontent/*:p"),
    ]
}

/// Checks the parts of the EAD schema the field set depends on.
///
/// Fails with [`ErrorKind::SchemaViolation`] naming the first violation.
pub fn validate(doc: &Document) -> Result<()> {
    let root = doc.root();
    if doc.local_name(root) != "ead" {
        exn::bail!(ErrorKind::SchemaViolation(format!("root element is <{}>, expected <ead>", doc.name(root))));
    }
    let header = require(doc, root, &["eadheader"])?;
    require(doc, header, &["eadid"])?;
    require(doc, header, &["filedesc", "titlestmt", "titleproper"])?;
    let archdesc = require(doc, root, &["archdesc"])?;
    let level = doc
        .attribute_local(archdesc, "level")
        .map(|(_, value)| value)
        .ok_or_raise(|| ErrorKind::SchemaViolation("<archdesc> has no level attribute".to_string()))?;
    if !LEVELS.contains(&level) {
        exn::bail!(ErrorKind::SchemaViolation(format!("unknown description level {level:?}")));
    }
    require(doc, archdesc, &["did"])?;
    Ok(())
}

fn require(doc: &Document, from: NodeId, path: &[&str]) -> Result<NodeId> {
    let mut current = from;
    for local in path {
        current = doc.child_element(current, local).ok_or_raise(|| {
            ErrorKind::SchemaViolation(format!("<{}> is missing <{local}>", doc.local_name(current)))
        })?;
    }
    Ok(current)
}

/// Validates and extracts the fixed field set from an EAD document.
#[instrument(skip_all)]
pub fn extract(content: &str) -> Result<Vec<MetadataValue>> {
    let doc = Document::parse(content)?;
    validate(&doc)?;
    let mut values = fields();
    for field in &mut values {
        for query in field.queries()? {
            if let Some(found) = doc.first_value(&query) {
                field.set(found.trim());
                break;
            }
        }
    }
    Ok(values)
}

/// Writes every non-empty value into the document and returns the new XML.
///
/// Values without an id in the fixed field set are ignored.
#[instrument(skip_all)]
pub fn inject(content: &str, values: &[MetadataValue]) -> Result<String> {
    let mut doc = Document::parse(content)?;
    validate(&doc)?;
    for field in fields() {
        let Some(value) = values.iter().find(|v| v.id == field.id) else { continue };
        if value.is_empty() {
            continue;
        }
        for query in field.queries()? {
            for target in query.select(&doc) {
                debug!(field = %field.id, query = %query, "injecting value");
                doc.set_value(&target, value.as_str());
            }
        }
    }
    Ok(doc.to_xml())
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldValue;
    use rstest::rstest;

    const DOCUMENT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ead xmlns="urn:isbn:1-931666-22-9">
  <eadheader>
    <eadid mainagencycode="FR-75">EAD-001</eadid>
    <filedesc><titlestmt><titleproper>Header title</titleproper></titlestmt></filedesc>
  </eadheader>
  <archdesc level="fonds">
    <did>
      <unittitle>Family papers</unittitle>
      <unitid repositorycode="">   </unitid>
      <unitdate normal="1901/1950">1901-1950</unitdate>
    </did>
    <scopecontent><p>Letters and photographs.</p></scopecontent>
  </archdesc>
</ead>
"#;

    fn value<'a>(values: &'a [MetadataValue], id: &str) -> &'a MetadataValue {
        values.iter().find(|v| v.id == id).unwrap()
    }

    #[test]
    fn test_extracts_first_non_empty_match() {
        let values = extract(DOCUMENT).unwrap();
        assert_eq!(value(&values, "title").as_str(), "Family papers");
        assert_eq!(value(&values, "date").as_str(), "1901-1950");
        assert_eq!(value(&values, "repositorycode").as_str(), "FR-75");
        assert_eq!(value(&values, "id").as_str(), "EAD-001");
        assert_eq!(value(&values, "description").as_str(), "Letters and photographs.");
        assert_eq!(value(&values, "level").value, Some(FieldValue::Pair { key: "fonds".into(), label: "Fonds".into() }));
    }

    #[test]
    fn test_inject_writes_every_match() {
        let mut values = fields();
        values.iter_mut().find(|v| v.id == "title").unwrap().set("Renamed");
        values.iter_mut().find(|v| v.id == "id").unwrap().set("X-9");
        let xml = inject(DOCUMENT, &values).unwrap();
        assert!(xml.contains("<unittitle>Renamed</unittitle>"));
        assert!(xml.contains("<titleproper>Renamed</titleproper>"));
        assert!(xml.contains(r#"<eadid mainagencycode="FR-75">X-9</eadid>"#));
        assert!(xml.contains("<unitdate normal=\"1901/1950\">1901-1950</unitdate>"));
        let again = extract(&xml).unwrap();
        assert_eq!(value(&again, "id").as_str(), "X-9");
    }

    #[rstest]
    #[case::wrong_root("<dc><title/></dc>")]
    #[case::no_header("<ead><archdesc level=\"fonds\"><did/></archdesc></ead>")]
    #[case::no_title(
        "<ead><eadheader><eadid/><filedesc/></eadheader><archdesc level=\"fonds\"><did/></archdesc></ead>"
    )]
    #[case::bad_level(
        "<ead><eadheader><eadid/><filedesc><titlestmt><titleproper/></titlestmt></filedesc></eadheader><archdesc level=\"box\"><did/></archdesc></ead>"
    )]
    #[case::no_did(
        "<ead><eadheader><eadid/><filedesc><titlestmt><titleproper/></titlestmt></filedesc></eadheader><archdesc level=\"file\"/></ead>"
    )]
    fn test_rejects_schema_violations(#[case] xml: &str) {
        let err = extract(xml).unwrap_err();
        assert!(matches!(&*err, ErrorKind::SchemaViolation(_)), "{err:?}");
    }

    #[test]
    fn test_malformed_is_not_a_schema_violation() {
        let err = extract("<ead><eadheader></ead>").unwrap_err();
        assert_eq!(*err, ErrorKind::MalformedXml);
    }
}
