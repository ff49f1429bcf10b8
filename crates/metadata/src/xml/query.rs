//! Path queries over a [`Document`].
//!
//! Supports the subset of XPath that metadata field bindings actually use:
//!
//! | Syntax          | Meaning                                               |
//! |-----------------|-------------------------------------------------------|
//! | `/a/b`          | child steps from the document root                    |
//! | `//b`           | descendant step                                       |
//! | `*:b`           | element `b` in any namespace (matches local name)     |
//! | `p:b`, `b`      | element with exactly this qualified name              |
//! | `*`             | any element                                           |
//! | `[@x]`          | element has attribute `x`                             |
//! | `[@x='v']`      | attribute `x` equals `v` (single or double quotes)    |
//! | `[2]`           | position among the matches of this step (1-based)     |
//! | `/@x`           | final step selecting attribute `x`                    |
//! | `/text()`       | final step selecting the element's text               |

use super::{Document, NodeId};
use crate::error::{ErrorKind, Result};
use exn::OptionExt;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// A node selected by a [`PathQuery`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// An element; its value is its text content.
    Element(NodeId),
    /// An attribute on an element, identified by its qualified name.
    Attribute(NodeId, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NameTest {
    Any,
    Local(String),
    Qualified(String),
}
impl NameTest {
    fn parse(s: &str) -> Self {
        match s {
            "*" => Self::Any,
            s => match s.strip_prefix("*:") {
                Some(local) => Self::Local(local.to_string()),
                None => Self::Qualified(s.to_string()),
            },
        }
    }

    fn matches_element(&self, doc: &Document, id: NodeId) -> bool {
        match self {
            Self::Any => true,
            Self::Local(local) => doc.local_name(id) == local,
            Self::Qualified(name) => doc.name(id) == name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    HasAttribute(NameTest),
    AttributeEquals(NameTest, String),
    Position(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    axis: Axis,
    test: NameTest,
    predicates: Vec<Predicate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Terminal {
    Element,
    Attribute(NameTest),
}

/// A compiled path query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathQuery {
    source: String,
    steps: Vec<Step>,
    terminal: Terminal,
}

impl FromStr for PathQuery {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Display for PathQuery {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.source)
    }
}

impl PathQuery {
    /// Compiles a query. Only absolute queries are accepted.
    pub fn parse(query: &str) -> Result<Self> {
        let invalid = || ErrorKind::InvalidQuery(query.to_string());
        let trimmed = query.trim();
        if !trimmed.starts_with('/') {
            exn::bail!(invalid());
        }

        let mut steps = Vec::new();
        let mut terminal = Terminal::Element;
        let mut finished = false;
        for (axis, raw) in split_steps(trimmed).ok_or_raise(invalid)? {
            // Nothing may follow an attribute or `text()` step.
            if finished {
                exn::bail!(invalid());
            }
            if raw == "text()" {
                if steps.is_empty() || axis == Axis::Descendant {
                    exn::bail!(invalid());
                }
                finished = true;
                continue;
            }
            if let Some(attribute) = raw.strip_prefix('@') {
                if steps.is_empty() || attribute.is_empty() || axis == Axis::Descendant {
                    exn::bail!(invalid());
                }
                terminal = Terminal::Attribute(NameTest::parse(attribute));
                finished = true;
                continue;
            }
            steps.push(parse_step(axis, raw).ok_or_raise(invalid)?);
        }
        if steps.is_empty() {
            exn::bail!(invalid());
        }
        Ok(Self { source: trimmed.to_string(), steps, terminal })
    }

    /// Evaluates the query, returning matches in document order.
    pub fn select(&self, doc: &Document) -> Vec<Target> {
        let mut context: Option<Vec<NodeId>> = None;
        for step in &self.steps {
            let mut next = Vec::new();
            let groups: Vec<Vec<NodeId>> = match &context {
                // First step is evaluated against the (virtual) document node.
                None => match step.axis {
                    Axis::Child => vec![vec![doc.root()]],
                    Axis::Descendant => {
                        let mut all = vec![doc.root()];
                        all.extend(doc.descendants(doc.root()));
                        vec![all]
                    },
                },
                Some(nodes) => nodes
                    .iter()
                    .map(|node| match step.axis {
                        Axis::Child => doc.child_elements(*node).collect(),
                        Axis::Descendant => doc.descendants(*node),
                    })
                    .collect(),
            };
            for group in groups {
                let matching: Vec<NodeId> = group.into_iter().filter(|id| step.test.matches_element(doc, *id)).collect();
                // Positional predicates index into the matches of each context node.
                let filtered = apply_predicates(doc, matching, &step.predicates);
                for id in filtered {
                    if !next.contains(&id) {
                        next.push(id);
                    }
                }
            }
            context = Some(next);
        }

        let nodes = context.unwrap_or_default();
        match &self.terminal {
            Terminal::Element => nodes.into_iter().map(Target::Element).collect(),
            Terminal::Attribute(test) => nodes
                .into_iter()
                .filter_map(|id| find_attribute(doc, id, test).map(|key| Target::Attribute(id, key)))
                .collect(),
        }
    }
}

impl Document {
    /// Reads the value of a query target.
    pub fn value_of(&self, target: &Target) -> Option<String> {
        match target {
            Target::Element(id) => Some(self.text(*id)),
            Target::Attribute(id, key) => self.attribute(*id, key).map(str::to_string),
        }
    }

    /// Overwrites the value of a query target.
    pub fn set_value(&mut self, target: &Target, value: &str) {
        match target {
            Target::Element(id) => self.set_text(*id, value),
            Target::Attribute(id, key) => self.set_attribute(*id, key.as_str(), value),
        }
    }

    /// Returns the first non-empty value selected by the query, if any.
    pub fn first_value(&self, query: &PathQuery) -> Option<String> {
        query.select(self).iter().filter_map(|target| self.value_of(target)).find(|value| !value.trim().is_empty())
    }
}

fn find_attribute(doc: &Document, id: NodeId, test: &NameTest) -> Option<String> {
    match test {
        NameTest::Any => None,
        NameTest::Qualified(name) => doc.attribute(id, name).map(|_| name.clone()),
        NameTest::Local(local) => doc.attribute_local(id, local).map(|(key, _)| key.to_string()),
    }
}

fn attribute_value<'a>(doc: &'a Document, id: NodeId, test: &NameTest) -> Option<&'a str> {
    match test {
        NameTest::Any => None,
        NameTest::Qualified(name) => doc.attribute(id, name),
        NameTest::Local(local) => doc.attribute_local(id, local).map(|(_, value)| value),
    }
}

fn apply_predicates(doc: &Document, mut nodes: Vec<NodeId>, predicates: &[Predicate]) -> Vec<NodeId> {
    for predicate in predicates {
        nodes = match predicate {
            Predicate::HasAttribute(test) => {
                nodes.into_iter().filter(|id| attribute_value(doc, *id, test).is_some()).collect()
            },
            Predicate::AttributeEquals(test, expected) => nodes
                .into_iter()
                .filter(|id| attribute_value(doc, *id, test) == Some(expected.as_str()))
                .collect(),
            Predicate::Position(position) => nodes.get(position - 1).copied().into_iter().collect(),
        };
    }
    nodes
}

/// Splits `/a//b[@x='/']/@c` into `(axis, raw step)` pairs, ignoring slashes
/// inside predicates or quotes.
fn split_steps(query: &str) -> Option<Vec<(Axis, &str)>> {
    let bytes = query.as_bytes();
    let mut steps = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'/' {
            return None;
        }
        let axis = if bytes.get(i + 1) == Some(&b'/') {
            i += 2;
            Axis::Descendant
        } else {
            i += 1;
            Axis::Child
        };
        let start = i;
        let mut depth = 0usize;
        let mut quote: Option<u8> = None;
        while i < bytes.len() {
            let b = bytes[i];
            match quote {
                Some(q) if b == q => quote = None,
                Some(_) => {},
                None => match b {
                    b'\'' | b'"' => quote = Some(b),
                    b'[' => depth += 1,
                    b']' => depth = depth.checked_sub(1)?,
                    b'/' if depth == 0 => break,
                    _ => {},
                },
            }
            i += 1;
        }
        if quote.is_some() || depth != 0 || start == i {
            return None;
        }
        steps.push((axis, &query[start..i]));
    }
    Some(steps)
}

fn parse_step(axis: Axis, raw: &str) -> Option<Step> {
    let (name, mut rest) = match raw.find('[') {
        Some(index) => (&raw[..index], &raw[index..]),
        None => (raw, ""),
    };
    if name.is_empty() || name.contains(['@', '(', ')', ' ']) {
        return None;
    }
    let mut predicates = Vec::new();
    while !rest.is_empty() {
        let body_end = rest.find(']')?;
        // Quoted values may contain `]`; find the real closing bracket.
        let body_end = closing_bracket(rest).unwrap_or(body_end);
        let body = rest[1..body_end].trim();
        predicates.push(parse_predicate(body)?);
        rest = &rest[body_end + 1..];
        if !rest.is_empty() && !rest.starts_with('[') {
            return None;
        }
    }
    Some(Step { axis, test: NameTest::parse(name), predicates })
}

fn closing_bracket(s: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (index, c) in s.char_indices().skip(1) {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {},
            None => match c {
                '\'' | '"' => quote = Some(c),
                ']' => return Some(index),
                _ => {},
            },
        }
    }
    None
}

fn parse_predicate(body: &str) -> Option<Predicate> {
    if let Ok(position) = body.parse::<usize>() {
        return (position > 0).then_some(Predicate::Position(position));
    }
    let attribute = body.strip_prefix('@')?;
    match attribute.split_once('=') {
        None => Some(Predicate::HasAttribute(NameTest::parse(attribute.trim()))),
        Some((key, value)) => {
            let value = value.trim();
            let unquoted = value
                .strip_prefix('\'')
                .and_then(|v| v.strip_suffix('\''))
                .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')))?;
            Some(Predicate::AttributeEquals(NameTest::parse(key.trim()), unquoted.to_string()))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const EAD: &str = r#"<ead xmlns="urn:isbn:1-931666-22-9">
  <eadheader><eadid mainagencycode="PT">id-1</eadid></eadheader>
  <archdesc level="fonds">
    <did>
      <unittitle>First</unittitle>
      <unittitle type="alt">Second</unittitle>
      <unitdate normal="2001">2001</unitdate>
    </did>
  </archdesc>
</ead>"#;

    fn values(query: &str) -> Vec<String> {
        let doc = Document::parse(EAD).unwrap();
        let query = PathQuery::parse(query).unwrap();
        query.select(&doc).iter().filter_map(|t| doc.value_of(t)).collect()
    }

    #[rstest]
    #[case("/*:ead/*:archdesc/*:did/*:unittitle", &["First", "Second"])]
    #[case("/*:ead/*:archdesc/*:did/*:unittitle[1]", &["First"])]
    #[case("/*:ead/*:archdesc/*:did/*:unittitle[@type='alt']", &["Second"])]
    #[case("/*:ead/*:archdesc/*:did/*:unittitle[@type]", &["Second"])]
    #[case("/*:ead/*:archdesc/@level", &["fonds"])]
    #[case("//*:unitdate/@normal", &["2001"])]
    #[case("/*:ead/*:eadheader/*:eadid/text()", &["id-1"])]
    #[case("/x:ead/x:archdesc", &[])]
    #[case("/*:ead/*:missing", &[])]
    fn test_select(#[case] query: &str, #[case] expected: &[&str]) {
        assert_eq!(values(query), expected);
    }

    #[test]
    fn test_set_value_on_element_and_attribute() {
        let mut doc = Document::parse(EAD).unwrap();
        for query in ["/*:ead/*:archdesc/@level", "//*:unittitle"] {
            let query = PathQuery::parse(query).unwrap();
            for target in query.select(&doc) {
                doc.set_value(&target, "changed");
            }
        }
        let level = PathQuery::parse("/*:ead/*:archdesc/@level").unwrap();
        assert_eq!(doc.first_value(&level).as_deref(), Some("changed"));
        let titles = PathQuery::parse("//*:unittitle").unwrap();
        assert!(titles.select(&doc).iter().all(|t| doc.value_of(t).as_deref() == Some("changed")));
    }

    #[test]
    fn test_first_value_skips_empty_matches() {
        let doc = Document::parse("<a><b> </b><b>value</b></a>").unwrap();
        let query = PathQuery::parse("/a/b").unwrap();
        assert_eq!(doc.first_value(&query).as_deref(), Some("value"));
    }

    #[rstest]
    #[case("")]
    #[case("relative/path")]
    #[case("/")]
    #[case("/a/@b/c")]
    #[case("/@b")]
    #[case("/a[@b='unterminated]")]
    #[case("/a[0]")]
    #[case("/a[b]")]
    fn test_rejects_invalid(#[case] query: &str) {
        let err = PathQuery::parse(query).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidQuery(_)));
    }
}
