//! A small, mutable XML document model.
//!
//! Metadata documents need to be read (field extraction), edited in place
//! (field injection) and written back without disturbing anything we did not
//! touch. [`Document`] keeps every node it parsed, including whitespace,
//! comments and processing instructions, in an arena so that a parse followed
//! by [`to_xml`](Document::to_xml) reproduces the input modulo attribute
//! quoting and entity choice.
//!
//! Nodes are addressed by [`NodeId`], an index into the arena. Ids stay valid
//! for the lifetime of the document; replaced nodes are detached but never
//! reused.

mod query;

pub use self::query::{PathQuery, Target};
use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use quick_xml::Reader;
use quick_xml::escape::{escape, partial_escape};
use quick_xml::events::{BytesStart, Event};
use std::borrow::Cow;

/// Index of a node inside a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
enum NodeKind {
    Element { name: String, attributes: Vec<(String, String)>, children: Vec<NodeId> },
    Text(String),
    CData(String),
    Comment(String),
    Instruction(String),
    DocType(String),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
}

#[derive(Debug, Clone)]
struct Declaration {
    version: String,
    encoding: Option<String>,
    standalone: Option<String>,
}

/// An XML document held entirely in memory.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    declaration: Option<Declaration>,
    /// Top-level nodes in document order (prolog, root element, epilog).
    top: Vec<NodeId>,
    root: NodeId,
}

impl Document {
    /// Creates a document with a single, empty root element and an XML
    /// declaration.
    pub fn new(root: impl Into<String>) -> Self {
        let node = Node {
            kind: NodeKind::Element { name: root.into(), attributes: Vec::new(), children: Vec::new() },
            parent: None,
        };
        Self {
            nodes: vec![node],
            declaration: Some(Declaration {
                version: "1.0".to_string(),
                encoding: Some("UTF-8".to_string()),
                standalone: None,
            }),
            top: vec![NodeId(0)],
            root: NodeId(0),
        }
    }

    /// Parses a complete XML document.
    ///
    /// Returns [`ErrorKind::MalformedXml`] for anything that is not
    /// well-formed: mismatched or unclosed tags, text outside the root element,
    /// multiple roots or no root at all.
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        let mut nodes: Vec<Node> = Vec::new();
        let mut declaration = None;
        let mut top = Vec::new();
        let mut root = None;
        let mut stack: Vec<NodeId> = Vec::new();

        loop {
            let event = reader.read_event().or_raise(|| ErrorKind::MalformedXml)?;
            let (kind, opens) = match event {
                Event::Eof => break,
                Event::Decl(decl) => {
                    let version = decl.version().or_raise(|| ErrorKind::MalformedXml)?;
                    let encoding = decl.encoding().transpose().or_raise(|| ErrorKind::MalformedXml)?;
                    let standalone = decl.standalone().transpose().or_raise(|| ErrorKind::MalformedXml)?;
                    declaration = Some(Declaration {
                        version: lossy(&version),
                        encoding: encoding.map(|e| lossy(&e)),
                        standalone: standalone.map(|s| lossy(&s)),
                    });
                    continue;
                },
                Event::Start(start) => (element(&start)?, true),
                Event::Empty(start) => (element(&start)?, false),
                Event::End(_) => {
                    stack.pop().ok_or_raise(|| ErrorKind::MalformedXml)?;
                    continue;
                },
                Event::Text(text) => {
                    let text = text.unescape().or_raise(|| ErrorKind::MalformedXml)?;
                    if stack.is_empty() && !text.trim().is_empty() {
                        exn::bail!(ErrorKind::MalformedXml);
                    }
                    (NodeKind::Text(text.into_owned()), false)
                },
                Event::CData(data) => (NodeKind::CData(lossy(&data.into_inner())), false),
                Event::Comment(comment) => (NodeKind::Comment(lossy(&comment)), false),
                Event::PI(instruction) => (NodeKind::Instruction(lossy(&instruction)), false),
                Event::DocType(doctype) => (NodeKind::DocType(lossy(&doctype)), false),
            };

            let is_element = matches!(kind, NodeKind::Element { .. });
            let id = NodeId(nodes.len());
            let parent = stack.last().copied();
            nodes.push(Node { kind, parent });
            match parent {
                Some(parent) => match &mut nodes[parent.0].kind {
                    NodeKind::Element { children, .. } => children.push(id),
                    _ => exn::bail!(ErrorKind::MalformedXml),
                },
                None => {
                    if is_element {
                        if root.is_some() {
                            // Only one root element is permitted.
                            exn::bail!(ErrorKind::MalformedXml);
                        }
                        root = Some(id);
                    }
                    top.push(id);
                },
            }
            if opens {
                stack.push(id);
            }
        }

        if !stack.is_empty() {
            exn::bail!(ErrorKind::MalformedXml);
        }
        let root = root.ok_or_raise(|| ErrorKind::MalformedXml)?;
        Ok(Self { nodes, declaration, top, root })
    }

    /// The root element.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Qualified name of an element (`prefix:local` or `local`). Empty for
    /// non-element nodes.
    pub fn name(&self, id: NodeId) -> &str {
        match &self.nodes[id.0].kind {
            NodeKind::Element { name, .. } => name,
            _ => "",
        }
    }

    /// Local part of an element name, without any namespace prefix.
    pub fn local_name(&self, id: NodeId) -> &str {
        let name = self.name(id);
        name.split_once(':').map(|(_, local)| local).unwrap_or(name)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.nodes[id.0].kind, NodeKind::Element { .. })
    }

    pub fn attribute(&self, id: NodeId, key: &str) -> Option<&str> {
        match &self.nodes[id.0].kind {
            NodeKind::Element { attributes, .. } => {
                attributes.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
            },
            _ => None,
        }
    }

    /// Finds an attribute by its local name, ignoring any namespace prefix.
    pub fn attribute_local(&self, id: NodeId, local: &str) -> Option<(&str, &str)> {
        match &self.nodes[id.0].kind {
            NodeKind::Element { attributes, .. } => attributes
                .iter()
                .find(|(k, _)| k.split_once(':').map(|(_, l)| l).unwrap_or(k) == local)
                .map(|(k, v)| (k.as_str(), v.as_str())),
            _ => None,
        }
    }

    /// Sets (or replaces) an attribute on an element. No-op on other nodes.
    pub fn set_attribute(&mut self, id: NodeId, key: impl Into<String>, value: impl Into<String>) {
        if let NodeKind::Element { attributes, .. } = &mut self.nodes[id.0].kind {
            let key = key.into();
            let value = value.into();
            match attributes.iter_mut().find(|(k, _)| *k == key) {
                Some(existing) => existing.1 = value,
                None => attributes.push((key, value)),
            }
        }
    }

    /// All child nodes of an element, in document order.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match &self.nodes[id.0].kind {
            NodeKind::Element { children, .. } => children,
            _ => &[],
        }
    }

    /// Element children only.
    pub fn child_elements(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id).iter().copied().filter(|child| self.is_element(*child))
    }

    /// First element child whose local name matches.
    pub fn child_element(&self, id: NodeId, local: &str) -> Option<NodeId> {
        self.child_elements(id).find(|child| self.local_name(*child) == local)
    }

    /// Every element below `id` (excluding `id` itself) in document order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack: Vec<NodeId> = self.child_elements(id).collect();
        stack.reverse();
        while let Some(current) = stack.pop() {
            found.push(current);
            let mut children: Vec<NodeId> = self.child_elements(current).collect();
            children.reverse();
            stack.extend(children);
        }
        found
    }

    /// Concatenated text and CDATA content of a node and its descendants.
    pub fn text(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match &self.nodes[id.0].kind {
            NodeKind::Text(text) | NodeKind::CData(text) => out.push_str(text),
            NodeKind::Element { children, .. } => {
                for child in children {
                    self.collect_text(*child, out);
                }
            },
            _ => {},
        }
    }

    /// Replaces all children of an element with a single text node.
    pub fn set_text(&mut self, id: NodeId, value: impl Into<String>) {
        if !self.is_element(id) {
            return;
        }
        let text = self.push(NodeKind::Text(value.into()), Some(id));
        if let NodeKind::Element { children, .. } = &mut self.nodes[id.0].kind {
            *children = vec![text];
        }
    }

    /// Appends a new, empty element as the last child of `parent`.
    pub fn append_element(&mut self, parent: NodeId, name: impl Into<String>) -> NodeId {
        let kind = NodeKind::Element { name: name.into(), attributes: Vec::new(), children: Vec::new() };
        let id = self.push(kind, Some(parent));
        if let NodeKind::Element { children, .. } = &mut self.nodes[parent.0].kind {
            children.push(id);
        }
        id
    }

    fn push(&mut self, kind: NodeKind, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node { kind, parent });
        id
    }

    /// Serializes the document exactly as structured, without adding any
    /// whitespace.
    pub fn to_xml(&self) -> String {
        self.serialize(false)
    }

    /// Serializes the document, indenting elements that only contain other
    /// elements. Intended for documents built programmatically.
    pub fn to_pretty_xml(&self) -> String {
        self.serialize(true)
    }

    fn serialize(&self, pretty: bool) -> String {
        let mut out = String::new();
        if let Some(decl) = &self.declaration {
            out.push_str(&format!("<?xml version=\"{}\"", decl.version));
            if let Some(encoding) = &decl.encoding {
                out.push_str(&format!(" encoding=\"{encoding}\""));
            }
            if let Some(standalone) = &decl.standalone {
                out.push_str(&format!(" standalone=\"{standalone}\""));
            }
            out.push_str("?>");
            if pretty {
                out.push('\n');
            }
        }
        for id in &self.top {
            self.write_node(*id, &mut out, pretty.then_some(0));
            if pretty && self.is_element(*id) {
                out.push('\n');
            }
        }
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String, depth: Option<usize>) {
        match &self.nodes[id.0].kind {
            NodeKind::Element { name, attributes, children } => {
                out.push('<');
                out.push_str(name);
                for (key, value) in attributes {
                    out.push_str(&format!(" {key}=\"{}\"", escape(value.as_str())));
                }
                if children.is_empty() {
                    out.push_str("/>");
                    return;
                }
                out.push('>');
                let indent = depth.filter(|_| children.iter().all(|c| self.is_element(*c)));
                for child in children {
                    if let Some(depth) = indent {
                        out.push('\n');
                        out.push_str(&"  ".repeat(depth + 1));
                    }
                    self.write_node(*child, out, indent.map(|d| d + 1));
                }
                if let Some(depth) = indent {
                    out.push('\n');
                    out.push_str(&"  ".repeat(depth));
                }
                out.push_str(&format!("</{name}>"));
            },
            NodeKind::Text(text) => out.push_str(&partial_escape(text.as_str())),
            NodeKind::CData(data) => out.push_str(&format!("<![CDATA[{data}]]>")),
            NodeKind::Comment(comment) => out.push_str(&format!("<!--{comment}-->")),
            NodeKind::Instruction(instruction) => out.push_str(&format!("<?{instruction}?>")),
            NodeKind::DocType(doctype) => out.push_str(&format!("<!DOCTYPE {doctype}>")),
        }
    }
}

fn element(start: &BytesStart<'_>) -> Result<NodeKind> {
    let name = lossy(start.name().as_ref());
    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute.or_raise(|| ErrorKind::MalformedXml)?;
        let value = attribute.unescape_value().or_raise(|| ErrorKind::MalformedXml)?;
        attributes.push((lossy(attribute.key.as_ref()), value.into_owned()));
    }
    Ok(NodeKind::Element { name, attributes, children: Vec::new() })
}

fn lossy(bytes: &[u8]) -> String {
    match String::from_utf8_lossy(bytes) {
        Cow::Borrowed(s) => s.to_string(),
        Cow::Owned(s) => s,
    }
}
