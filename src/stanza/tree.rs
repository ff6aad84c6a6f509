//! A small owned element tree for presence fragments.
//!
//! A chunk read off the wire may hold several sibling stanzas, so it is parsed
//! inside a synthetic root and kept as a list of top-level nodes. Each
//! top-level node remembers its exact source text; nodes nobody edits are
//! written back byte-for-byte.

use quick_xml::escape::{escape, partial_escape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::RelayError;

const ROOT: &str = "xml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    fn from_start(start: &BytesStart<'_>) -> Result<Self, RelayError> {
        let name = std::str::from_utf8(start.name().as_ref())
            .map_err(|e| RelayError::MalformedFragment(format!("element name: {}", e)))?
            .to_string();

        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let key = std::str::from_utf8(attr.key.as_ref())
                .map_err(|e| RelayError::MalformedFragment(format!("attribute name: {}", e)))?
                .to_string();
            let value = attr.unescape_value()?.into_owned();
            attributes.push((key, value));
        }

        Ok(Self {
            name,
            attributes,
            children: Vec::new(),
        })
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    /// First child element with the given name
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.children.iter_mut().find_map(|node| match node {
            Node::Element(e) if e.name == name => Some(e),
            _ => None,
        })
    }

    /// Walk down through first-matching children
    pub fn find(&self, path: &[&str]) -> Option<&Element> {
        path.iter().try_fold(self, |element, name| element.child(name))
    }

    pub fn find_mut(&mut self, path: &[&str]) -> Option<&mut Element> {
        let mut element = self;
        for name in path {
            element = element.child_mut(name)?;
        }
        Some(element)
    }

    /// Remove the first child element with the given name
    pub fn remove_child(&mut self, name: &str) -> Option<Element> {
        let index = self
            .children
            .iter()
            .position(|node| matches!(node, Node::Element(e) if e.name == name))?;
        match self.children.remove(index) {
            Node::Element(e) => Some(e),
            _ => None,
        }
    }

    pub fn has_elements(&self) -> bool {
        self.elements().next().is_some()
    }

    /// Concatenated text of all descendants
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for node in &self.children {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Element(e) => e.collect_text(out),
                Node::Comment(_) => {}
            }
        }
    }

    /// Replace all content with a single text node
    pub fn set_text(&mut self, value: &str) {
        self.children = vec![Node::Text(value.to_string())];
    }

    pub fn write_to(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attributes {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape(value));
            out.push('"');
        }

        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }

        out.push('>');
        for node in &self.children {
            node.write_to(out);
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

impl Node {
    pub fn write_to(&self, out: &mut String) {
        match self {
            Node::Element(e) => e.write_to(out),
            Node::Text(text) => out.push_str(&partial_escape(text)),
            Node::Comment(comment) => {
                out.push_str("<!--");
                out.push_str(comment);
                out.push_str("-->");
            }
        }
    }
}

/// A top-level node of a fragment together with the text it was parsed from
#[derive(Debug, Clone)]
pub struct TopLevel {
    node: Node,
    source: String,
    edited: bool,
}

impl TopLevel {
    pub fn element(&self) -> Option<&Element> {
        match &self.node {
            Node::Element(e) => Some(e),
            _ => None,
        }
    }

    /// Mutable access; the node is re-serialized from the tree afterwards.
    pub fn element_mut(&mut self) -> Option<&mut Element> {
        match &mut self.node {
            Node::Element(e) => {
                self.edited = true;
                Some(e)
            }
            _ => None,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

#[derive(Debug, Clone, Default)]
pub struct Fragment {
    items: Vec<TopLevel>,
}

impl Fragment {
    /// Parse text that may hold any number of sibling elements.
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        let wrapped = format!("<{ROOT}>{raw}</{ROOT}>");
        let mut reader = Reader::from_str(&wrapped);

        let mut items = Vec::new();
        let mut stack: Vec<Element> = Vec::new();
        let mut root_open = false;
        let mut root_closed = false;
        let mut item_start = 0;

        loop {
            let start = position(&reader);
            let event = reader.read_event()?;
            let end = position(&reader);

            if root_closed {
                match event {
                    Event::Eof => break,
                    _ => {
                        return Err(RelayError::MalformedFragment(
                            "content after end of fragment".to_string(),
                        ))
                    }
                }
            }

            let node = match event {
                Event::Start(e) => {
                    if !root_open {
                        root_open = true;
                        continue;
                    }
                    if stack.is_empty() {
                        item_start = start;
                    }
                    stack.push(Element::from_start(&e)?);
                    continue;
                }
                Event::End(_) => match stack.pop() {
                    Some(element) => {
                        if let Some(parent) = stack.last_mut() {
                            parent.children.push(Node::Element(element));
                        } else {
                            items.push(TopLevel {
                                node: Node::Element(element),
                                source: slice(&wrapped, item_start, end)?,
                                edited: false,
                            });
                        }
                        continue;
                    }
                    None => {
                        root_closed = true;
                        continue;
                    }
                },
                Event::Empty(e) => Node::Element(Element::from_start(&e)?),
                Event::Text(e) => Node::Text(e.unescape()?.into_owned()),
                Event::CData(e) => Node::Text(String::from_utf8_lossy(&e).into_owned()),
                Event::Comment(e) => Node::Comment(String::from_utf8_lossy(&e).into_owned()),
                Event::PI(_) => continue,
                Event::Decl(_) | Event::DocType(_) => {
                    return Err(RelayError::MalformedFragment(
                        "declaration inside fragment".to_string(),
                    ))
                }
                Event::Eof => {
                    return Err(RelayError::MalformedFragment(
                        "fragment is truncated".to_string(),
                    ))
                }
            };

            if let Some(parent) = stack.last_mut() {
                parent.children.push(node);
            } else {
                items.push(TopLevel {
                    node,
                    source: slice(&wrapped, start, end)?,
                    edited: false,
                });
            }
        }

        Ok(Self { items })
    }

    pub fn has_elements(&self) -> bool {
        self.items.iter().any(|item| item.element().is_some())
    }

    pub fn items(&self) -> impl Iterator<Item = &TopLevel> {
        self.items.iter()
    }

    pub fn items_mut(&mut self) -> impl Iterator<Item = &mut TopLevel> {
        self.items.iter_mut()
    }

    pub fn retain(&mut self, keep: impl FnMut(&TopLevel) -> bool) {
        self.items.retain(keep);
    }

    /// Serialize back to a flat fragment without an XML declaration.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        for item in &self.items {
            if item.edited {
                item.node.write_to(&mut out);
            } else {
                out.push_str(&item.source);
            }
        }
        out
    }
}

fn position(reader: &Reader<&[u8]>) -> usize {
    usize::try_from(reader.buffer_position()).unwrap_or(usize::MAX)
}

fn slice(text: &str, start: usize, end: usize) -> Result<String, RelayError> {
    text.get(start..end)
        .map(str::to_string)
        .ok_or_else(|| RelayError::MalformedFragment("source span out of range".to_string()))
}
