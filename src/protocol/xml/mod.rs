//! Owned XML element tree
//!
//! Stanzas travel through the transport as [`Element`] values. Parsing is
//! delegated to `roxmltree`; this module only keeps an owned, mutable copy
//! and serializes it back to text.

#[cfg(test)]
mod tests;

use std::fmt;
use thiserror::Error;

/// XML handling errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum XmlError {
    /// Document is not well-formed
    #[error("XML parse error: {0}")]
    Parse(String),

    /// A required element is absent
    #[error("missing element <{0}>")]
    MissingElement(String),

    /// A required attribute is absent
    #[error("missing attribute '{attribute}' on <{element}>")]
    MissingAttribute {
        /// Element name
        element: String,
        /// Attribute name
        attribute: String,
    },
}

/// Child of an element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Nested element
    Element(Element),
    /// Character data
    Text(String),
}

/// An XML element with attributes in document order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Element {
    /// Create an empty element
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builder: set an attribute, replacing an existing one
    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    /// Builder: append a child element
    #[must_use]
    pub fn child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    /// Builder: append character data
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    /// Set an attribute in place
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(n, _)| *n == name) {
            Some((_, v)) => *v = value,
            None => self.attrs.push((name, value)),
        }
    }

    /// Element name without prefix
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attribute value
    #[must_use]
    pub fn get_attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Attribute value or [`XmlError::MissingAttribute`]
    ///
    /// # Errors
    ///
    /// Returns error if the attribute is absent
    pub fn require_attr(&self, name: &str) -> Result<&str, XmlError> {
        self.get_attr(name).ok_or_else(|| XmlError::MissingAttribute {
            element: self.name.clone(),
            attribute: name.to_string(),
        })
    }

    /// All child nodes
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.children
    }

    /// Child elements, skipping text
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// Child elements called `name`
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.elements().filter(move |e| e.name == name)
    }

    /// First child element called `name`
    #[must_use]
    pub fn get_child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.name == name)
    }

    /// First child element called `name` or [`XmlError::MissingElement`]
    ///
    /// # Errors
    ///
    /// Returns error if there is no such child
    pub fn require_child(&self, name: &str) -> Result<&Element, XmlError> {
        self.get_child(name)
            .ok_or_else(|| XmlError::MissingElement(name.to_string()))
    }

    /// Walk a path of child names
    #[must_use]
    pub fn find_path(&self, path: &[&str]) -> Option<&Element> {
        path.iter()
            .try_fold(self, |element, name| element.get_child(name))
    }

    /// Concatenated direct text content
    #[must_use]
    pub fn text_content(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// Text of the first child called `name`
    #[must_use]
    pub fn child_text(&self, name: &str) -> Option<String> {
        self.get_child(name).map(Element::text_content)
    }

    /// Parse a document and return its root element
    ///
    /// # Errors
    ///
    /// Returns error if the input is not well-formed XML
    pub fn parse(input: &str) -> Result<Self, XmlError> {
        let doc = roxmltree::Document::parse(input).map_err(|e| XmlError::Parse(e.to_string()))?;
        Ok(convert(doc.root_element(), None))
    }
}

fn convert(node: roxmltree::Node<'_, '_>, parent_ns: Option<&str>) -> Element {
    let namespace = node.tag_name().namespace();
    let mut element = Element::new(node.tag_name().name());

    if let Some(ns) = namespace {
        if parent_ns != Some(ns) {
            element.attrs.push(("xmlns".to_string(), ns.to_string()));
        }
    }
    for attribute in node.attributes() {
        element
            .attrs
            .push((attribute.name().to_string(), attribute.value().to_string()));
    }

    for child in node.children() {
        if child.is_element() {
            element
                .children
                .push(Node::Element(convert(child, namespace)));
        } else if let Some(text) = child.text().filter(|_| child.is_text()) {
            element.children.push(Node::Text(text.to_string()));
        }
    }
    element
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.name)?;
        for (name, value) in &self.attrs {
            write!(f, " {name}=\"{}\"", escape(value, true))?;
        }
        if self.children.is_empty() {
            return f.write_str("/>");
        }
        f.write_str(">")?;
        for node in &self.children {
            match node {
                Node::Element(e) => write!(f, "{e}")?,
                Node::Text(t) => f.write_str(&escape(t, false))?,
            }
        }
        write!(f, "</{}>", self.name)
    }
}

fn escape(input: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            '\'' if attribute => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
