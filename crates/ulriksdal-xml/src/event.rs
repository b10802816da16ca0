#![forbid(unsafe_code)]

//! The linear event model the security pipeline operates on.

use std::hash::{Hash, Hasher};

/// A qualified name: namespace URI plus local name.
///
/// The prefix is carried for serialization only; two names are equal when
/// their namespace URI and local name are equal.
#[derive(Debug, Clone, Eq)]
pub struct QName {
    /// Namespace URI ("" when the name is in no namespace).
    pub namespace: String,
    /// Local part of the name.
    pub local: String,
    /// Prefix used on the wire ("" for the default namespace).
    pub prefix: String,
}

impl QName {
    /// A name in the given namespace, written with the given prefix.
    pub fn new(namespace: &str, local: &str, prefix: &str) -> Self {
        Self {
            namespace: namespace.to_owned(),
            local: local.to_owned(),
            prefix: prefix.to_owned(),
        }
    }

    /// A name in no namespace.
    pub fn local(local: &str) -> Self {
        Self::new("", local, "")
    }

    /// Check namespace URI and local name.
    pub fn is(&self, namespace: &str, local: &str) -> bool {
        self.namespace == namespace && self.local == local
    }

    /// The name as written: `prefix:local` or `local`.
    pub fn qualified(&self) -> String {
        if self.prefix.is_empty() {
            self.local.clone()
        } else {
            format!("{}:{}", self.prefix, self.local)
        }
    }
}

impl PartialEq for QName {
    fn eq(&self, other: &Self) -> bool {
        self.namespace == other.namespace && self.local == other.local
    }
}

impl Hash for QName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespace.hash(state);
        self.local.hash(state);
    }
}

impl std::fmt::Display for QName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.local)
        } else {
            write!(f, "{{{}}}{}", self.namespace, self.local)
        }
    }
}

/// An attribute on a start element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

impl Attribute {
    pub fn new(name: QName, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

/// A namespace declaration (`xmlns` or `xmlns:prefix`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    /// The prefix ("" for the default namespace).
    pub prefix: String,
    pub uri: String,
}

impl Namespace {
    pub fn new(prefix: &str, uri: &str) -> Self {
        Self {
            prefix: prefix.to_owned(),
            uri: uri.to_owned(),
        }
    }
}

/// An element start tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartElement {
    pub name: QName,
    /// Attributes in document order, namespace declarations excluded.
    pub attributes: Vec<Attribute>,
    /// Namespace declarations made on this element.
    pub namespaces: Vec<Namespace>,
    /// Names from the document root down to and including this element.
    pub path: Vec<QName>,
}

impl StartElement {
    /// Create a start element below `parent_path`, declaring nothing.
    pub fn new(name: QName, parent_path: &[QName]) -> Self {
        let mut path = Vec::with_capacity(parent_path.len() + 1);
        path.extend_from_slice(parent_path);
        path.push(name.clone());
        Self {
            name,
            attributes: Vec::new(),
            namespaces: Vec::new(),
            path,
        }
    }

    /// Declare the element's own prefix on it.
    pub fn declaring_own_namespace(mut self) -> Self {
        let ns = Namespace::new(&self.name.prefix, &self.name.namespace);
        if !self.namespaces.contains(&ns) {
            self.namespaces.push(ns);
        }
        self
    }

    /// Add a namespace declaration.
    pub fn with_namespace(mut self, prefix: &str, uri: &str) -> Self {
        let ns = Namespace::new(prefix, uri);
        if !self.namespaces.contains(&ns) {
            self.namespaces.push(ns);
        }
        self
    }

    /// Add an attribute.
    pub fn with_attribute(mut self, name: QName, value: impl Into<String>) -> Self {
        self.attributes.push(Attribute::new(name, value));
        self
    }

    /// Depth of this element; the document element has depth 1.
    pub fn depth(&self) -> usize {
        self.path.len()
    }

    /// Path of the parent element.
    pub fn parent_path(&self) -> &[QName] {
        &self.path[..self.path.len().saturating_sub(1)]
    }

    /// Look up an attribute value by namespace and local name.
    pub fn attribute(&self, namespace: &str, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.is(namespace, local))
            .map(|a| a.value.as_str())
    }
}

/// An element end tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndElement {
    pub name: QName,
}

impl EndElement {
    pub fn new(name: QName) -> Self {
        Self { name }
    }
}

/// One unit of the forward-only document event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlEvent {
    StartElement(StartElement),
    Characters(String),
    EndElement(EndElement),
    EndDocument,
}

impl XmlEvent {
    pub fn start(&self) -> Option<&StartElement> {
        match self {
            XmlEvent::StartElement(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_end_document(&self) -> bool {
        matches!(self, XmlEvent::EndDocument)
    }

    /// The end event matching a start element.
    pub fn end_of(start: &StartElement) -> Self {
        XmlEvent::EndElement(EndElement::new(start.name.clone()))
    }
}
