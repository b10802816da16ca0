#![forbid(unsafe_code)]

//! Serializing [`XmlEvent`]s back to XML text with quick-xml's `Writer`.
//!
//! The writer tracks which prefixes are bound on the way down and declares
//! any prefix an element or attribute uses but that is not yet in scope.
//! This makes it usable both for whole documents and for fragments cut out
//! of a larger document (the plaintext of an encrypted part), which must
//! carry the bindings they inherited from ancestors.

use crate::event::{Namespace, StartElement, XmlEvent};
use crate::sink::EventSink;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use ulriksdal_core::{Error, Result};

/// An event serializer.
pub struct EventWriter {
    writer: quick_xml::Writer<Vec<u8>>,
    scopes: Vec<Vec<Namespace>>,
}

impl EventWriter {
    /// Create a new writer.
    pub fn new() -> Self {
        Self {
            writer: quick_xml::Writer::new(Vec::new()),
            scopes: Vec::new(),
        }
    }

    /// Write the XML declaration.
    pub fn write_declaration(&mut self) -> Result<()> {
        let decl = BytesDecl::new("1.0", Some("UTF-8"), None);
        self.emit(Event::Decl(decl))
    }

    /// Serialize one event.
    pub fn write(&mut self, event: &XmlEvent) -> Result<()> {
        match event {
            XmlEvent::StartElement(start) => self.write_start(start),
            XmlEvent::Characters(text) => self.emit(Event::Text(BytesText::new(text))),
            XmlEvent::EndElement(end) => {
                if self.scopes.pop().is_none() {
                    return Err(Error::MalformedInput(format!(
                        "end tag </{}> without open element",
                        end.name.qualified()
                    )));
                }
                self.emit(Event::End(BytesEnd::new(end.name.qualified())))
            }
            XmlEvent::EndDocument => Ok(()),
        }
    }

    /// Number of elements currently open.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Finish writing and return the XML bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.writer.into_inner()
    }

    /// Finish writing and return the XML as a string.
    pub fn into_string(self) -> Result<String> {
        String::from_utf8(self.into_bytes())
            .map_err(|e| Error::MalformedInput(format!("serialized output is not UTF-8: {e}")))
    }

    fn write_start(&mut self, start: &StartElement) -> Result<()> {
        let mut declarations = start.namespaces.clone();
        self.declare_if_unbound(&mut declarations, &start.name.prefix, &start.name.namespace);
        for attr in &start.attributes {
            if !attr.name.prefix.is_empty() {
                self.declare_if_unbound(&mut declarations, &attr.name.prefix, &attr.name.namespace);
            }
        }

        let mut tag = BytesStart::new(start.name.qualified());
        for decl in &declarations {
            let key = if decl.prefix.is_empty() {
                "xmlns".to_owned()
            } else {
                format!("xmlns:{}", decl.prefix)
            };
            tag.push_attribute((key.as_str(), decl.uri.as_str()));
        }
        for attr in &start.attributes {
            let key = attr.name.qualified();
            tag.push_attribute((key.as_str(), attr.value.as_str()));
        }

        self.scopes.push(declarations);
        self.emit(Event::Start(tag))
    }

    fn declare_if_unbound(&self, declarations: &mut Vec<Namespace>, prefix: &str, uri: &str) {
        if prefix == "xml" {
            return;
        }
        let bound = declarations
            .iter()
            .find(|d| d.prefix == prefix)
            .map(|d| d.uri.as_str())
            .or_else(|| self.lookup(prefix));
        let in_scope = match bound {
            Some(bound) => bound == uri,
            // Nothing bound: only the empty default namespace is implied.
            None => prefix.is_empty() && uri.is_empty(),
        };
        if !in_scope {
            declarations.push(Namespace::new(prefix, uri));
        }
    }

    fn lookup(&self, prefix: &str) -> Option<&str> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter())
            .find(|d| d.prefix == prefix)
            .map(|d| d.uri.as_str())
    }

    fn emit(&mut self, event: Event<'_>) -> Result<()> {
        self.writer
            .write_event(event)
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))
    }
}

impl Default for EventWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for EventWriter {
    fn write_event(&mut self, event: XmlEvent) -> Result<()> {
        self.write(&event)
    }
}

/// Serialize a complete event sequence to a string.
pub fn write_document(events: &[XmlEvent]) -> Result<String> {
    let mut writer = EventWriter::new();
    for event in events {
        writer.write(event)?;
    }
    writer.into_string()
}
