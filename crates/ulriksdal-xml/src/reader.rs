#![forbid(unsafe_code)]

//! Pull reader turning XML text into [`XmlEvent`]s.
//!
//! Built on quick-xml, which does not expand external entities. Namespace
//! prefixes are resolved here so that every event carries full qualified
//! names and the ancestor path.

use crate::event::{Attribute, EndElement, Namespace, QName, StartElement, XmlEvent};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use ulriksdal_core::{ns, Error, Result};

/// Streaming event reader over a borrowed document.
pub struct EventReader<'a> {
    reader: Reader<&'a [u8]>,
    /// Namespace declarations per open element.
    scopes: Vec<Vec<Namespace>>,
    path: Vec<QName>,
    pending_text: String,
    pending: Option<XmlEvent>,
    finished: bool,
}

impl<'a> EventReader<'a> {
    pub fn new(xml: &'a str) -> Self {
        let mut reader = Reader::from_str(xml);
        let config = reader.config_mut();
        config.expand_empty_elements = true;
        config.check_end_names = true;
        Self {
            reader,
            scopes: Vec::new(),
            path: Vec::new(),
            pending_text: String::new(),
            pending: None,
            finished: false,
        }
    }

    /// Read the next event; `EndDocument` is returned once, then `None`.
    pub fn next_event(&mut self) -> Result<Option<XmlEvent>> {
        if let Some(event) = self.pending.take() {
            return Ok(Some(event));
        }
        if self.finished {
            return Ok(None);
        }
        loop {
            let event = self
                .reader
                .read_event()
                .map_err(|e| {
                    Error::XmlParse(format!("at byte {}: {e}", self.reader.buffer_position()))
                })?;
            match event {
                Event::Start(start) => {
                    let start = self.resolve_start(&start)?;
                    return Ok(Some(self.flush_text_before(XmlEvent::StartElement(start))));
                }
                Event::End(end) => {
                    let raw = std::str::from_utf8(end.name().as_ref())
                        .map_err(|e| Error::XmlParse(format!("invalid UTF-8 in name: {e}")))?
                        .to_owned();
                    let name = self.resolve_element_name(&raw)?;
                    self.scopes.pop();
                    self.path.pop();
                    let end = XmlEvent::EndElement(EndElement::new(name));
                    return Ok(Some(self.flush_text_before(end)));
                }
                Event::Text(text) => {
                    if self.path.is_empty() {
                        continue;
                    }
                    let text = text
                        .unescape()
                        .map_err(|e| Error::XmlParse(format!("bad text content: {e}")))?;
                    self.pending_text.push_str(&text);
                }
                Event::CData(cdata) => {
                    if self.path.is_empty() {
                        continue;
                    }
                    let bytes = cdata.into_inner();
                    let text = std::str::from_utf8(&bytes)
                        .map_err(|e| Error::XmlParse(format!("invalid UTF-8 in CDATA: {e}")))?;
                    self.pending_text.push_str(text);
                }
                Event::Eof => {
                    if !self.path.is_empty() {
                        return Err(Error::XmlParse(format!(
                            "unexpected end of input inside <{}>",
                            self.path[self.path.len() - 1].qualified()
                        )));
                    }
                    self.finished = true;
                    return Ok(Some(XmlEvent::EndDocument));
                }
                // Declarations, comments, processing instructions and DTDs
                // carry nothing the pipeline transforms.
                _ => {}
            }
        }
    }

    /// Read the whole document into a vector of events.
    pub fn read_all(xml: &'a str) -> Result<Vec<XmlEvent>> {
        let mut reader = Self::new(xml);
        let mut events = Vec::new();
        while let Some(event) = reader.next_event()? {
            events.push(event);
        }
        Ok(events)
    }

    fn flush_text_before(&mut self, event: XmlEvent) -> XmlEvent {
        if self.pending_text.is_empty() {
            return event;
        }
        self.pending = Some(event);
        XmlEvent::Characters(std::mem::take(&mut self.pending_text))
    }

    fn resolve_start(&mut self, start: &BytesStart<'_>) -> Result<StartElement> {
        let raw_name = std::str::from_utf8(start.name().as_ref())
            .map_err(|e| Error::XmlParse(format!("invalid UTF-8 in name: {e}")))?
            .to_owned();

        let mut declared = Vec::new();
        let mut raw_attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| Error::XmlParse(format!("bad attribute: {e}")))?;
            let key = std::str::from_utf8(attr.key.as_ref())
                .map_err(|e| Error::XmlParse(format!("invalid UTF-8 in attribute name: {e}")))?
                .to_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| Error::XmlParse(format!("bad attribute value: {e}")))?
                .into_owned();
            if key == "xmlns" {
                declared.push(Namespace::new("", &value));
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                declared.push(Namespace::new(prefix, &value));
            } else {
                raw_attrs.push((key, value));
            }
        }
        self.scopes.push(declared.clone());

        let name = self.resolve_element_name(&raw_name)?;
        let mut attributes = Vec::with_capacity(raw_attrs.len());
        for (key, value) in raw_attrs {
            let attr_name = match key.split_once(':') {
                // Unprefixed attributes are in no namespace.
                None => QName::local(&key),
                Some((prefix, local)) => QName::new(&self.lookup(prefix)?, local, prefix),
            };
            attributes.push(Attribute::new(attr_name, value));
        }

        self.path.push(name.clone());
        Ok(StartElement {
            name,
            attributes,
            namespaces: declared,
            path: self.path.clone(),
        })
    }

    fn resolve_element_name(&self, raw: &str) -> Result<QName> {
        match raw.split_once(':') {
            Some((prefix, local)) => Ok(QName::new(&self.lookup(prefix)?, local, prefix)),
            None => Ok(QName::new(&self.lookup("")?, raw, "")),
        }
    }

    fn lookup(&self, prefix: &str) -> Result<String> {
        if prefix == "xml" {
            return Ok(ns::XML.to_owned());
        }
        for scope in self.scopes.iter().rev() {
            if let Some(decl) = scope.iter().find(|d| d.prefix == prefix) {
                return Ok(decl.uri.clone());
            }
        }
        if prefix.is_empty() {
            Ok(String::new())
        } else {
            Err(Error::XmlParse(format!("unbound namespace prefix: {prefix}")))
        }
    }
}

impl Iterator for EventReader<'_> {
    type Item = Result<XmlEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_event().transpose()
    }
}
