#![forbid(unsafe_code)]

//! Building synthesized element structure as events with correct paths.

use ulriksdal_xml::{EndElement, QName, StartElement, XmlEvent};

/// Accumulates events for elements emitted below a fixed parent path.
#[derive(Debug)]
pub(crate) struct FragmentBuilder {
    events: Vec<XmlEvent>,
    path: Vec<QName>,
    base: usize,
}

impl FragmentBuilder {
    pub fn new(parent_path: &[QName]) -> Self {
        Self {
            events: Vec::new(),
            path: parent_path.to_vec(),
            base: parent_path.len(),
        }
    }

    /// A start element at the current position, not yet emitted.
    pub fn element(&self, namespace: &str, local: &str, prefix: &str) -> StartElement {
        StartElement::new(QName::new(namespace, local, prefix), &self.path)
    }

    pub fn start(&mut self, start: StartElement) -> &mut Self {
        self.path.push(start.name.clone());
        self.events.push(XmlEvent::StartElement(start));
        self
    }

    pub fn text(&mut self, text: impl Into<String>) -> &mut Self {
        self.events.push(XmlEvent::Characters(text.into()));
        self
    }

    /// Close the innermost element opened by this builder.
    pub fn end(&mut self) -> &mut Self {
        if self.path.len() > self.base {
            if let Some(name) = self.path.pop() {
                self.events.push(XmlEvent::EndElement(EndElement::new(name)));
            }
        }
        self
    }

    /// Emit an element with no content.
    pub fn empty(&mut self, start: StartElement) -> &mut Self {
        self.start(start).end()
    }

    /// Emit an element containing only text.
    pub fn text_element(&mut self, start: StartElement, text: impl Into<String>) -> &mut Self {
        self.start(start).text(text).end()
    }

    /// Index of the next event to be emitted.
    pub fn position(&self) -> usize {
        self.events.len()
    }

    pub fn events(&self) -> &[XmlEvent] {
        &self.events
    }

    /// The events so far, and the end tags still owed for open elements.
    pub fn into_parts(self) -> (Vec<XmlEvent>, Vec<XmlEvent>) {
        let closing = self.path[self.base..]
            .iter()
            .rev()
            .map(|name| XmlEvent::EndElement(EndElement::new(name.clone())))
            .collect();
        (self.events, closing)
    }

    /// All events, closing whatever is still open.
    pub fn finish(self) -> Vec<XmlEvent> {
        let (mut events, closing) = self.into_parts();
        events.extend(closing);
        events
    }
}
