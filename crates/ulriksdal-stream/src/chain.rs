#![forbid(unsafe_code)]

//! The processor chain: an ordered list of event processors that may insert
//! and remove processors while events flow through it.
//!
//! Dispatch is synchronous. A processor receives an event together with a
//! [`ChainCursor`] positioned at itself; whatever it forwards goes to the
//! next processor downstream, or to the output sink past the tail. Chain
//! mutations take effect for the next dispatch, so a processor inserted
//! directly after the current one receives the event the current one is
//! about to forward.

use crate::context::{SecurityContext, SoapVersion};
use tracing::trace;
use ulriksdal_core::{Error, Result};
use ulriksdal_xml::{EventSink, QName, XmlEvent};

/// Stable identity of a processor in a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessorHandle(u64);

#[cfg(test)]
impl ProcessorHandle {
    pub(crate) fn for_tests(n: u64) -> Self {
        Self(n)
    }
}

/// One stage of the chain.
pub trait Processor: Send {
    /// Handle one event. Forward it (or replacement events) through `chain`.
    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainCursor<'_>) -> Result<()>;

    /// Name used in logs.
    fn name(&self) -> &'static str;
}

struct Entry {
    handle: ProcessorHandle,
    /// `None` while the processor is handling an event.
    processor: Option<Box<dyn Processor>>,
    name: &'static str,
    /// Removed while busy; dropped when its call returns.
    detached: bool,
}

/// Ordered processors plus the security context they share.
pub struct ProcessorChain {
    entries: Vec<Entry>,
    context: SecurityContext,
    next_handle: u64,
    open: Vec<QName>,
    ended: bool,
}

impl ProcessorChain {
    pub fn new(context: SecurityContext) -> Self {
        Self {
            entries: Vec::new(),
            context,
            next_handle: 0,
            open: Vec::new(),
            ended: false,
        }
    }

    /// Append a processor at the tail.
    pub fn push(&mut self, processor: Box<dyn Processor>) -> ProcessorHandle {
        let entry = self.entry(processor);
        let handle = entry.handle;
        self.entries.push(entry);
        handle
    }

    /// Insert a processor directly before `marker`.
    pub fn insert_before(
        &mut self,
        marker: ProcessorHandle,
        processor: Box<dyn Processor>,
    ) -> Result<ProcessorHandle> {
        let index = self.index_of(marker)?;
        Ok(self.insert_at(index, processor))
    }

    /// Insert a processor directly after `marker`.
    pub fn insert_after(
        &mut self,
        marker: ProcessorHandle,
        processor: Box<dyn Processor>,
    ) -> Result<ProcessorHandle> {
        let index = self.index_of(marker)?;
        Ok(self.insert_at(index + 1, processor))
    }

    /// Remove a processor. A processor that is currently handling an event
    /// stays reachable for its own forwarding and is dropped afterwards.
    pub fn remove(&mut self, handle: ProcessorHandle) -> Result<()> {
        let index = self.index_of(handle)?;
        trace!(processor = self.entries[index].name, "removing processor");
        if self.entries[index].processor.is_none() {
            self.entries[index].detached = true;
        } else {
            self.entries.remove(index);
        }
        Ok(())
    }

    /// Number of processors still in the chain.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.detached).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Processor names in chain order.
    pub fn names(&self) -> Vec<&'static str> {
        self.entries
            .iter()
            .filter(|e| !e.detached)
            .map(|e| e.name)
            .collect()
    }

    pub fn context(&self) -> &SecurityContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut SecurityContext {
        &mut self.context
    }

    /// Feed one input event through the chain into `sink`.
    ///
    /// Input must be properly nested and end with exactly one `EndDocument`.
    pub fn process_event(&mut self, event: XmlEvent, sink: &mut dyn EventSink) -> Result<()> {
        self.check_input(&event)?;
        self.dispatch_from(0, event, sink)
    }

    fn check_input(&mut self, event: &XmlEvent) -> Result<()> {
        if self.ended {
            return Err(Error::MalformedInput("event after end of document".into()));
        }
        match event {
            XmlEvent::StartElement(start) => {
                if self.open.is_empty() {
                    self.context.set_soap_version(SoapVersion::of_envelope(start));
                }
                self.open.push(start.name.clone());
            }
            XmlEvent::EndElement(end) => match self.open.pop() {
                Some(name) if name == end.name => {}
                Some(name) => {
                    return Err(Error::MalformedInput(format!(
                        "end tag {} does not match start tag {name}",
                        end.name
                    )))
                }
                None => {
                    return Err(Error::MalformedInput(format!(
                        "end tag {} without open element",
                        end.name
                    )))
                }
            },
            XmlEvent::Characters(_) => {}
            XmlEvent::EndDocument => {
                if let Some(name) = self.open.last() {
                    return Err(Error::MalformedInput(format!(
                        "document ended inside element {name}"
                    )));
                }
                self.ended = true;
            }
        }
        Ok(())
    }

    fn entry(&mut self, processor: Box<dyn Processor>) -> Entry {
        let handle = ProcessorHandle(self.next_handle);
        self.next_handle += 1;
        Entry {
            handle,
            name: processor.name(),
            processor: Some(processor),
            detached: false,
        }
    }

    fn insert_at(&mut self, index: usize, processor: Box<dyn Processor>) -> ProcessorHandle {
        let entry = self.entry(processor);
        let handle = entry.handle;
        trace!(processor = entry.name, index, "inserting processor");
        self.entries.insert(index, entry);
        handle
    }

    fn index_of(&self, handle: ProcessorHandle) -> Result<usize> {
        self.entries
            .iter()
            .position(|e| e.handle == handle && !e.detached)
            .ok_or_else(|| Error::ChainProtocol(format!("no processor with {handle:?} in chain")))
    }

    fn dispatch_from(
        &mut self,
        start: usize,
        event: XmlEvent,
        sink: &mut dyn EventSink,
    ) -> Result<()> {
        let next = self.entries[start.min(self.entries.len())..]
            .iter()
            .position(|e| !e.detached && e.processor.is_some())
            .map(|offset| start + offset);
        let Some(index) = next else {
            return sink.write_event(event);
        };

        let entry = &mut self.entries[index];
        let handle = entry.handle;
        let Some(mut processor) = entry.processor.take() else {
            return Err(Error::ChainProtocol("processor re-entered".into()));
        };
        trace!(processor = entry.name, ?event, "dispatch");

        let result = {
            let mut cursor = ChainCursor {
                chain: self,
                sink,
                handle,
            };
            processor.process_event(event, &mut cursor)
        };

        if let Some(pos) = self.entries.iter().position(|e| e.handle == handle) {
            if self.entries[pos].detached {
                self.entries.remove(pos);
            } else {
                self.entries[pos].processor = Some(processor);
            }
        }
        result
    }
}

/// A processor's view of the chain while it handles an event.
pub struct ChainCursor<'a> {
    chain: &'a mut ProcessorChain,
    sink: &'a mut dyn EventSink,
    handle: ProcessorHandle,
}

impl ChainCursor<'_> {
    /// Pass an event to the next processor downstream.
    pub fn forward(&mut self, event: XmlEvent) -> Result<()> {
        let index = self
            .chain
            .entries
            .iter()
            .position(|e| e.handle == self.handle)
            .ok_or_else(|| Error::ChainProtocol(format!("{:?} left the chain", self.handle)))?;
        self.chain.dispatch_from(index + 1, event, &mut *self.sink)
    }

    /// Handle of the processor holding this cursor.
    pub fn handle(&self) -> ProcessorHandle {
        self.handle
    }

    pub fn context(&self) -> &SecurityContext {
        &self.chain.context
    }

    pub fn context_mut(&mut self) -> &mut SecurityContext {
        &mut self.chain.context
    }

    /// Insert a processor directly after the current one.
    pub fn insert_after_self(&mut self, processor: Box<dyn Processor>) -> Result<ProcessorHandle> {
        self.chain.insert_after(self.handle, processor)
    }

    pub fn insert_before(
        &mut self,
        marker: ProcessorHandle,
        processor: Box<dyn Processor>,
    ) -> Result<ProcessorHandle> {
        self.chain.insert_before(marker, processor)
    }

    pub fn insert_after(
        &mut self,
        marker: ProcessorHandle,
        processor: Box<dyn Processor>,
    ) -> Result<ProcessorHandle> {
        self.chain.insert_after(marker, processor)
    }

    pub fn remove(&mut self, handle: ProcessorHandle) -> Result<()> {
        self.chain.remove(handle)
    }

    /// Remove the current processor once this event is handled.
    pub fn remove_self(&mut self) -> Result<()> {
        self.chain.remove(self.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use ulriksdal_keys::KeysManager;
    use ulriksdal_xml::EventReader;

    fn new_chain() -> ProcessorChain {
        ProcessorChain::new(SecurityContext::new(Arc::new(KeysManager::new())))
    }

    /// Wraps every text event in brackets.
    struct Bracket;

    impl Processor for Bracket {
        fn process_event(&mut self, event: XmlEvent, chain: &mut ChainCursor<'_>) -> Result<()> {
            match event {
                XmlEvent::Characters(t) => chain.forward(XmlEvent::Characters(format!("[{t}]"))),
                other => chain.forward(other),
            }
        }

        fn name(&self) -> &'static str {
            "bracket"
        }
    }

    /// Inserts a `Bracket` after itself on the first start element, then
    /// removes itself.
    struct Spawner;

    impl Processor for Spawner {
        fn process_event(&mut self, event: XmlEvent, chain: &mut ChainCursor<'_>) -> Result<()> {
            if event.start().is_some() {
                chain.insert_after_self(Box::new(Bracket))?;
                chain.remove_self()?;
            }
            chain.forward(event)
        }

        fn name(&self) -> &'static str {
            "spawner"
        }
    }

    fn run(chain: &mut ProcessorChain, xml: &str) -> Result<Vec<XmlEvent>> {
        let mut out: Vec<XmlEvent> = Vec::new();
        for event in EventReader::read_all(xml)? {
            chain.process_event(event, &mut out)?;
        }
        Ok(out)
    }

    #[test]
    fn test_empty_chain_is_identity() {
        let xml = "<a x=\"1\"><b>t</b></a>";
        let out = run(&mut new_chain(), xml).unwrap();
        assert_eq!(out, EventReader::read_all(xml).unwrap());
    }

    #[test]
    fn test_insert_after_self_sees_current_event_and_self_removal() {
        let mut chain = new_chain();
        chain.push(Box::new(Spawner));
        let out = run(&mut chain, "<a>t</a>").unwrap();
        assert!(out.contains(&XmlEvent::Characters("[t]".into())));
        assert_eq!(chain.names(), vec!["bracket"]);
    }

    #[test]
    fn test_insert_before_and_after_markers() {
        let mut chain = new_chain();
        let first = chain.push(Box::new(Bracket));
        chain.insert_after(first, Box::new(Spawner)).unwrap();
        chain.insert_before(first, Box::new(Spawner)).unwrap();
        assert_eq!(chain.names(), vec!["spawner", "bracket", "spawner"]);
    }

    #[test]
    fn test_unknown_handle_is_a_protocol_error() {
        let mut chain = new_chain();
        let handle = chain.push(Box::new(Bracket));
        chain.remove(handle).unwrap();
        assert!(chain.is_empty());
        assert!(matches!(chain.remove(handle), Err(Error::ChainProtocol(_))));
        assert!(matches!(
            chain.insert_after(handle, Box::new(Bracket)),
            Err(Error::ChainProtocol(_))
        ));
    }

    #[test]
    fn test_malformed_input_is_rejected() {
        let mut chain = new_chain();
        let mut out: Vec<XmlEvent> = Vec::new();
        let events = EventReader::read_all("<a><b></b></a>").unwrap();
        chain.process_event(events[0].clone(), &mut out).unwrap();
        // </b> before <b>
        let result = chain.process_event(events[2].clone(), &mut out);
        assert!(matches!(result, Err(Error::MalformedInput(_))));

        let mut unfinished = new_chain();
        unfinished.process_event(events[0].clone(), &mut out).unwrap();
        let result = unfinished.process_event(XmlEvent::EndDocument, &mut out);
        assert!(matches!(result, Err(Error::MalformedInput(_))));
    }

    #[test]
    fn test_events_after_end_document_are_rejected() {
        let mut chain = new_chain();
        let mut out: Vec<XmlEvent> = Vec::new();
        chain.process_event(XmlEvent::EndDocument, &mut out).unwrap();
        assert!(chain.process_event(XmlEvent::EndDocument, &mut out).is_err());
    }
}
