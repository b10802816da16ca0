#![forbid(unsafe_code)]

//! Downstream consumers of transformed events.

use crate::event::XmlEvent;
use ulriksdal_core::Result;

/// Receives the events leaving the processor chain.
pub trait EventSink {
    fn write_event(&mut self, event: XmlEvent) -> Result<()>;
}

impl EventSink for Vec<XmlEvent> {
    fn write_event(&mut self, event: XmlEvent) -> Result<()> {
        self.push(event);
        Ok(())
    }
}
