#![forbid(unsafe_code)]

//! XML event model for the Ulriksdal streaming security library.
//!
//! Provides the forward-only event representation the security pipeline
//! consumes and produces, a namespace-resolving reader over `quick-xml`,
//! and a writer that serializes events back to text.

pub mod event;
pub mod reader;
pub mod sink;
pub mod writer;

pub use event::{Attribute, EndElement, Namespace, QName, StartElement, XmlEvent};
pub use reader::EventReader;
pub use sink::EventSink;
pub use writer::{write_document, EventWriter};
