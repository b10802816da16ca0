#![forbid(unsafe_code)]

//! Exclusive XML Canonicalization (exc-C14N 1.0) for the Ulriksdal
//! streaming security library.
//!
//! Canonicalization runs incrementally over [`XmlEvent`](ulriksdal_xml::XmlEvent)s
//! so a signed subtree can be digested while it streams past.

pub mod escape;
pub mod exclusive;
pub mod render;

pub use exclusive::{canonicalize, ExclusiveCanonicalizer};
