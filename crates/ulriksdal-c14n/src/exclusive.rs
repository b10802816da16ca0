#![forbid(unsafe_code)]

//! Exclusive Canonical XML 1.0 (exc-C14N) over an event stream.
//!
//! Algorithm URI: `http://www.w3.org/2001/10/xml-exc-c14n#`
//!
//! Only "visibly utilized" namespace declarations are output: the prefix of
//! the element's own name and the prefixes of its attributes. A declaration
//! is rendered when the nearest output ancestor did not already render the
//! same binding. Because every event carries fully resolved names, the
//! canonicalizer needs no view of the ancestors outside the subtree.

use crate::escape;
use crate::render::{Attr, NsDecl};
use std::collections::BTreeMap;
use ulriksdal_core::{Error, Result};
use ulriksdal_xml::{StartElement, XmlEvent};

/// Incremental exc-C14N of one element subtree (or a sequence of them).
#[derive(Debug, Default)]
pub struct ExclusiveCanonicalizer {
    output: Vec<u8>,
    /// Bindings rendered by each open element.
    rendered: Vec<BTreeMap<String, String>>,
    open: Vec<String>,
}

impl ExclusiveCanonicalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next event of the subtree.
    pub fn process(&mut self, event: &XmlEvent) -> Result<()> {
        match event {
            XmlEvent::StartElement(start) => self.start_element(start)?,
            XmlEvent::Characters(text) => {
                // Character data outside the canonicalized element is not part of it.
                if !self.open.is_empty() {
                    escape::escape_text(text, &mut self.output);
                }
            }
            XmlEvent::EndElement(end) => {
                let name = self.open.pop().ok_or_else(|| {
                    let tag = end.name.qualified();
                    Error::Canonicalization(format!("unbalanced end tag </{tag}>"))
                })?;
                self.rendered.pop();
                self.output.extend_from_slice(b"</");
                self.output.extend_from_slice(name.as_bytes());
                self.output.push(b'>');
            }
            XmlEvent::EndDocument => {}
        }
        Ok(())
    }

    /// True while an element fed to the canonicalizer is still open.
    pub fn is_open(&self) -> bool {
        !self.open.is_empty()
    }

    /// Return the canonical octets.
    pub fn finish(self) -> Result<Vec<u8>> {
        if let Some(name) = self.open.last() {
            return Err(Error::Canonicalization(format!("element <{name}> was never closed")));
        }
        Ok(self.output)
    }

    fn start_element(&mut self, start: &StartElement) -> Result<()> {
        let mut utilized: Vec<(&str, &str)> =
            vec![(start.name.prefix.as_str(), start.name.namespace.as_str())];
        for attr in &start.attributes {
            if !attr.name.prefix.is_empty() {
                utilized.push((attr.name.prefix.as_str(), attr.name.namespace.as_str()));
            }
        }

        let mut ns_decls: Vec<NsDecl> = Vec::new();
        for (prefix, uri) in utilized {
            if prefix == "xml" || ns_decls.iter().any(|d| d.prefix == prefix) {
                continue;
            }
            let previously = self.rendered_binding(prefix);
            let needed = if prefix.is_empty() && uri.is_empty() {
                // xmlns="" only undoes a rendered non-empty default namespace.
                previously.is_some_and(|p| !p.is_empty())
            } else {
                previously != Some(uri)
            };
            if needed {
                ns_decls.push(NsDecl {
                    prefix: prefix.to_owned(),
                    uri: uri.to_owned(),
                });
            }
        }
        ns_decls.sort();

        let mut attrs: Vec<Attr> = start
            .attributes
            .iter()
            .map(|a| Attr {
                ns_uri: a.name.namespace.clone(),
                local_name: a.name.local.clone(),
                qualified_name: a.name.qualified(),
                value: a.value.clone(),
            })
            .collect();
        attrs.sort();

        let name = start.name.qualified();
        self.output.push(b'<');
        self.output.extend_from_slice(name.as_bytes());
        for decl in &ns_decls {
            decl.render(&mut self.output);
        }
        for attr in &attrs {
            attr.render(&mut self.output);
        }
        self.output.push(b'>');

        self.rendered.push(
            ns_decls
                .into_iter()
                .map(|d| (d.prefix, d.uri))
                .collect(),
        );
        self.open.push(name);
        Ok(())
    }

    fn rendered_binding(&self, prefix: &str) -> Option<&str> {
        self.rendered
            .iter()
            .rev()
            .find_map(|scope| scope.get(prefix))
            .map(String::as_str)
    }
}

/// Canonicalize a complete event sequence in one call.
pub fn canonicalize(events: &[XmlEvent]) -> Result<Vec<u8>> {
    let mut c14n = ExclusiveCanonicalizer::new();
    for event in events {
        c14n.process(event)?;
    }
    c14n.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulriksdal_xml::EventReader;

    fn c14n_of(xml: &str) -> String {
        let events = EventReader::read_all(xml).unwrap();
        String::from_utf8(canonicalize(&events).unwrap()).unwrap()
    }

    #[test]
    fn test_unused_namespaces_are_dropped() {
        let out = c14n_of(r#"<a:r xmlns:a="urn:a" xmlns:b="urn:b"><a:c/></a:r>"#);
        assert_eq!(out, r#"<a:r xmlns:a="urn:a"><a:c></a:c></a:r>"#);
    }

    #[test]
    fn test_attributes_are_sorted_and_prefixes_declared() {
        let out = c14n_of(r#"<r xmlns:z="urn:z" z:b="2" b="1" a="0"/>"#);
        assert_eq!(out, r#"<r xmlns:z="urn:z" a="0" b="1" z:b="2"></r>"#);
    }

    #[test]
    fn test_default_namespace_undeclared_for_unqualified_child() {
        let out = c14n_of(r#"<r xmlns="urn:d"><c xmlns=""/></r>"#);
        assert_eq!(out, r#"<r xmlns="urn:d"><c xmlns=""></c></r>"#);
    }

    #[test]
    fn test_subtree_renders_inherited_binding() {
        let xml = r#"<a:r xmlns:a="urn:a"><a:c k="v">x&amp;y</a:c></a:r>"#;
        let events = EventReader::read_all(xml).unwrap();
        let out = canonicalize(&events[1..4]).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"<a:c xmlns:a="urn:a" k="v">x&amp;y</a:c>"#
        );
    }

    #[test]
    fn test_incremental_process_tracks_open_element() {
        let events = EventReader::read_all(r#"<a:r xmlns:a="urn:a"><a:c/></a:r>"#).unwrap();
        let mut c14n = ExclusiveCanonicalizer::new();
        c14n.process(&events[0]).unwrap();
        assert!(c14n.is_open());
        for event in &events[1..3] {
            c14n.process(event).unwrap();
            assert!(c14n.is_open());
        }
        c14n.process(&events[3]).unwrap();
        assert!(!c14n.is_open());
        let out = c14n.finish().unwrap();
        assert_eq!(out, br#"<a:r xmlns:a="urn:a"><a:c></a:c></a:r>"#);
    }

    #[test]
    fn test_unbalanced_input_fails() {
        let events = EventReader::read_all("<r><c/></r>").unwrap();
        assert!(canonicalize(&events[..2]).is_err());
        assert!(canonicalize(&events[2..]).is_err());
    }
}
