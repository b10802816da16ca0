#![forbid(unsafe_code)]

//! Secure part rules and matching against start elements.

use serde::Deserialize;
use ulriksdal_core::{ns, Error};
use ulriksdal_xml::{QName, StartElement};

/// What of a matched element is transformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modifier {
    /// The element including its own tags.
    #[default]
    Element,
    /// Only the element's children.
    Content,
}

/// Where in the SOAP envelope a rule applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartScope {
    #[default]
    Anywhere,
    /// Below `soap:Header`.
    Header,
    /// `soap:Body` itself or below it.
    Body,
}

/// How a rule selects elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartName {
    Exact(QName),
    /// Every element.
    Any,
    /// The element carrying this `wsu:Id` or `Id`.
    Id(String),
}

/// One configured secure part rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "SecurePartConfig")]
pub struct SecurePart {
    pub name: PartName,
    pub scope: PartScope,
    pub modifier: Modifier,
}

impl SecurePart {
    /// Rule for elements with the given qualified name.
    pub fn element(namespace: &str, local: &str) -> Self {
        Self::new(PartName::Exact(QName::new(namespace, local, "")))
    }

    /// Rule matching every element.
    pub fn any() -> Self {
        Self::new(PartName::Any)
    }

    /// Rule matching the element with the given id.
    pub fn by_id(id: &str) -> Self {
        Self::new(PartName::Id(id.to_owned()))
    }

    fn new(name: PartName) -> Self {
        Self {
            name,
            scope: PartScope::Anywhere,
            modifier: Modifier::Element,
        }
    }

    pub fn with_scope(mut self, scope: PartScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_modifier(mut self, modifier: Modifier) -> Self {
        self.modifier = modifier;
        self
    }

    /// Check the rule against a start element.
    pub fn matches(&self, start: &StartElement) -> bool {
        let name_matches = match &self.name {
            PartName::Exact(name) => start.name == *name,
            PartName::Any => true,
            PartName::Id(id) => element_id(start) == Some(id.as_str()),
        };
        name_matches && self.scope_matches(start)
    }

    fn scope_matches(&self, start: &StartElement) -> bool {
        match self.scope {
            PartScope::Anywhere => true,
            PartScope::Header => start.depth() >= 3 && in_envelope_child(start, ns::node::HEADER),
            PartScope::Body => start.depth() >= 2 && in_envelope_child(start, ns::node::BODY),
        }
    }
}

/// First rule matching `start`, or `None` while a transform of the same
/// kind is active.
pub fn secure_part_matches<'a>(
    start: &StartElement,
    parts: &'a [SecurePart],
    guard_active: bool,
) -> Option<&'a SecurePart> {
    if guard_active {
        return None;
    }
    parts.iter().find(|part| part.matches(start))
}

/// The element's `wsu:Id`, falling back to an unqualified `Id`.
pub fn element_id(start: &StartElement) -> Option<&str> {
    start
        .attribute(ns::WSU, ns::attr::ID)
        .or_else(|| start.attribute("", ns::attr::ID))
}

/// True when `path[1]` is the SOAP header or body below a SOAP envelope.
fn in_envelope_child(start: &StartElement, local: &str) -> bool {
    let path = &start.path;
    path.len() >= 2
        && path[0].local == ns::node::ENVELOPE
        && ns::is_soap(&path[0].namespace)
        && path[1].is(&path[0].namespace, local)
}

/// True when `start` is a direct child of the SOAP header.
pub fn is_header_block(start: &StartElement) -> bool {
    start.depth() == 3 && in_envelope_child(start, ns::node::HEADER)
}

/// True when `start` is the SOAP body itself.
pub fn is_soap_body(start: &StartElement) -> bool {
    start.depth() == 2 && in_envelope_child(start, ns::node::BODY)
}

// ── Configuration form ──────────────────────────────────────────────

/// A rule as written in configuration:
///
/// ```yaml
/// - name: "{urn:example:pay}amount"   # Clark notation, bare local name, or "*"
///   scope: body
///   modifier: content
/// - id: "Timestamp-1"
/// ```
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SecurePartConfig {
    name: Option<String>,
    id: Option<String>,
    #[serde(default)]
    scope: PartScope,
    #[serde(default)]
    modifier: Modifier,
}

impl TryFrom<SecurePartConfig> for SecurePart {
    type Error = Error;

    fn try_from(config: SecurePartConfig) -> Result<Self, Error> {
        let name = match (config.name, config.id) {
            (Some(name), None) => parse_part_name(&name)?,
            (None, Some(id)) => PartName::Id(id),
            _ => {
                return Err(Error::Config(
                    "a secure part needs exactly one of 'name' or 'id'".into(),
                ))
            }
        };
        Ok(SecurePart {
            name,
            scope: config.scope,
            modifier: config.modifier,
        })
    }
}

fn parse_part_name(name: &str) -> Result<PartName, Error> {
    if name == "*" {
        return Ok(PartName::Any);
    }
    let qname = match name.strip_prefix('{') {
        Some(rest) => {
            let (namespace, local) = rest
                .split_once('}')
                .ok_or_else(|| Error::Config(format!("unterminated namespace in '{name}'")))?;
            QName::new(namespace, local, "")
        }
        None => QName::local(name),
    };
    if qname.local.is_empty() {
        return Err(Error::Config(format!("empty local name in '{name}'")));
    }
    Ok(PartName::Exact(qname))
}
