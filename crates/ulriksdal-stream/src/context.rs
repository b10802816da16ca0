#![forbid(unsafe_code)]

//! Per-message security context shared by the processors of one chain.

use crate::chain::ProcessorHandle;
use crate::matcher::Modifier;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use ulriksdal_core::{ns, Error, Result};
use ulriksdal_keys::{KeyMaterial, KeyResolver};
use ulriksdal_xml::StartElement;

/// Context property naming the SOAP actor / role of the security header.
pub const PROPERTY_ACTOR: &str = "security.actor";

/// The transform a part is subject to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformKind {
    Encrypt,
    Sign,
}

/// SOAP envelope version of the message being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoapVersion {
    Soap11,
    Soap12,
}

impl SoapVersion {
    /// Detect the version from the document element.
    pub fn of_envelope(root: &StartElement) -> Option<Self> {
        if root.name.local != ns::node::ENVELOPE {
            return None;
        }
        match root.name.namespace.as_str() {
            ns::SOAP11 => Some(Self::Soap11),
            ns::SOAP12 => Some(Self::Soap12),
            _ => None,
        }
    }

    pub fn namespace(self) -> &'static str {
        match self {
            Self::Soap11 => ns::SOAP11,
            Self::Soap12 => ns::SOAP12,
        }
    }

    /// Value meaning "true" for `mustUnderstand`.
    pub fn must_understand_true(self) -> &'static str {
        match self {
            Self::Soap11 => "1",
            Self::Soap12 => "true",
        }
    }

    /// Attribute naming the intended recipient of a header block.
    pub fn actor_attribute(self) -> &'static str {
        match self {
            Self::Soap11 => ns::attr::ACTOR,
            Self::Soap12 => ns::attr::ROLE,
        }
    }
}

/// Record of one planned transform target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartDefinition {
    pub kind: TransformKind,
    pub modifier: Modifier,
    /// Correlation id, unique within the message.
    pub id: String,
    /// Token the part is keyed with.
    pub key_id: String,
    /// Cipher URI for encryption, digest URI for signing.
    pub algorithm: String,
    /// `EncryptedData` id or the signed element's id, once known.
    pub reference_id: Option<String>,
    /// Digest of the canonical subtree (signing only).
    pub digest: Option<Vec<u8>>,
}

impl PartDefinition {
    pub fn new(
        kind: TransformKind,
        modifier: Modifier,
        id: impl Into<String>,
        key_id: impl Into<String>,
        algorithm: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            modifier,
            id: id.into(),
            key_id: key_id.into(),
            algorithm: algorithm.into(),
            reference_id: None,
            digest: None,
        }
    }
}

/// Subtree processors currently active, at most one per transform kind.
///
/// While a kind is active its entry processor must not match, so emitted
/// structure is never transformed a second time.
#[derive(Debug, Default)]
pub struct ActiveTransforms {
    encrypt: Option<ProcessorHandle>,
    sign: Option<ProcessorHandle>,
}

impl ActiveTransforms {
    fn slot(&mut self, kind: TransformKind) -> &mut Option<ProcessorHandle> {
        match kind {
            TransformKind::Encrypt => &mut self.encrypt,
            TransformKind::Sign => &mut self.sign,
        }
    }

    pub fn is_active(&self, kind: TransformKind) -> bool {
        match kind {
            TransformKind::Encrypt => self.encrypt.is_some(),
            TransformKind::Sign => self.sign.is_some(),
        }
    }

    pub fn activate(&mut self, kind: TransformKind, handle: ProcessorHandle) -> Result<()> {
        let slot = self.slot(kind);
        if let Some(active) = slot {
            return Err(Error::ChainProtocol(format!(
                "{kind:?} transform already active in {active:?}"
            )));
        }
        *slot = Some(handle);
        Ok(())
    }

    pub fn release(&mut self, kind: TransformKind, handle: ProcessorHandle) -> Result<()> {
        let slot = self.slot(kind);
        if *slot != Some(handle) {
            return Err(Error::ChainProtocol(format!(
                "{handle:?} does not hold the {kind:?} transform"
            )));
        }
        *slot = None;
        Ok(())
    }
}

/// State of one outbound message: recorded parts, resolved tokens and
/// named properties.
pub struct SecurityContext {
    parts: Vec<PartDefinition>,
    tokens: HashMap<String, Arc<dyn KeyMaterial>>,
    properties: BTreeMap<String, String>,
    /// Token used by the encryption parts, once one matched.
    pub encryption_token_id: Option<String>,
    /// Token used by the signature parts, once one matched.
    pub signature_token_id: Option<String>,
    soap_version: Option<SoapVersion>,
    active: ActiveTransforms,
    resolver: Arc<dyn KeyResolver>,
}

impl SecurityContext {
    pub fn new(resolver: Arc<dyn KeyResolver>) -> Self {
        Self {
            parts: Vec::new(),
            tokens: HashMap::new(),
            properties: BTreeMap::new(),
            encryption_token_id: None,
            signature_token_id: None,
            soap_version: None,
            active: ActiveTransforms::default(),
            resolver,
        }
    }

    // ── Parts ────────────────────────────────────────────────────────

    /// Append a part definition; ids must be unique.
    pub fn push_part(&mut self, part: PartDefinition) -> Result<()> {
        if self.parts.iter().any(|p| p.id == part.id) {
            return Err(Error::ChainProtocol(format!("duplicate part id {}", part.id)));
        }
        self.parts.push(part);
        Ok(())
    }

    /// All parts in match order.
    pub fn parts(&self) -> &[PartDefinition] {
        &self.parts
    }

    /// Parts of one transform kind, in match order.
    pub fn parts_of(&self, kind: TransformKind) -> impl Iterator<Item = &PartDefinition> {
        self.parts.iter().filter(move |p| p.kind == kind)
    }

    pub fn attach_reference(&mut self, part_id: &str, reference_id: &str) -> Result<()> {
        self.part_mut(part_id)?.reference_id = Some(reference_id.to_owned());
        Ok(())
    }

    pub fn attach_digest(&mut self, part_id: &str, digest: Vec<u8>) -> Result<()> {
        self.part_mut(part_id)?.digest = Some(digest);
        Ok(())
    }

    fn part_mut(&mut self, part_id: &str) -> Result<&mut PartDefinition> {
        self.parts
            .iter_mut()
            .find(|p| p.id == part_id)
            .ok_or_else(|| Error::ChainProtocol(format!("unknown part {part_id}")))
    }

    // ── Tokens ───────────────────────────────────────────────────────

    /// Key material for a token id, resolved once per message.
    pub fn resolve_token(&mut self, token_id: &str) -> Result<Arc<dyn KeyMaterial>> {
        if let Some(material) = self.tokens.get(token_id) {
            return Ok(material.clone());
        }
        let material = self.resolver.resolve(token_id)?;
        self.tokens.insert(token_id.to_owned(), material.clone());
        Ok(material)
    }

    // ── Properties ───────────────────────────────────────────────────

    pub fn set_property(&mut self, name: &str, value: impl Into<String>) {
        self.properties.insert(name.to_owned(), value.into());
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    pub fn soap_version(&self) -> Option<SoapVersion> {
        self.soap_version
    }

    pub fn set_soap_version(&mut self, version: Option<SoapVersion>) {
        self.soap_version = version;
    }

    pub fn active_transforms(&self) -> &ActiveTransforms {
        &self.active
    }

    pub fn active_transforms_mut(&mut self) -> &mut ActiveTransforms {
        &mut self.active
    }
}

impl std::fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityContext")
            .field("parts", &self.parts)
            .field("tokens", &self.tokens.keys().collect::<Vec<_>>())
            .field("properties", &self.properties)
            .field("soap_version", &self.soap_version)
            .field("active", &self.active)
            .finish()
    }
}
