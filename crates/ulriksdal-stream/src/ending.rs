#![forbid(unsafe_code)]

//! Processors at the tail of the chain that add structure to the
//! `wsse:Security` header once the whole message has been seen.
//!
//! Each ending processor holds back the message from the point where the
//! security header content belongs:
//!
//! 1. the end tag of an existing `wsse:Security` header block,
//! 2. else the end tag of `soap:Header`,
//! 3. else the start tag of `soap:Body` (a header is created).
//!
//! At `EndDocument` it emits its structure there and replays the rest.

use crate::chain::{ChainCursor, Processor};
use crate::context::{PartDefinition, SecurityContext, SoapVersion, TransformKind, PROPERTY_ACTOR};
use crate::fragment::FragmentBuilder;
use crate::id::IdGenerator;
use crate::properties::SignatureProperties;
use crate::provider::CryptoProvider;
use base64::Engine;
use std::sync::Arc;
use tracing::{debug, warn};
use ulriksdal_core::{algorithm, ns, Error, Result};
use ulriksdal_xml::{QName, XmlEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
enum InsertionPoint {
    /// Inside the existing security header at this path.
    SecurityEnd(Vec<QName>),
    /// Before the end of the header at this path.
    HeaderEnd(Vec<QName>),
    /// Before the body of the envelope at this path.
    BodyStart(Vec<QName>),
}

/// Tracks the security header insertion point and holds back events from it.
#[derive(Debug, Default)]
pub(crate) struct HeaderInsertion {
    open: Vec<QName>,
    envelope: Option<QName>,
    point: Option<InsertionPoint>,
    held: Vec<XmlEvent>,
}

impl HeaderInsertion {
    /// Observe a non-final event; returns it when it may pass downstream.
    pub fn observe(&mut self, event: XmlEvent) -> Option<XmlEvent> {
        if self.point.is_some() {
            self.held.push(event);
            return None;
        }
        let point = match &event {
            XmlEvent::StartElement(start) => {
                if self.open.is_empty() && SoapVersion::of_envelope(start).is_some() {
                    self.envelope = Some(start.name.clone());
                }
                self.open.push(start.name.clone());
                match &self.envelope {
                    Some(env)
                        if self.open.len() == 2 && start.name.is(&env.namespace, ns::node::BODY) =>
                    {
                        Some(InsertionPoint::BodyStart(start.parent_path().to_vec()))
                    }
                    _ => None,
                }
            }
            XmlEvent::EndElement(_) => {
                let point = self.closing_point();
                self.open.pop();
                point
            }
            _ => None,
        };
        match point {
            Some(point) => {
                self.point = Some(point);
                self.held.push(event);
                None
            }
            None => Some(event),
        }
    }

    fn closing_point(&self) -> Option<InsertionPoint> {
        let env = self.envelope.as_ref()?;
        if self.open.len() < 2 || !self.open[1].is(&env.namespace, ns::node::HEADER) {
            return None;
        }
        match self.open.len() {
            2 => Some(InsertionPoint::HeaderEnd(self.open.clone())),
            3 if self.open[2].is(ns::WSSE, ns::node::SECURITY) => {
                Some(InsertionPoint::SecurityEnd(self.open.clone()))
            }
            _ => None,
        }
    }

    /// Path of the `wsse:Security` element that receives content.
    pub fn security_path(&self) -> Option<Vec<QName>> {
        let env = self.envelope.as_ref()?;
        let security = QName::new(ns::WSSE, ns::node::SECURITY, ns::prefix::WSSE);
        match self.point.as_ref()? {
            InsertionPoint::SecurityEnd(path) => Some(path.clone()),
            InsertionPoint::HeaderEnd(path) => Some([path.as_slice(), &[security]].concat()),
            InsertionPoint::BodyStart(path) => {
                let header = QName::new(&env.namespace, ns::node::HEADER, &env.prefix);
                Some([path.as_slice(), &[header, security]].concat())
            }
        }
    }

    /// Like [`HeaderInsertion::release`], but with no content the held
    /// events come back unchanged and no header is created.
    pub fn release_or_replay(
        &mut self,
        content: Vec<XmlEvent>,
        context: &SecurityContext,
    ) -> Vec<XmlEvent> {
        if content.is_empty() {
            self.point = None;
            return std::mem::take(&mut self.held);
        }
        self.release(content, context)
    }

    /// Wrap security header content in whatever parents are missing,
    /// followed by the held-back events.
    pub fn release(&mut self, content: Vec<XmlEvent>, context: &SecurityContext) -> Vec<XmlEvent> {
        let held = std::mem::take(&mut self.held);
        let (Some(point), Some(env)) = (self.point.take(), self.envelope.as_ref()) else {
            return held;
        };
        let parent = match &point {
            InsertionPoint::SecurityEnd(_) => {
                return content.into_iter().chain(held).collect();
            }
            InsertionPoint::HeaderEnd(path) | InsertionPoint::BodyStart(path) => path,
        };

        let mut header = FragmentBuilder::new(parent);
        if matches!(point, InsertionPoint::BodyStart(_)) {
            let soap_header = header.element(&env.namespace, ns::node::HEADER, &env.prefix);
            header.start(soap_header);
        }

        let version = context.soap_version().unwrap_or(SoapVersion::Soap11);
        let mut security = header
            .element(ns::WSSE, ns::node::SECURITY, ns::prefix::WSSE)
            .declaring_own_namespace()
            .with_attribute(
                soap_attribute(env, ns::attr::MUST_UNDERSTAND),
                version.must_understand_true(),
            );
        if let Some(actor) = context.property(PROPERTY_ACTOR) {
            let name = soap_attribute(env, version.actor_attribute());
            security = security.with_attribute(name, actor);
        }
        header.start(security);
        debug!("creating wsse:Security header");

        let (mut events, closing) = header.into_parts();
        events.extend(content);
        events.extend(closing);
        events.extend(held);
        events
    }
}

/// An attribute in the envelope namespace; unprefixed attributes are in no
/// namespace, so a default-namespace envelope gets the `soap` prefix.
fn soap_attribute(envelope: &QName, local: &str) -> QName {
    let prefix = if envelope.prefix.is_empty() {
        ns::prefix::SOAP
    } else {
        envelope.prefix.as_str()
    };
    QName::new(&envelope.namespace, local, prefix)
}

// ── Encryption ───────────────────────────────────────────────────────

/// Adds `xenc:ReferenceList` listing every `EncryptedData` of the message.
#[derive(Debug, Default)]
pub struct EncryptEndingProcessor {
    insertion: HeaderInsertion,
}

impl EncryptEndingProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    fn reference_list(&self, parts: &[&PartDefinition], parent: &[QName]) -> Vec<XmlEvent> {
        let mut list = FragmentBuilder::new(parent);
        let start = list
            .element(ns::ENC, ns::node::REFERENCE_LIST, ns::prefix::ENC)
            .declaring_own_namespace();
        list.start(start);
        for part in parts {
            let Some(id) = &part.reference_id else { continue };
            let data_ref = list
                .element(ns::ENC, ns::node::DATA_REFERENCE, ns::prefix::ENC)
                .with_attribute(QName::local(ns::attr::URI), format!("#{id}"));
            list.empty(data_ref);
        }
        list.finish()
    }
}

impl Processor for EncryptEndingProcessor {
    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainCursor<'_>) -> Result<()> {
        if !event.is_end_document() {
            if let Some(event) = self.insertion.observe(event) {
                chain.forward(event)?;
            }
            return Ok(());
        }

        let parts: Vec<&PartDefinition> =
            chain.context().parts_of(TransformKind::Encrypt).collect();
        let content = match self.insertion.security_path() {
            Some(parent) if !parts.is_empty() => {
                debug!(references = parts.len(), "adding xenc:ReferenceList");
                self.reference_list(&parts, &parent)
            }
            None if !parts.is_empty() => {
                warn!("message has no SOAP header position, xenc:ReferenceList omitted");
                Vec::new()
            }
            _ => Vec::new(),
        };
        for event in self.insertion.release_or_replay(content, chain.context()) {
            chain.forward(event)?;
        }
        chain.forward(XmlEvent::EndDocument)
    }

    fn name(&self) -> &'static str {
        "encrypt-ending"
    }
}

// ── Signature ────────────────────────────────────────────────────────

/// Adds `ds:Signature` over every signed part of the message.
pub struct SignatureEndingProcessor {
    insertion: HeaderInsertion,
    config: Arc<SignatureProperties>,
    crypto: Arc<dyn CryptoProvider>,
    ids: Arc<dyn IdGenerator>,
}

impl SignatureEndingProcessor {
    pub fn new(
        config: Arc<SignatureProperties>,
        crypto: Arc<dyn CryptoProvider>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            insertion: HeaderInsertion::default(),
            config,
            crypto,
            ids,
        }
    }

    fn signature(
        &self,
        parts: &[PartDefinition],
        parent: &[QName],
        token_id: &str,
        key: &[u8],
    ) -> Result<Vec<XmlEvent>> {
        let engine = base64::engine::general_purpose::STANDARD;
        let mut sig = FragmentBuilder::new(parent);
        let signature = sig
            .element(ns::DSIG, ns::node::SIGNATURE, ns::prefix::DSIG)
            .declaring_own_namespace()
            .with_attribute(QName::local(ns::attr::ID), self.ids.generate_id("SIG-"));
        sig.start(signature);

        let signed_info_at = sig.position();
        let signed_info = sig.element(ns::DSIG, ns::node::SIGNED_INFO, ns::prefix::DSIG);
        sig.start(signed_info);
        let c14n_method = sig
            .element(ns::DSIG, ns::node::CANONICALIZATION_METHOD, ns::prefix::DSIG)
            .with_attribute(QName::local(ns::attr::ALGORITHM), algorithm::EXC_C14N);
        sig.empty(c14n_method);
        let signature_method = sig
            .element(ns::DSIG, ns::node::SIGNATURE_METHOD, ns::prefix::DSIG)
            .with_attribute(QName::local(ns::attr::ALGORITHM), self.config.algorithm.as_str());
        sig.empty(signature_method);

        for part in parts {
            let (Some(id), Some(digest)) = (&part.reference_id, &part.digest) else {
                return Err(Error::TransformFailure(format!(
                    "signed part {} was not completed",
                    part.id
                )));
            };
            let reference = sig
                .element(ns::DSIG, ns::node::REFERENCE, ns::prefix::DSIG)
                .with_attribute(QName::local(ns::attr::URI), format!("#{id}"));
            sig.start(reference);
            let transforms = sig.element(ns::DSIG, ns::node::TRANSFORMS, ns::prefix::DSIG);
            sig.start(transforms);
            let transform = sig
                .element(ns::DSIG, ns::node::TRANSFORM, ns::prefix::DSIG)
                .with_attribute(QName::local(ns::attr::ALGORITHM), algorithm::EXC_C14N);
            sig.empty(transform);
            sig.end();
            let digest_method = sig
                .element(ns::DSIG, ns::node::DIGEST_METHOD, ns::prefix::DSIG)
                .with_attribute(QName::local(ns::attr::ALGORITHM), part.algorithm.as_str());
            sig.empty(digest_method);
            let digest_value = sig.element(ns::DSIG, ns::node::DIGEST_VALUE, ns::prefix::DSIG);
            sig.text_element(digest_value, engine.encode(digest));
            sig.end();
        }
        sig.end();

        let canonical = ulriksdal_c14n::canonicalize(&sig.events()[signed_info_at..])?;
        let value = self
            .crypto
            .sign(&self.config.algorithm, key, &canonical)
            .map_err(|e| Error::TransformFailure(format!("signing SignedInfo: {e}")))?;
        let signature_value = sig.element(ns::DSIG, ns::node::SIGNATURE_VALUE, ns::prefix::DSIG);
        sig.text_element(signature_value, engine.encode(value));

        let key_info = sig.element(ns::DSIG, ns::node::KEY_INFO, ns::prefix::DSIG);
        sig.start(key_info);
        let str_ref = sig
            .element(ns::WSSE, ns::node::SECURITY_TOKEN_REFERENCE, ns::prefix::WSSE)
            .declaring_own_namespace();
        sig.start(str_ref);
        let token_ref = sig
            .element(ns::WSSE, ns::node::REFERENCE, ns::prefix::WSSE)
            .with_attribute(QName::local(ns::attr::URI), format!("#{token_id}"));
        sig.empty(token_ref);
        Ok(sig.finish())
    }
}

impl Processor for SignatureEndingProcessor {
    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainCursor<'_>) -> Result<()> {
        if !event.is_end_document() {
            if let Some(event) = self.insertion.observe(event) {
                chain.forward(event)?;
            }
            return Ok(());
        }

        let parts: Vec<PartDefinition> =
            chain.context().parts_of(TransformKind::Sign).cloned().collect();
        let mut content = Vec::new();
        if !parts.is_empty() {
            let parent = self.insertion.security_path().ok_or_else(|| {
                Error::MalformedInput("signed message is not a SOAP envelope with a body".into())
            })?;
            let token_id = chain.context().signature_token_id.clone().ok_or_else(|| {
                Error::ChainProtocol("signed parts recorded without a signature token".into())
            })?;
            let key = chain
                .context_mut()
                .resolve_token(&token_id)?
                .secret_key(&self.config.algorithm)?;
            debug!(references = parts.len(), "adding ds:Signature");
            content = self.signature(&parts, &parent, &token_id, &key)?;
        }
        for event in self.insertion.release_or_replay(content, chain.context()) {
            chain.forward(event)?;
        }
        chain.forward(XmlEvent::EndDocument)
    }

    fn name(&self) -> &'static str {
        "signature-ending"
    }
}
