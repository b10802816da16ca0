#![forbid(unsafe_code)]

//! Streaming XML encryption of matched parts.
//!
//! The [`EncryptEntryProcessor`] stays in the chain for the whole message and
//! watches start elements. For each match it records a part definition and
//! inserts an [`EncryptSubtreeProcessor`] directly after itself, which takes
//! over the matched subtree: the plaintext is serialized into a private
//! buffer and, once the subtree ends, replaced by
//!
//! ```xml
//! <xenc:EncryptedData Id="ED-..." Type="...#Element">
//!   <xenc:EncryptionMethod Algorithm="..."/>
//!   <ds:KeyInfo>
//!     <wsse:SecurityTokenReference><wsse:Reference URI="#token"/></wsse:SecurityTokenReference>
//!   </ds:KeyInfo>
//!   <xenc:CipherData><xenc:CipherValue>...</xenc:CipherValue></xenc:CipherData>
//! </xenc:EncryptedData>
//! ```
//!
//! Blocks directly below the SOAP header are additionally wrapped in
//! `wsse11:EncryptedHeader`. With the content modifier the wrapper sits
//! inside the kept header block tags.

use crate::chain::{ChainCursor, Processor, ProcessorHandle};
use crate::context::{PartDefinition, TransformKind};
use crate::fragment::FragmentBuilder;
use crate::id::IdGenerator;
use crate::matcher::{
    is_header_block, is_soap_body, secure_part_matches, Modifier, PartScope, SecurePart,
};
use crate::properties::EncryptionProperties;
use crate::provider::CryptoProvider;
use base64::Engine;
use std::sync::Arc;
use tracing::debug;
use ulriksdal_core::{ns, Error, Result};
use ulriksdal_xml::{EventWriter, QName, StartElement, XmlEvent};

// ── Entry processor ──────────────────────────────────────────────────

/// Matches encryption rules and spawns a subtree processor per match.
pub struct EncryptEntryProcessor {
    config: Arc<EncryptionProperties>,
    crypto: Arc<dyn CryptoProvider>,
    ids: Arc<dyn IdGenerator>,
}

impl EncryptEntryProcessor {
    pub fn new(
        config: Arc<EncryptionProperties>,
        crypto: Arc<dyn CryptoProvider>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self { config, crypto, ids }
    }

    fn spawn(
        &self,
        start: &StartElement,
        rule: &SecurePart,
        chain: &mut ChainCursor<'_>,
    ) -> Result<ProcessorHandle> {
        let token_id = self
            .config
            .token_id
            .as_deref()
            .ok_or_else(|| Error::Config("encryption has no token_id".into()))?;
        let algorithm = self.config.algorithm.as_str();

        // Both may fail; nothing is recorded before they succeed.
        let material = chain.context_mut().resolve_token(token_id)?;
        let key = material.secret_key(algorithm)?;

        let part = PartDefinition::new(
            TransformKind::Encrypt,
            rule.modifier,
            self.ids.generate_id("EP-"),
            material.id(),
            algorithm,
        );
        let header_block = is_header_block(start);
        let subtree = EncryptSubtreeProcessor::new(
            start,
            &part,
            key,
            header_block,
            self.crypto.clone(),
            self.ids.as_ref(),
        );
        let encrypted_data_id = subtree.encrypted_data_id.clone();
        let part_id = part.id.clone();

        let context = chain.context_mut();
        context.push_part(part)?;
        context.attach_reference(&part_id, &encrypted_data_id)?;
        context.encryption_token_id = Some(material.id().to_owned());

        let handle = chain.insert_after_self(Box::new(subtree))?;
        chain
            .context_mut()
            .active_transforms_mut()
            .activate(TransformKind::Encrypt, handle)?;
        debug!(
            element = %start.name,
            part = %part_id,
            encrypted_data = %encrypted_data_id,
            header_block,
            "encrypting part"
        );
        Ok(handle)
    }

    /// True when nothing can match once the SOAP body that just matched
    /// has been consumed: every other rule is confined to the header, which
    /// precedes the body, or to the body, which the subtree now owns.
    fn done_after_body(&self, matched: &SecurePart) -> bool {
        let mut matched_seen = false;
        self.config.parts.iter().all(|part| {
            if !matched_seen && part == matched {
                matched_seen = true;
                return true;
            }
            matches!(part.scope, PartScope::Header | PartScope::Body)
        })
    }
}

impl Processor for EncryptEntryProcessor {
    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainCursor<'_>) -> Result<()> {
        if let XmlEvent::StartElement(start) = &event {
            let guard = chain
                .context()
                .active_transforms()
                .is_active(TransformKind::Encrypt);
            if let Some(rule) = secure_part_matches(start, &self.config.parts, guard) {
                self.spawn(start, rule, chain)?;
                if is_soap_body(start) && self.done_after_body(rule) {
                    debug!("whole SOAP body encrypted, removing encryption entry processor");
                    chain.remove_self()?;
                }
            }
        }
        chain.forward(event)
    }

    fn name(&self) -> &'static str {
        "encrypt-entry"
    }
}

// ── Subtree processor ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Buffering,
    Finalizing,
    Done,
}

/// Buffers one matched subtree and replaces it by its encrypted form.
pub struct EncryptSubtreeProcessor {
    state: State,
    part_id: String,
    modifier: Modifier,
    algorithm: String,
    key: Vec<u8>,
    encrypted_data_id: String,
    /// Envelope start tags, held back until the ciphertext exists.
    prologue: Vec<XmlEvent>,
    /// End tags closing the envelope.
    epilogue: Vec<XmlEvent>,
    plaintext: EventWriter,
    /// Open elements of the subtree, the matched element included.
    depth: usize,
    crypto: Arc<dyn CryptoProvider>,
}

impl EncryptSubtreeProcessor {
    fn new(
        start: &StartElement,
        part: &PartDefinition,
        key: Vec<u8>,
        header_block: bool,
        crypto: Arc<dyn CryptoProvider>,
        ids: &dyn IdGenerator,
    ) -> Self {
        let encrypted_data_id = ids.generate_id("ED-");
        let parent = match part.modifier {
            Modifier::Element => start.parent_path(),
            Modifier::Content => start.path.as_slice(),
        };
        let mut envelope = FragmentBuilder::new(parent);

        if header_block {
            let mut wrapper = envelope
                .element(ns::WSSE11, ns::node::ENCRYPTED_HEADER, ns::prefix::WSSE11)
                .declaring_own_namespace()
                .with_namespace(ns::prefix::WSU, ns::WSU)
                .with_attribute(
                    QName::new(ns::WSU, ns::attr::ID, ns::prefix::WSU),
                    ids.generate_id("EH-"),
                );
            // mustUnderstand, actor, role and relay stay visible on the wrapper.
            for attr in &start.attributes {
                if ns::is_soap(&attr.name.namespace) {
                    wrapper.attributes.push(attr.clone());
                }
            }
            envelope.start(wrapper);
        }

        let type_uri = match part.modifier {
            Modifier::Element => ns::ENC_TYPE_ELEMENT,
            Modifier::Content => ns::ENC_TYPE_CONTENT,
        };
        let encrypted_data = envelope
            .element(ns::ENC, ns::node::ENCRYPTED_DATA, ns::prefix::ENC)
            .declaring_own_namespace()
            .with_attribute(QName::local(ns::attr::ID), encrypted_data_id.as_str())
            .with_attribute(QName::local(ns::attr::TYPE), type_uri);
        envelope.start(encrypted_data);

        let method = envelope
            .element(ns::ENC, ns::node::ENCRYPTION_METHOD, ns::prefix::ENC)
            .with_attribute(QName::local(ns::attr::ALGORITHM), part.algorithm.as_str());
        envelope.empty(method);

        let key_info = envelope
            .element(ns::DSIG, ns::node::KEY_INFO, ns::prefix::DSIG)
            .declaring_own_namespace();
        envelope.start(key_info);
        let str_ref = envelope
            .element(ns::WSSE, ns::node::SECURITY_TOKEN_REFERENCE, ns::prefix::WSSE)
            .declaring_own_namespace();
        envelope.start(str_ref);
        let reference = envelope
            .element(ns::WSSE, ns::node::REFERENCE, ns::prefix::WSSE)
            .with_attribute(QName::local(ns::attr::URI), format!("#{}", part.key_id));
        envelope.empty(reference);
        envelope.end().end();

        let cipher_data = envelope.element(ns::ENC, ns::node::CIPHER_DATA, ns::prefix::ENC);
        envelope.start(cipher_data);
        let cipher_value = envelope.element(ns::ENC, ns::node::CIPHER_VALUE, ns::prefix::ENC);
        envelope.start(cipher_value);

        let (prologue, epilogue) = envelope.into_parts();
        Self {
            state: State::Buffering,
            part_id: part.id.clone(),
            modifier: part.modifier,
            algorithm: part.algorithm.clone(),
            key,
            encrypted_data_id,
            prologue,
            epilogue,
            plaintext: EventWriter::new(),
            depth: 0,
            crypto,
        }
    }

    fn finalize(&mut self, chain: &mut ChainCursor<'_>) -> Result<()> {
        self.state = State::Finalizing;
        let plaintext = std::mem::take(&mut self.plaintext).into_bytes();
        let ciphertext = self
            .crypto
            .encrypt(&plaintext, &self.key, &self.algorithm)
            .map_err(|e| {
                Error::TransformFailure(format!("encrypting part {}: {e}", self.part_id))
            })?;
        debug!(
            part = %self.part_id,
            plaintext_len = plaintext.len(),
            ciphertext_len = ciphertext.len(),
            "part encrypted"
        );

        for event in std::mem::take(&mut self.prologue) {
            chain.forward(event)?;
        }
        let encoded = base64::engine::general_purpose::STANDARD.encode(&ciphertext);
        chain.forward(XmlEvent::Characters(encoded))?;
        for event in std::mem::take(&mut self.epilogue) {
            chain.forward(event)?;
        }
        Ok(())
    }

    fn done(&mut self, chain: &mut ChainCursor<'_>) -> Result<()> {
        self.state = State::Done;
        self.key.clear();
        let handle = chain.handle();
        chain.remove_self()?;
        chain
            .context_mut()
            .active_transforms_mut()
            .release(TransformKind::Encrypt, handle)
    }
}

impl Processor for EncryptSubtreeProcessor {
    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainCursor<'_>) -> Result<()> {
        if self.state != State::Buffering {
            return chain.forward(event);
        }
        match event {
            XmlEvent::StartElement(_) => {
                self.depth += 1;
                if self.depth == 1 && self.modifier == Modifier::Content {
                    return chain.forward(event);
                }
                self.plaintext.write(&event)
            }
            XmlEvent::Characters(_) => self.plaintext.write(&event),
            XmlEvent::EndElement(_) => {
                self.depth = self.depth.checked_sub(1).ok_or_else(|| {
                    Error::ChainProtocol(format!("part {} ended before it started", self.part_id))
                })?;
                if self.depth > 0 {
                    return self.plaintext.write(&event);
                }
                if self.modifier == Modifier::Element {
                    self.plaintext.write(&event)?;
                }
                self.finalize(chain)?;
                if self.modifier == Modifier::Content {
                    chain.forward(event)?;
                }
                self.done(chain)
            }
            XmlEvent::EndDocument => Err(Error::MalformedInput(format!(
                "document ended inside encrypted part {}",
                self.part_id
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "encrypt-subtree"
    }
}
