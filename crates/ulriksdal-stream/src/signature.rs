#![forbid(unsafe_code)]

//! Streaming XML signature of matched parts.
//!
//! Signed elements pass through unchanged apart from a `wsu:Id` added when
//! they carry no id. While a signed subtree streams by, its exclusive
//! canonical form is digested incrementally; the `ds:Signature` itself is
//! written by [`crate::ending::SignatureEndingProcessor`].

use crate::chain::{ChainCursor, Processor};
use crate::context::{PartDefinition, TransformKind};
use crate::id::IdGenerator;
use crate::matcher::{element_id, secure_part_matches, SecurePart};
use crate::properties::SignatureProperties;
use crate::provider::CryptoProvider;
use std::sync::Arc;
use tracing::debug;
use ulriksdal_c14n::ExclusiveCanonicalizer;
use ulriksdal_core::{ns, Error, Result};
use ulriksdal_xml::{QName, StartElement, XmlEvent};

/// Matches signature rules and spawns a digesting subtree processor per match.
pub struct SignatureEntryProcessor {
    config: Arc<SignatureProperties>,
    crypto: Arc<dyn CryptoProvider>,
    ids: Arc<dyn IdGenerator>,
}

impl SignatureEntryProcessor {
    pub fn new(
        config: Arc<SignatureProperties>,
        crypto: Arc<dyn CryptoProvider>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self { config, crypto, ids }
    }

    /// Record the part and return the start element as it must be emitted.
    fn spawn(
        &self,
        mut start: StartElement,
        rule: &SecurePart,
        chain: &mut ChainCursor<'_>,
    ) -> Result<StartElement> {
        let token_id = self
            .config
            .token_id
            .as_deref()
            .ok_or_else(|| Error::Config("signature has no token_id".into()))?;
        let material = chain.context_mut().resolve_token(token_id)?;
        // Fail before anything is recorded if the key cannot sign.
        material.secret_key(&self.config.algorithm)?;

        let id = match element_id(&start) {
            Some(id) => id.to_owned(),
            None => {
                let id = self.ids.generate_id("id-");
                start = start
                    .with_namespace(ns::prefix::WSU, ns::WSU)
                    .with_attribute(
                        QName::new(ns::WSU, ns::attr::ID, ns::prefix::WSU),
                        id.as_str(),
                    );
                id
            }
        };

        let mut part = PartDefinition::new(
            TransformKind::Sign,
            rule.modifier,
            self.ids.generate_id("SP-"),
            material.id(),
            self.config.digest_algorithm.as_str(),
        );
        part.reference_id = Some(id.clone());
        let part_id = part.id.clone();

        let context = chain.context_mut();
        context.push_part(part)?;
        context.signature_token_id = Some(material.id().to_owned());

        let subtree = SignatureSubtreeProcessor {
            part_id: part_id.clone(),
            digest_algorithm: self.config.digest_algorithm.clone(),
            canonicalizer: ExclusiveCanonicalizer::new(),
            crypto: self.crypto.clone(),
        };
        let handle = chain.insert_after_self(Box::new(subtree))?;
        chain
            .context_mut()
            .active_transforms_mut()
            .activate(TransformKind::Sign, handle)?;
        debug!(element = %start.name, part = %part_id, reference = %id, "signing part");
        Ok(start)
    }
}

impl Processor for SignatureEntryProcessor {
    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainCursor<'_>) -> Result<()> {
        let XmlEvent::StartElement(start) = event else {
            return chain.forward(event);
        };
        let guard = chain
            .context()
            .active_transforms()
            .is_active(TransformKind::Sign);
        let rule = secure_part_matches(&start, &self.config.parts, guard).cloned();
        let start = match rule {
            Some(rule) => self.spawn(start, &rule, chain)?,
            None => start,
        };
        chain.forward(XmlEvent::StartElement(start))
    }

    fn name(&self) -> &'static str {
        "signature-entry"
    }
}

/// Forwards one signed subtree unchanged while digesting its canonical form.
pub struct SignatureSubtreeProcessor {
    part_id: String,
    digest_algorithm: String,
    canonicalizer: ExclusiveCanonicalizer,
    crypto: Arc<dyn CryptoProvider>,
}

impl SignatureSubtreeProcessor {
    fn finalize(&mut self, chain: &mut ChainCursor<'_>) -> Result<()> {
        let canonical = std::mem::take(&mut self.canonicalizer).finish()?;
        let digest = self
            .crypto
            .digest(&self.digest_algorithm, &canonical)
            .map_err(|e| Error::TransformFailure(format!("digesting part {}: {e}", self.part_id)))?;
        debug!(part = %self.part_id, canonical_len = canonical.len(), "part digested");

        let handle = chain.handle();
        chain.context_mut().attach_digest(&self.part_id, digest)?;
        chain.remove_self()?;
        chain
            .context_mut()
            .active_transforms_mut()
            .release(TransformKind::Sign, handle)
    }
}

impl Processor for SignatureSubtreeProcessor {
    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainCursor<'_>) -> Result<()> {
        if event.is_end_document() {
            return Err(Error::MalformedInput(format!(
                "document ended inside signed part {}",
                self.part_id
            )));
        }
        self.canonicalizer.process(&event)?;
        if matches!(event, XmlEvent::EndElement(_)) && !self.canonicalizer.is_open() {
            self.finalize(chain)?;
        }
        chain.forward(event)
    }

    fn name(&self) -> &'static str {
        "signature-subtree"
    }
}
