#![forbid(unsafe_code)]

//! Outbound security facade.
//!
//! [`OutboundSecurity`] holds the shared, read-only configuration and builds
//! one [`OutboundMessage`] (a processor chain with its own security
//! context) per message.
//!
//! ```
//! use std::sync::Arc;
//! use ulriksdal_stream::{OutboundSecurity, SecurityProperties};
//!
//! let props = SecurityProperties::from_yaml(r#"
//! actions: [encrypt]
//! encryption:
//!   token_id: enc
//!   parts:
//!     - name: "{urn:example:pay}amount"
//! keys:
//!   - name: enc
//!     kind: aes
//!     hex: "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f"
//! "#)?;
//! let keys = props.key_store()?;
//! let security = OutboundSecurity::new(props, Arc::new(keys))?;
//! let secured = security.secure_document("<order><total>5</total></order>")?;
//! assert!(secured.ends_with("<order><total>5</total></order>"));
//! # Ok::<(), ulriksdal_core::Error>(())
//! ```

use crate::chain::{Processor, ProcessorChain};
use crate::context::{SecurityContext, PROPERTY_ACTOR};
use crate::encrypt::EncryptEntryProcessor;
use crate::ending::{EncryptEndingProcessor, SignatureEndingProcessor};
use crate::id::{IdGenerator, RandomIdGenerator};
use crate::properties::{Action, EncryptionProperties, SecurityProperties, SignatureProperties};
use crate::provider::{CryptoProvider, DefaultCryptoProvider};
use crate::signature::SignatureEntryProcessor;
use std::sync::Arc;
use tracing::debug;
use ulriksdal_core::{Error, Result};
use ulriksdal_keys::KeyResolver;
use ulriksdal_xml::{EventReader, EventSink, EventWriter, XmlEvent};

/// Shared outbound configuration; cheap to share across threads.
pub struct OutboundSecurity {
    actions: Vec<Action>,
    actor: Option<String>,
    encryption: Arc<EncryptionProperties>,
    signature: Arc<SignatureProperties>,
    resolver: Arc<dyn KeyResolver>,
    crypto: Arc<dyn CryptoProvider>,
    ids: Arc<dyn IdGenerator>,
}

impl OutboundSecurity {
    /// Validate `properties` and keep them for building messages.
    pub fn new(properties: SecurityProperties, resolver: Arc<dyn KeyResolver>) -> Result<Self> {
        properties.validate()?;
        let SecurityProperties {
            actions,
            actor,
            encryption,
            signature,
            ..
        } = properties;
        Ok(Self {
            actions,
            actor,
            encryption: Arc::new(encryption),
            signature: Arc::new(signature),
            resolver,
            crypto: Arc::new(DefaultCryptoProvider),
            ids: Arc::new(RandomIdGenerator),
        })
    }

    pub fn with_crypto_provider(mut self, crypto: Arc<dyn CryptoProvider>) -> Self {
        self.crypto = crypto;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Start a new message.
    ///
    /// Entry processors follow the configured action order; ending
    /// processors run in reverse so the first action's header structure
    /// ends up closest to the end of the security header.
    pub fn process_message(&self) -> OutboundMessage {
        let mut context = SecurityContext::new(self.resolver.clone());
        if let Some(actor) = &self.actor {
            context.set_property(PROPERTY_ACTOR, actor.as_str());
        }
        let mut chain = ProcessorChain::new(context);
        for action in &self.actions {
            chain.push(self.entry_processor(*action));
        }
        for action in self.actions.iter().rev() {
            chain.push(self.ending_processor(*action));
        }
        debug!(processors = ?chain.names(), "outbound message started");
        OutboundMessage {
            chain,
            poisoned: false,
            finished: false,
        }
    }

    fn entry_processor(&self, action: Action) -> Box<dyn Processor> {
        match action {
            Action::Encrypt => Box::new(EncryptEntryProcessor::new(
                self.encryption.clone(),
                self.crypto.clone(),
                self.ids.clone(),
            )),
            Action::Signature => Box::new(SignatureEntryProcessor::new(
                self.signature.clone(),
                self.crypto.clone(),
                self.ids.clone(),
            )),
        }
    }

    fn ending_processor(&self, action: Action) -> Box<dyn Processor> {
        match action {
            Action::Encrypt => Box::new(EncryptEndingProcessor::new()),
            Action::Signature => Box::new(SignatureEndingProcessor::new(
                self.signature.clone(),
                self.crypto.clone(),
                self.ids.clone(),
            )),
        }
    }

    /// Secure a complete event sequence ending with `EndDocument`.
    pub fn secure_events(&self, events: Vec<XmlEvent>) -> Result<Vec<XmlEvent>> {
        let mut message = self.process_message();
        let mut out = Vec::with_capacity(events.len());
        for event in events {
            message.process_event(event, &mut out)?;
        }
        message.ensure_finished()?;
        Ok(out)
    }

    /// Parse, secure and serialize an XML document.
    pub fn secure_document(&self, xml: &str) -> Result<String> {
        let mut message = self.process_message();
        let mut writer = EventWriter::new();
        writer.write_declaration()?;
        for event in EventReader::new(xml) {
            message.process_event(event?, &mut writer)?;
        }
        message.ensure_finished()?;
        writer.into_string()
    }
}

impl std::fmt::Debug for OutboundSecurity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundSecurity")
            .field("actions", &self.actions)
            .field("actor", &self.actor)
            .field("encryption", &self.encryption)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// One message in flight.
pub struct OutboundMessage {
    chain: ProcessorChain,
    poisoned: bool,
    finished: bool,
}

impl OutboundMessage {
    /// Push one event through the chain. After an error the message
    /// refuses further events.
    pub fn process_event(&mut self, event: XmlEvent, sink: &mut dyn EventSink) -> Result<()> {
        if self.poisoned {
            return Err(Error::ChainProtocol("message already failed".into()));
        }
        let end = event.is_end_document();
        match self.chain.process_event(event, sink) {
            Ok(()) => {
                if end {
                    self.finished = true;
                    debug!(parts = self.chain.context().parts().len(), "outbound message finished");
                }
                Ok(())
            }
            Err(e) => {
                self.poisoned = true;
                Err(e)
            }
        }
    }

    /// True once `EndDocument` went through without error.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn context(&self) -> &SecurityContext {
        self.chain.context()
    }

    fn ensure_finished(&self) -> Result<()> {
        if self.finished {
            Ok(())
        } else {
            Err(Error::MalformedInput("event stream ended without EndDocument".into()))
        }
    }
}
