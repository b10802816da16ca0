#![forbid(unsafe_code)]

//! Streaming outbound WS-Security for the Ulriksdal library.
//!
//! Parse events of a SOAP message flow through a [`ProcessorChain`]. Entry
//! processors match configured [`SecurePart`]s and spawn subtree processors
//! that encrypt or digest the matched element while it streams by; ending
//! processors add `xenc:ReferenceList` and `ds:Signature` to the security
//! header once the whole document has been seen.

pub mod chain;
pub mod context;
pub mod encrypt;
pub mod ending;
mod fragment;
pub mod id;
pub mod matcher;
pub mod pipeline;
pub mod properties;
pub mod provider;
pub mod signature;

pub use chain::{ChainCursor, Processor, ProcessorChain, ProcessorHandle};
pub use context::{
    ActiveTransforms, PartDefinition, SecurityContext, SoapVersion, TransformKind, PROPERTY_ACTOR,
};
pub use encrypt::{EncryptEntryProcessor, EncryptSubtreeProcessor};
pub use ending::{EncryptEndingProcessor, SignatureEndingProcessor};
pub use id::{IdGenerator, RandomIdGenerator};
pub use matcher::{secure_part_matches, Modifier, PartName, PartScope, SecurePart};
pub use pipeline::{OutboundMessage, OutboundSecurity};
pub use properties::{
    Action, EncryptionProperties, KeyConfig, SecurityProperties, SignatureProperties,
};
pub use provider::{CryptoProvider, DefaultCryptoProvider};
pub use signature::{SignatureEntryProcessor, SignatureSubtreeProcessor};
