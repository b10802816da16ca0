#![forbid(unsafe_code)]

//! Outbound security configuration, loadable from YAML.
//!
//! ```yaml
//! actions: [signature, encrypt]
//! actor: "urn:gateway"
//! encryption:
//!   token_id: enc-key
//!   algorithm: "http://www.w3.org/2001/04/xmlenc#aes256-cbc"
//!   parts:
//!     - name: "{urn:example:pay}amount"
//!       modifier: content
//! signature:
//!   token_id: mac-key
//!   parts:
//!     - name: "{http://schemas.xmlsoap.org/soap/envelope/}Body"
//! keys:
//!   - name: enc-key
//!     kind: aes
//!     hex: "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f"
//! ```

use crate::matcher::SecurePart;
use serde::Deserialize;
use std::path::Path;
use ulriksdal_core::{algorithm, Error, Result};
use ulriksdal_keys::{loader, KeyKind, KeysManager};

/// An outbound transform, in the order it applies to the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Encrypt,
    Signature,
}

/// Complete outbound configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityProperties {
    pub actions: Vec<Action>,
    /// SOAP actor (1.1) or role (1.2) of a security header created for the message.
    pub actor: Option<String>,
    pub encryption: EncryptionProperties,
    pub signature: SignatureProperties,
    /// Keys available to the key store built by [`SecurityProperties::key_store`].
    pub keys: Vec<KeyConfig>,
}

/// Settings of the encrypt action.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncryptionProperties {
    pub token_id: Option<String>,
    pub algorithm: String,
    pub parts: Vec<SecurePart>,
}

impl Default for EncryptionProperties {
    fn default() -> Self {
        Self {
            token_id: None,
            algorithm: algorithm::AES256_CBC.to_owned(),
            parts: Vec::new(),
        }
    }
}

/// Settings of the signature action.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SignatureProperties {
    pub token_id: Option<String>,
    /// `SignatureMethod` URI.
    pub algorithm: String,
    /// `DigestMethod` URI used for every reference.
    pub digest_algorithm: String,
    pub parts: Vec<SecurePart>,
}

impl Default for SignatureProperties {
    fn default() -> Self {
        Self {
            token_id: None,
            algorithm: algorithm::HMAC_SHA256.to_owned(),
            digest_algorithm: algorithm::SHA256.to_owned(),
            parts: Vec::new(),
        }
    }
}

/// A key given inline in the configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyConfig {
    pub name: String,
    /// `aes`, `des3` or `hmac`.
    pub kind: String,
    pub hex: String,
}

impl SecurityProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse YAML configuration.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| Error::Config(format!("invalid configuration: {e}")))
    }

    /// Read YAML configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    // ── Builder ──────────────────────────────────────────────────────

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn encryption_token(mut self, token_id: impl Into<String>) -> Self {
        self.encryption.token_id = Some(token_id.into());
        self
    }

    pub fn encryption_algorithm(mut self, uri: impl Into<String>) -> Self {
        self.encryption.algorithm = uri.into();
        self
    }

    pub fn encrypt_part(mut self, part: SecurePart) -> Self {
        self.encryption.parts.push(part);
        self
    }

    pub fn signature_token(mut self, token_id: impl Into<String>) -> Self {
        self.signature.token_id = Some(token_id.into());
        self
    }

    pub fn signature_algorithm(mut self, uri: impl Into<String>) -> Self {
        self.signature.algorithm = uri.into();
        self
    }

    pub fn digest_algorithm(mut self, uri: impl Into<String>) -> Self {
        self.signature.digest_algorithm = uri.into();
        self
    }

    pub fn sign_part(mut self, part: SecurePart) -> Self {
        self.signature.parts.push(part);
        self
    }

    // ── Checks ───────────────────────────────────────────────────────

    /// Reject configurations that cannot produce a secured message.
    pub fn validate(&self) -> Result<()> {
        for (i, action) in self.actions.iter().enumerate() {
            if self.actions[..i].contains(action) {
                return Err(Error::Config(format!("action {action:?} listed twice")));
            }
            let (token_id, parts, algorithm) = match action {
                Action::Encrypt => (
                    &self.encryption.token_id,
                    &self.encryption.parts,
                    &self.encryption.algorithm,
                ),
                Action::Signature => (
                    &self.signature.token_id,
                    &self.signature.parts,
                    &self.signature.algorithm,
                ),
            };
            if token_id.as_deref().map_or(true, str::is_empty) {
                return Err(Error::Config(format!("action {action:?} has no token_id")));
            }
            if parts.is_empty() {
                return Err(Error::Config(format!("action {action:?} has no parts")));
            }
            if algorithm.is_empty() {
                return Err(Error::Config(format!("action {action:?} has no algorithm")));
            }
        }
        if self.actions.contains(&Action::Signature) && self.signature.digest_algorithm.is_empty() {
            return Err(Error::Config("signature has no digest_algorithm".into()));
        }
        Ok(())
    }

    /// Build a key store from the inline keys.
    pub fn key_store(&self) -> Result<KeysManager> {
        let mut manager = KeysManager::new();
        for key in &self.keys {
            let kind: KeyKind = key.kind.parse()?;
            manager.add_key(loader::load_hex_key(kind, &key.hex)?.with_name(key.name.as_str()));
        }
        Ok(manager)
    }
}
