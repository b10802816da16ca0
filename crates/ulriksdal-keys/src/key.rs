#![forbid(unsafe_code)]

//! Key types and the key material handle handed to the pipeline.

use std::sync::Arc;
use ulriksdal_core::{algorithm, Error, Result};

/// Usage flags for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyUsage {
    Sign,
    Encrypt,
    Any,
}

/// The underlying symmetric key data.
#[derive(Clone)]
pub enum KeyData {
    Aes(Vec<u8>),
    Des3(Vec<u8>),
    Hmac(Vec<u8>),
}

// Never print key bytes.
impl std::fmt::Debug for KeyData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Aes(k) => write!(f, "AES key ({} bytes)", k.len()),
            Self::Des3(_) => write!(f, "3DES key"),
            Self::Hmac(k) => write!(f, "HMAC key ({} bytes)", k.len()),
        }
    }
}

impl KeyData {
    fn bytes(&self) -> &[u8] {
        match self {
            Self::Aes(k) | Self::Des3(k) | Self::Hmac(k) => k,
        }
    }
}

/// Opaque handle to the key behind a security token.
///
/// Only [`KeyMaterial::id`] ever reaches the output document.
pub trait KeyMaterial: Send + Sync + std::fmt::Debug {
    /// The token id this key is bound to.
    fn id(&self) -> &str;

    /// Key bytes usable with `algorithm`, or `KeyResolution` if the key
    /// does not fit the algorithm.
    fn secret_key(&self, algorithm: &str) -> Result<Vec<u8>>;
}

/// Looks up key material by token id.
pub trait KeyResolver: Send + Sync {
    fn resolve(&self, token_id: &str) -> Result<Arc<dyn KeyMaterial>>;
}

/// A named key with associated data.
#[derive(Debug, Clone)]
pub struct Key {
    /// Name used for lookup; doubles as the token id.
    pub name: Option<String>,
    pub data: KeyData,
    pub usage: KeyUsage,
}

impl Key {
    /// Create a new key.
    pub fn new(data: KeyData, usage: KeyUsage) -> Self {
        Self {
            name: None,
            data,
            usage,
        }
    }

    /// Set the key name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Get the raw symmetric key bytes.
    pub fn symmetric_key_bytes(&self) -> &[u8] {
        self.data.bytes()
    }

    fn unusable(&self, algorithm: &str, reason: &str) -> Error {
        Error::KeyResolution(format!(
            "key '{}' cannot be used with {algorithm}: {reason}",
            self.id()
        ))
    }
}

fn is_hmac(uri: &str) -> bool {
    matches!(
        uri,
        algorithm::HMAC_SHA1
            | algorithm::HMAC_SHA224
            | algorithm::HMAC_SHA256
            | algorithm::HMAC_SHA384
            | algorithm::HMAC_SHA512
    )
}

impl KeyMaterial for Key {
    fn id(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    fn secret_key(&self, uri: &str) -> Result<Vec<u8>> {
        if is_hmac(uri) {
            if self.usage == KeyUsage::Encrypt {
                return Err(self.unusable(uri, "key is restricted to encryption"));
            }
            // Any symmetric secret can key an HMAC.
            return Ok(self.data.bytes().to_vec());
        }

        let Some(size) = algorithm::cipher_key_size(uri) else {
            return Err(self.unusable(uri, "unknown algorithm"));
        };
        if self.usage == KeyUsage::Sign {
            return Err(self.unusable(uri, "key is restricted to signing"));
        }
        let family_matches = match &self.data {
            KeyData::Des3(_) => uri == algorithm::TRIPLEDES_CBC,
            KeyData::Aes(_) => uri != algorithm::TRIPLEDES_CBC,
            KeyData::Hmac(_) => false,
        };
        if !family_matches {
            return Err(self.unusable(uri, &format!("{:?} does not fit the cipher", self.data)));
        }
        let bytes = self.data.bytes();
        if bytes.len() != size {
            return Err(self.unusable(
                uri,
                &format!("expected {size} byte key, have {}", bytes.len()),
            ));
        }
        Ok(bytes.to_vec())
    }
}
