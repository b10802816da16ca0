#![forbid(unsafe_code)]

//! The cryptographic capability used by the processors.

use ulriksdal_core::Result;
use ulriksdal_crypto::{digest, AlgorithmRegistry};

/// Encryption, digest and signature primitives addressed by algorithm URI.
///
/// The default methods use the algorithms of `ulriksdal-crypto`; override
/// them to plug in another backend.
pub trait CryptoProvider: Send + Sync {
    fn encrypt(&self, plaintext: &[u8], key: &[u8], algorithm: &str) -> Result<Vec<u8>> {
        AlgorithmRegistry::cipher(algorithm)?.encrypt(key, plaintext)
    }

    fn digest(&self, algorithm: &str, data: &[u8]) -> Result<Vec<u8>> {
        digest::digest(algorithm, data)
    }

    fn sign(&self, algorithm: &str, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        AlgorithmRegistry::signature(algorithm)?.sign(key, data)
    }
}

/// Provider backed by `ulriksdal-crypto`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCryptoProvider;

impl CryptoProvider for DefaultCryptoProvider {}
