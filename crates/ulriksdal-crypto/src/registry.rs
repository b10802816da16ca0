#![forbid(unsafe_code)]

//! Algorithm registry mapping URIs to factory functions.

use crate::cipher::CipherAlgorithm;
use crate::digest::DigestAlgorithm;
use crate::sign::SignatureAlgorithm;
use ulriksdal_core::Result;

/// Central registry for all cryptographic algorithms.
pub struct AlgorithmRegistry;

impl AlgorithmRegistry {
    /// Look up a digest algorithm by URI.
    pub fn digest(uri: &str) -> Result<Box<dyn DigestAlgorithm>> {
        crate::digest::from_uri(uri)
    }

    /// Look up a signature algorithm by URI.
    pub fn signature(uri: &str) -> Result<Box<dyn SignatureAlgorithm>> {
        crate::sign::from_uri(uri)
    }

    /// Look up a cipher algorithm by URI.
    pub fn cipher(uri: &str) -> Result<Box<dyn CipherAlgorithm>> {
        crate::cipher::from_uri(uri)
    }
}
