#![forbid(unsafe_code)]

//! Digest algorithms for `ds:Reference` values (SHA-1 and the SHA-2 family).

use digest::Digest;
use ulriksdal_core::{algorithm, Error, Result};

/// Trait for incremental digest algorithms.
pub trait DigestAlgorithm: Send {
    fn update(&mut self, data: &[u8]);
    fn finalize(self: Box<Self>) -> Vec<u8>;
    fn uri(&self) -> &'static str;
}

/// Create a digest algorithm from its URI.
pub fn from_uri(uri: &str) -> Result<Box<dyn DigestAlgorithm>> {
    match uri {
        algorithm::SHA1 => Ok(Box::new(Hashing::<sha1::Sha1>::new(algorithm::SHA1))),
        algorithm::SHA224 => Ok(Box::new(Hashing::<sha2::Sha224>::new(algorithm::SHA224))),
        algorithm::SHA256 => Ok(Box::new(Hashing::<sha2::Sha256>::new(algorithm::SHA256))),
        algorithm::SHA384 => Ok(Box::new(Hashing::<sha2::Sha384>::new(algorithm::SHA384))),
        algorithm::SHA512 => Ok(Box::new(Hashing::<sha2::Sha512>::new(algorithm::SHA512))),
        _ => Err(Error::UnsupportedAlgorithm(format!("digest: {uri}"))),
    }
}

/// Compute a digest in one shot.
pub fn digest(uri: &str, data: &[u8]) -> Result<Vec<u8>> {
    let mut hasher = from_uri(uri)?;
    hasher.update(data);
    Ok(hasher.finalize())
}

struct Hashing<D> {
    inner: D,
    uri: &'static str,
}

impl<D: Digest> Hashing<D> {
    fn new(uri: &'static str) -> Self {
        Self { inner: D::new(), uri }
    }
}

impl<D: Digest + Send> DigestAlgorithm for Hashing<D> {
    fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.inner, data);
    }

    fn finalize(self: Box<Self>) -> Vec<u8> {
        self.inner.finalize().to_vec()
    }

    fn uri(&self) -> &'static str {
        self.uri
    }
}
