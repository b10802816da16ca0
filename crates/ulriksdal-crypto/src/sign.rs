#![forbid(unsafe_code)]

//! Keyed-hash signature algorithms (HMAC-SHA1 and HMAC-SHA2).
//!
//! Signing in the outbound pipeline uses the shared symmetric tokens, so
//! HMAC is the only `SignatureMethod` offered.

use hmac::{Hmac, Mac};
use ulriksdal_core::{algorithm, Error, Result};

/// Trait for signature algorithms.
pub trait SignatureAlgorithm: Send + Sync {
    fn uri(&self) -> &'static str;
    fn sign(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>>;
    fn verify(&self, key: &[u8], data: &[u8], signature: &[u8]) -> Result<bool>;
}

/// Create a signature algorithm from its URI.
pub fn from_uri(uri: &str) -> Result<Box<dyn SignatureAlgorithm>> {
    let hash = match uri {
        algorithm::HMAC_SHA1 => HashType::Sha1,
        algorithm::HMAC_SHA224 => HashType::Sha224,
        algorithm::HMAC_SHA256 => HashType::Sha256,
        algorithm::HMAC_SHA384 => HashType::Sha384,
        algorithm::HMAC_SHA512 => HashType::Sha512,
        _ => return Err(Error::UnsupportedAlgorithm(format!("signature: {uri}"))),
    };
    Ok(Box::new(HmacSign { hash, uri: static_uri(hash) }))
}

#[derive(Debug, Clone, Copy)]
enum HashType {
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

fn static_uri(hash: HashType) -> &'static str {
    match hash {
        HashType::Sha1 => algorithm::HMAC_SHA1,
        HashType::Sha224 => algorithm::HMAC_SHA224,
        HashType::Sha256 => algorithm::HMAC_SHA256,
        HashType::Sha384 => algorithm::HMAC_SHA384,
        HashType::Sha512 => algorithm::HMAC_SHA512,
    }
}

struct HmacSign {
    hash: HashType,
    uri: &'static str,
}

impl SignatureAlgorithm for HmacSign {
    fn uri(&self) -> &'static str {
        self.uri
    }

    fn sign(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        compute_hmac(self.hash, key, data)
    }

    fn verify(&self, key: &[u8], data: &[u8], signature: &[u8]) -> Result<bool> {
        let expected = compute_hmac(self.hash, key, data)?;
        Ok(constant_time_eq(&expected, signature))
    }
}

fn compute_hmac(hash: HashType, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    macro_rules! hmac_compute {
        ($hasher:ty) => {{
            let mut mac = <Hmac<$hasher>>::new_from_slice(key)
                .map_err(|e| Error::Crypto(format!("HMAC key: {e}")))?;
            mac.update(data);
            Ok(mac.finalize().into_bytes().to_vec())
        }};
    }
    match hash {
        HashType::Sha1 => hmac_compute!(sha1::Sha1),
        HashType::Sha224 => hmac_compute!(sha2::Sha224),
        HashType::Sha256 => hmac_compute!(sha2::Sha256),
        HashType::Sha384 => hmac_compute!(sha2::Sha384),
        HashType::Sha512 => hmac_compute!(sha2::Sha512),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
