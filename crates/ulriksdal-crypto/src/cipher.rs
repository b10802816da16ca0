#![forbid(unsafe_code)]

//! Block cipher algorithms used for `EncryptedData` (AES-CBC, AES-GCM, 3DES-CBC).
//!
//! Output layout follows XML Encryption: the IV (or GCM nonce) is prepended
//! to the ciphertext; GCM appends its 16-byte tag.

use rand::RngCore;
use ulriksdal_core::{algorithm, Error, Result};

/// Trait for cipher algorithms.
pub trait CipherAlgorithm: Send + Sync {
    fn uri(&self) -> &'static str;
    fn key_size(&self) -> usize;
    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>>;
    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Create a cipher algorithm from its URI.
pub fn from_uri(uri: &str) -> Result<Box<dyn CipherAlgorithm>> {
    let cipher: Box<dyn CipherAlgorithm> = match uri {
        algorithm::AES128_CBC => Box::new(AesCbc {
            key_size: 16,
            uri: algorithm::AES128_CBC,
        }),
        algorithm::AES192_CBC => Box::new(AesCbc {
            key_size: 24,
            uri: algorithm::AES192_CBC,
        }),
        algorithm::AES256_CBC => Box::new(AesCbc {
            key_size: 32,
            uri: algorithm::AES256_CBC,
        }),
        algorithm::AES128_GCM => Box::new(AesGcm {
            key_size: 16,
            uri: algorithm::AES128_GCM,
        }),
        algorithm::AES192_GCM => Box::new(AesGcm {
            key_size: 24,
            uri: algorithm::AES192_GCM,
        }),
        algorithm::AES256_GCM => Box::new(AesGcm {
            key_size: 32,
            uri: algorithm::AES256_GCM,
        }),
        algorithm::TRIPLEDES_CBC => Box::new(TripleDesCbc),
        _ => return Err(Error::UnsupportedAlgorithm(format!("cipher: {uri}"))),
    };
    Ok(cipher)
}

fn check_key(expected: usize, key: &[u8]) -> Result<()> {
    if key.len() != expected {
        return Err(Error::Crypto(format!(
            "expected {expected} byte key, got {}",
            key.len()
        )));
    }
    Ok(())
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

// Both CBC ciphers pad to a whole block and run the mode unpadded.
macro_rules! cbc_encrypt {
    ($cipher:ty, $key:expr, $iv:expr, $buf:expr) => {{
        use cbc::cipher::{block_padding::NoPadding, BlockEncryptMut, KeyIvInit};
        let len = $buf.len();
        cbc::Encryptor::<$cipher>::new_from_slices($key, $iv)
            .map_err(|e| Error::Crypto(format!("CBC init: {e}")))?
            .encrypt_padded_mut::<NoPadding>(&mut $buf, len)
            .map_err(|_| Error::Crypto("CBC encrypt failed".into()))?;
    }};
}

macro_rules! cbc_decrypt {
    ($cipher:ty, $key:expr, $iv:expr, $buf:expr) => {{
        use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, KeyIvInit};
        cbc::Decryptor::<$cipher>::new_from_slices($key, $iv)
            .map_err(|e| Error::Crypto(format!("CBC init: {e}")))?
            .decrypt_padded_mut::<NoPadding>(&mut $buf)
            .map_err(|_| Error::Crypto("CBC decrypt failed".into()))?;
    }};
}

// ── AES-CBC ──────────────────────────────────────────────────────────

struct AesCbc {
    key_size: usize,
    uri: &'static str,
}

impl CipherAlgorithm for AesCbc {
    fn uri(&self) -> &'static str {
        self.uri
    }

    fn key_size(&self) -> usize {
        self.key_size
    }

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        check_key(self.key_size, key)?;
        let iv = random_bytes::<16>();
        let mut buf = pad(plaintext, 16);
        match self.key_size {
            16 => cbc_encrypt!(aes::Aes128, key, &iv, buf),
            24 => cbc_encrypt!(aes::Aes192, key, &iv, buf),
            _ => cbc_encrypt!(aes::Aes256, key, &iv, buf),
        }
        Ok([iv.as_slice(), &buf].concat())
    }

    fn decrypt(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        check_key(self.key_size, key)?;
        if data.len() < 32 || data.len() % 16 != 0 {
            return Err(Error::Crypto("AES-CBC data has invalid length".into()));
        }
        let (iv, ciphertext) = data.split_at(16);
        let mut buf = ciphertext.to_vec();
        match self.key_size {
            16 => cbc_decrypt!(aes::Aes128, key, iv, buf),
            24 => cbc_decrypt!(aes::Aes192, key, iv, buf),
            _ => cbc_decrypt!(aes::Aes256, key, iv, buf),
        }
        unpad(&buf, 16)
    }
}

// ── AES-GCM ──────────────────────────────────────────────────────────

struct AesGcm {
    key_size: usize,
    uri: &'static str,
}

type Aes192Gcm = aes_gcm::AesGcm<aes::Aes192, aes_gcm::aead::consts::U12>;

impl CipherAlgorithm for AesGcm {
    fn uri(&self) -> &'static str {
        self.uri
    }

    fn key_size(&self) -> usize {
        self.key_size
    }

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        use aes_gcm::{aead::Aead, KeyInit, Nonce};

        check_key(self.key_size, key)?;
        let nonce_bytes = random_bytes::<12>();
        let nonce = Nonce::from_slice(&nonce_bytes);
        let sealed = match self.key_size {
            16 => aes_gcm::Aes128Gcm::new_from_slice(key)
                .map_err(|e| Error::Crypto(format!("AES-GCM init: {e}")))?
                .encrypt(nonce, plaintext),
            24 => Aes192Gcm::new_from_slice(key)
                .map_err(|e| Error::Crypto(format!("AES-GCM init: {e}")))?
                .encrypt(nonce, plaintext),
            _ => aes_gcm::Aes256Gcm::new_from_slice(key)
                .map_err(|e| Error::Crypto(format!("AES-GCM init: {e}")))?
                .encrypt(nonce, plaintext),
        }
        .map_err(|e| Error::Crypto(format!("AES-GCM encrypt: {e}")))?;
        Ok([nonce_bytes.as_slice(), &sealed].concat())
    }

    fn decrypt(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        use aes_gcm::{aead::Aead, KeyInit, Nonce};

        check_key(self.key_size, key)?;
        if data.len() < 12 + 16 {
            return Err(Error::Crypto("AES-GCM data too short".into()));
        }
        let (nonce, sealed) = data.split_at(12);
        let nonce = Nonce::from_slice(nonce);
        match self.key_size {
            16 => aes_gcm::Aes128Gcm::new_from_slice(key)
                .map_err(|e| Error::Crypto(format!("AES-GCM init: {e}")))?
                .decrypt(nonce, sealed),
            24 => Aes192Gcm::new_from_slice(key)
                .map_err(|e| Error::Crypto(format!("AES-GCM init: {e}")))?
                .decrypt(nonce, sealed),
            _ => aes_gcm::Aes256Gcm::new_from_slice(key)
                .map_err(|e| Error::Crypto(format!("AES-GCM init: {e}")))?
                .decrypt(nonce, sealed),
        }
        .map_err(|e| Error::Crypto(format!("AES-GCM decrypt: {e}")))
    }
}

// ── 3DES-CBC ─────────────────────────────────────────────────────────

struct TripleDesCbc;

impl CipherAlgorithm for TripleDesCbc {
    fn uri(&self) -> &'static str {
        algorithm::TRIPLEDES_CBC
    }

    fn key_size(&self) -> usize {
        24
    }

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        check_key(24, key)?;
        let iv = random_bytes::<8>();
        let mut buf = pad(plaintext, 8);
        cbc_encrypt!(des::TdesEde3, key, &iv, buf);
        Ok([iv.as_slice(), &buf].concat())
    }

    fn decrypt(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        check_key(24, key)?;
        if data.len() < 16 || data.len() % 8 != 0 {
            return Err(Error::Crypto("3DES data has invalid length".into()));
        }
        let (iv, ciphertext) = data.split_at(8);
        let mut buf = ciphertext.to_vec();
        cbc_decrypt!(des::TdesEde3, key, iv, buf);
        unpad(&buf, 8)
    }
}

// ── Padding ──────────────────────────────────────────────────────────

fn pad(data: &[u8], block_size: usize) -> Vec<u8> {
    let pad_len = block_size - (data.len() % block_size);
    let mut padded = Vec::with_capacity(data.len() + pad_len);
    padded.extend_from_slice(data);
    padded.resize(data.len() + pad_len, pad_len as u8);
    padded
}

/// Remove XML Encryption padding.
///
/// Only the last byte (the padding length) is checked, which accepts both
/// PKCS#7 and ISO 10126 filler.
fn unpad(data: &[u8], block_size: usize) -> Result<Vec<u8>> {
    let Some(&last) = data.last() else {
        return Ok(Vec::new());
    };
    let pad_len = last as usize;
    if pad_len == 0 || pad_len > block_size || pad_len > data.len() {
        return Err(Error::Crypto("invalid padding".into()));
    }
    Ok(data[..data.len() - pad_len].to_vec())
}
