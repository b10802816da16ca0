#![forbid(unsafe_code)]

//! Key loading from raw binary files and hex strings.

use crate::key::{Key, KeyData, KeyUsage};
use std::path::Path;
use std::str::FromStr;
use ulriksdal_core::{Error, Result};

/// The kind of symmetric key held in a file or configuration entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Aes,
    Des3,
    Hmac,
}

impl FromStr for KeyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "aes" => Ok(Self::Aes),
            "des3" | "3des" | "tripledes" => Ok(Self::Des3),
            "hmac" => Ok(Self::Hmac),
            other => Err(Error::Config(format!("unknown key kind: {other}"))),
        }
    }
}

/// Load an HMAC key from raw binary data.
pub fn load_hmac_key(data: &[u8]) -> Result<Key> {
    if data.is_empty() {
        return Err(Error::KeyResolution("empty HMAC key".into()));
    }
    Ok(Key::new(KeyData::Hmac(data.to_vec()), KeyUsage::Any))
}

/// Load an AES key from raw binary data.
pub fn load_aes_key(data: &[u8]) -> Result<Key> {
    match data.len() {
        16 | 24 | 32 => Ok(Key::new(KeyData::Aes(data.to_vec()), KeyUsage::Any)),
        n => Err(Error::KeyResolution(format!(
            "invalid AES key size: {n} (expected 16, 24, or 32)"
        ))),
    }
}

/// Load a 3DES key from raw binary data.
pub fn load_des3_key(data: &[u8]) -> Result<Key> {
    if data.len() != 24 {
        return Err(Error::KeyResolution(format!(
            "invalid 3DES key size: {} (expected 24)",
            data.len()
        )));
    }
    Ok(Key::new(KeyData::Des3(data.to_vec()), KeyUsage::Any))
}

/// Load a key of the given kind from raw bytes.
pub fn load_raw_key(kind: KeyKind, data: &[u8]) -> Result<Key> {
    match kind {
        KeyKind::Aes => load_aes_key(data),
        KeyKind::Des3 => load_des3_key(data),
        KeyKind::Hmac => load_hmac_key(data),
    }
}

/// Load a key of the given kind from a hex string (whitespace ignored).
pub fn load_hex_key(kind: KeyKind, hex_value: &str) -> Result<Key> {
    let compact: String = hex_value.chars().filter(|c| !c.is_whitespace()).collect();
    let data = hex::decode(&compact)
        .map_err(|e| Error::KeyResolution(format!("invalid hex key: {e}")))?;
    load_raw_key(kind, &data)
}

/// Load a raw binary key file and name it.
pub fn load_key_file(path: &Path, kind: KeyKind, name: &str) -> Result<Key> {
    let data = std::fs::read(path)?;
    Ok(load_raw_key(kind, &data)?.with_name(name))
}
