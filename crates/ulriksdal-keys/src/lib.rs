#![forbid(unsafe_code)]

//! Key management for the Ulriksdal pipeline.
//!
//! Symmetric keys (AES, 3DES, HMAC) loaded from raw files or hex, a
//! `KeysManager` for named lookup, and the [`KeyMaterial`] / [`KeyResolver`]
//! seams the pipeline resolves security tokens through.

pub mod key;
pub mod loader;
pub mod manager;

pub use key::{Key, KeyData, KeyMaterial, KeyResolver, KeyUsage};
pub use loader::KeyKind;
pub use manager::KeysManager;
