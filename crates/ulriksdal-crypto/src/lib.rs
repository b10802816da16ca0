#![forbid(unsafe_code)]

//! Cryptographic algorithm implementations for the Ulriksdal pipeline.
//!
//! Provides the block ciphers used for `EncryptedData`, the digests used
//! for signature references and HMAC signing.

pub mod cipher;
pub mod digest;
pub mod registry;
pub mod sign;

pub use cipher::CipherAlgorithm;
pub use digest::DigestAlgorithm;
pub use registry::AlgorithmRegistry;
pub use sign::SignatureAlgorithm;
