#![forbid(unsafe_code)]

//! Identifier generation for `Id` attributes.

use rand::RngCore;

/// Produces identifiers unique within a message.
pub trait IdGenerator: Send + Sync {
    fn generate_id(&self, prefix: &str) -> String;
}

/// `prefix` followed by 128 random bits in hex.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn generate_id(&self, prefix: &str) -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        format!("{prefix}{}", hex::encode(bytes))
    }
}
