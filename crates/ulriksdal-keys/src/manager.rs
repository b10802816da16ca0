#![forbid(unsafe_code)]

//! Key manager with named key store.

use crate::key::{Key, KeyMaterial, KeyResolver};
use std::sync::Arc;
use ulriksdal_core::{Error, Result};

/// Holds the keys available to the pipeline, looked up by name.
#[derive(Debug, Default)]
pub struct KeysManager {
    keys: Vec<Arc<Key>>,
}

impl KeysManager {
    /// Create an empty keys manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key to the manager. On duplicate names the first key added wins.
    pub fn add_key(&mut self, key: Key) {
        self.keys.push(Arc::new(key));
    }

    /// Insert a key at the front of the manager (takes priority on name lookup).
    pub fn insert_key_first(&mut self, key: Key) {
        self.keys.insert(0, Arc::new(key));
    }

    /// Find a key by name.
    pub fn find_by_name(&self, name: &str) -> Option<&Arc<Key>> {
        self.keys.iter().find(|k| k.name.as_deref() == Some(name))
    }

    /// Iterator over all keys.
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.keys.iter().map(|k| k.as_ref())
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl KeyResolver for KeysManager {
    fn resolve(&self, token_id: &str) -> Result<Arc<dyn KeyMaterial>> {
        let key = self
            .find_by_name(token_id)
            .ok_or_else(|| Error::KeyResolution(format!("no key named '{token_id}'")))?;
        Ok(key.clone() as Arc<dyn KeyMaterial>)
    }
}
