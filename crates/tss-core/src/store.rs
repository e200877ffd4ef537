//! Key material persistence

use crate::types::KeyMaterial;
use crate::Result;
use dashmap::DashMap;

/// External store that completed key material is handed to
pub trait KeyStore: Send + Sync {
    /// Persist key material for a party, replacing any previous entry
    fn put(&self, party_id: &str, key: &KeyMaterial) -> Result<()>;

    /// Load key material for a party
    fn get(&self, party_id: &str) -> Result<Option<KeyMaterial>>;
}

/// Key store that lives for the process lifetime
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: DashMap<String, KeyMaterial>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn put(&self, party_id: &str, key: &KeyMaterial) -> Result<()> {
        self.keys.insert(party_id.to_string(), key.clone());
        Ok(())
    }

    fn get(&self, party_id: &str) -> Result<Option<KeyMaterial>> {
        Ok(self.keys.get(party_id).map(|entry| entry.value().clone()))
    }
}
