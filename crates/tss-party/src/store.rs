//! Key material on disk

use std::path::{Path, PathBuf};
use tss_core::{Error, KeyMaterial, KeyStore, Result};

/// Stores each party's key material as `keyshare.{id}.json` in one directory
pub struct FileKeyStore {
    dir: PathBuf,
}

impl FileKeyStore {
    /// Open the store, creating the directory if needed
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| Error::Store(e.to_string()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn path(&self, party_id: &str) -> PathBuf {
        self.dir.join(format!("keyshare.{party_id}.json"))
    }
}

impl KeyStore for FileKeyStore {
    fn put(&self, party_id: &str, key: &KeyMaterial) -> Result<()> {
        let json = serde_json::to_string_pretty(key)?;
        std::fs::write(self.path(party_id), json).map_err(|e| Error::Store(e.to_string()))
    }

    fn get(&self, party_id: &str) -> Result<Option<KeyMaterial>> {
        let path = self.path(party_id);
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path).map_err(|e| Error::Store(e.to_string()))?;
        let key = serde_json::from_str(&json).map_err(|e| Error::Deserialization(e.to_string()))?;
        Ok(Some(key))
    }
}
