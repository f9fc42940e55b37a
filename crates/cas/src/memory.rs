//! In-memory blob store for tests and ephemeral vaults.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};

use crate::hash::ContentHash;
use crate::store::BlobStore;

/// HashMap-backed [`BlobStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: RwLock<HashMap<ContentHash, Arc<[u8]>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> anyhow::Error {
    anyhow!("memory blob store lock poisoned")
}

impl BlobStore for MemoryStore {
    fn put(&self, hash: &ContentHash, data: &[u8]) -> Result<bool> {
        let mut blobs = self.blobs.write().map_err(|_| poisoned())?;
        if blobs.contains_key(hash) {
            return Ok(false);
        }
        blobs.insert(hash.clone(), Arc::from(data));
        Ok(true)
    }

    fn retrieve(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>> {
        let blobs = self.blobs.read().map_err(|_| poisoned())?;
        Ok(blobs.get(hash).map(|b| b.to_vec()))
    }

    fn exists(&self, hash: &ContentHash) -> bool {
        self.blobs
            .read()
            .map(|b| b.contains_key(hash))
            .unwrap_or(false)
    }

    fn delete(&self, hash: &ContentHash) -> Result<bool> {
        let mut blobs = self.blobs.write().map_err(|_| poisoned())?;
        Ok(blobs.remove(hash).is_some())
    }

    fn hashes(&self) -> Result<Vec<ContentHash>> {
        let blobs = self.blobs.read().map_err(|_| poisoned())?;
        let mut hashes: Vec<_> = blobs.keys().cloned().collect();
        hashes.sort();
        Ok(hashes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip_and_dedup() {
        let store = MemoryStore::new();
        let hash = store.store(b"payload").unwrap();
        assert!(!store.put(&hash, b"payload").unwrap());
        assert_eq!(store.len(), 1);
        assert_eq!(store.retrieve(&hash).unwrap().as_deref(), Some(&b"payload"[..]));

        assert!(store.delete(&hash).unwrap());
        assert!(store.is_empty());
        assert!(store.retrieve(&hash).unwrap().is_none());
    }
}
