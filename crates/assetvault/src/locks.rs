use cas::{BlobLock, BlobStore, ContentHash, LockMode};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

const STRIPES: usize = 64;

/// Striped reader/writer locks keyed by content hash.
///
/// Stores hold the read side from blob write through record insert; the
/// collector holds the write side from its "is this hash still used?" check
/// through the blob delete. Stores of different hashes that share a stripe
/// only ever contend with a purge, never with each other.
///
/// Built with [`HashLocks::over`], each guard also holds the blob store's
/// own lock for the hash, which covers other processes (and other services)
/// opened on the same store directory.
pub struct HashLocks {
    stripes: Vec<RwLock<()>>,
    blobs: Option<Arc<dyn BlobStore>>,
}

/// Held for as long as the hash must stay locked.
#[must_use = "the hash is unlocked as soon as the guard is dropped"]
pub struct HashGuard<G> {
    _blob: Option<BlobLock>,
    _stripe: G,
}

impl HashLocks {
    /// Locks that only exclude threads of this process.
    pub fn new() -> Self {
        Self {
            stripes: (0..STRIPES).map(|_| RwLock::new(())).collect(),
            blobs: None,
        }
    }

    /// Locks that also take `blobs`' cross-process lock for each hash.
    pub fn over(blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            blobs: Some(blobs),
            ..Self::new()
        }
    }

    fn stripe(&self, hash: &ContentHash) -> &RwLock<()> {
        &self.stripes[hash.first_byte() as usize % STRIPES]
    }

    fn blob_lock(&self, hash: &ContentHash, mode: LockMode) -> anyhow::Result<Option<BlobLock>> {
        match &self.blobs {
            Some(blobs) => blobs.lock(hash, mode),
            None => Ok(None),
        }
    }

    pub fn read(&self, hash: &ContentHash) -> anyhow::Result<HashGuard<RwLockReadGuard<'_, ()>>> {
        // The guarded value is (), so a poisoned lock carries no bad state.
        let stripe = self
            .stripe(hash)
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(HashGuard {
            _blob: self.blob_lock(hash, LockMode::Shared)?,
            _stripe: stripe,
        })
    }

    pub fn write(&self, hash: &ContentHash) -> anyhow::Result<HashGuard<RwLockWriteGuard<'_, ()>>> {
        let stripe = self
            .stripe(hash)
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(HashGuard {
            _blob: self.blob_lock(hash, LockMode::Exclusive)?,
            _stripe: stripe,
        })
    }
}

impl Default for HashLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HashLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashLocks")
            .field("stripes", &self.stripes.len())
            .field("cross_process", &self.blobs.is_some())
            .finish()
    }
}
