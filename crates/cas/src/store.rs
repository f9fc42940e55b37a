//! Blob storage: content hash -> payload bytes.
//!
//! The [`BlobStore`] trait is the leaf the asset vault builds on. It only
//! knows hashes and bytes; which records point at a blob is tracked elsewhere.
//!
//! [`FileStore`] layout:
//! ```text
//! {base_path}/
//! ├── objects/
//! │   ├── 5c/
//! │   │   └── 735d76fe3537a0f35cf4a4eb14a532
//! │   └── ...
//! ├── tmp/
//! │   └── {hash}.{uuid}   # in-flight writes, renamed into objects/
//! └── locks/
//!     └── 5c.lock         # writers shared, collector exclusive
//! ```

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, trace};

use crate::config::CasConfig;
use crate::hash::ContentHash;
use crate::lock::{BlobLock, LockMode};

/// Content-addressed blob storage.
///
/// Implementations must make `put` idempotent: writing a hash that already
/// exists is a no-op, never an error.
pub trait BlobStore: Send + Sync {
    /// Insert `data` under `hash` if absent. Returns `true` when the blob was
    /// newly written and `false` when it already existed.
    ///
    /// The caller is responsible for `hash` matching `data`.
    fn put(&self, hash: &ContentHash, data: &[u8]) -> Result<bool>;

    /// Hash and insert `data`, returning its content hash.
    fn store(&self, data: &[u8]) -> Result<ContentHash> {
        let hash = ContentHash::from_data(data);
        self.put(&hash, data)?;
        Ok(hash)
    }

    /// Fetch a payload. `Ok(None)` when the hash is unknown.
    fn retrieve(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>>;

    /// Check for a payload without reading it.
    fn exists(&self, hash: &ContentHash) -> bool;

    /// Remove a payload. Returns `false` if it was already gone.
    fn delete(&self, hash: &ContentHash) -> Result<bool>;

    /// Every hash currently stored.
    fn hashes(&self) -> Result<Vec<ContentHash>>;

    /// Lock `hash` against other processes sharing this store. Stores that
    /// live in one process return `None`; in-process exclusion is the
    /// caller's job.
    fn lock(&self, _hash: &ContentHash, _mode: LockMode) -> Result<Option<BlobLock>> {
        Ok(None)
    }

    /// Remove abandoned partial writes older than `grace`. Returns how many
    /// were removed.
    fn sweep_partial(&self, _grace: Duration) -> Result<usize> {
        Ok(0)
    }
}

/// Filesystem-backed blob store with two-character directory sharding.
#[derive(Debug, Clone)]
pub struct FileStore {
    config: CasConfig,
}

impl FileStore {
    /// Open a store, creating its directories unless read-only.
    pub fn new(config: CasConfig) -> Result<Self> {
        if !config.read_only {
            fs::create_dir_all(config.objects_dir())
                .context("failed to create CAS objects directory")?;
            fs::create_dir_all(config.tmp_dir()).context("failed to create CAS tmp directory")?;
            fs::create_dir_all(config.locks_dir())
                .context("failed to create CAS locks directory")?;
        }

        Ok(Self { config })
    }

    pub fn at_path(path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(CasConfig::with_base_path(path))
    }

    pub fn read_only_at(path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(CasConfig::read_only(path))
    }

    pub fn config(&self) -> &CasConfig {
        &self.config
    }

    /// Where the payload for `hash` lives (whether or not it exists yet).
    pub fn object_path(&self, hash: &ContentHash) -> PathBuf {
        self.config
            .objects_dir()
            .join(hash.prefix())
            .join(hash.remainder())
    }

    /// Lock file guarding every hash that shares `hash`'s prefix.
    pub fn lock_path(&self, hash: &ContentHash) -> PathBuf {
        self.config
            .locks_dir()
            .join(format!("{}.lock", hash.prefix()))
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.config.read_only {
            anyhow::bail!("CAS is in read-only mode");
        }
        Ok(())
    }
}

impl BlobStore for FileStore {
    fn put(&self, hash: &ContentHash, data: &[u8]) -> Result<bool> {
        self.ensure_writable()?;

        let obj_path = self.object_path(hash);
        if obj_path.exists() {
            trace!(%hash, "blob already present");
            return Ok(false);
        }

        if let Some(parent) = obj_path.parent() {
            fs::create_dir_all(parent).context("failed to create object prefix directory")?;
        }

        // Unique temp name so racing writers of the same hash never share a file.
        let tmp_path = self
            .config
            .tmp_dir()
            .join(format!("{}.{}", hash, uuid::Uuid::new_v4().simple()));
        {
            let mut file = fs::File::create(&tmp_path).context("failed to create temp blob")?;
            file.write_all(data).context("failed to write temp blob")?;
            file.sync_all().context("failed to sync temp blob")?;
        }

        if obj_path.exists() {
            // Lost the race to another writer; identical content by definition.
            fs::remove_file(&tmp_path).ok();
            return Ok(false);
        }
        fs::rename(&tmp_path, &obj_path).context("failed to move blob into objects")?;

        debug!(%hash, size = data.len(), "blob written");
        Ok(true)
    }

    fn retrieve(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>> {
        match fs::read(self.object_path(hash)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context("failed to read object file"),
        }
    }

    fn exists(&self, hash: &ContentHash) -> bool {
        self.object_path(hash).exists()
    }

    fn delete(&self, hash: &ContentHash) -> Result<bool> {
        self.ensure_writable()?;

        match fs::remove_file(self.object_path(hash)) {
            Ok(()) => {
                debug!(%hash, "blob deleted");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).context("failed to delete object file"),
        }
    }

    fn hashes(&self) -> Result<Vec<ContentHash>> {
        let objects = self.config.objects_dir();
        if !objects.exists() {
            return Ok(Vec::new());
        }

        let mut hashes = Vec::new();
        for shard in fs::read_dir(&objects).context("failed to list objects directory")? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            let prefix = shard.file_name().to_string_lossy().into_owned();
            for entry in fs::read_dir(shard.path())? {
                let entry = entry?;
                let name = entry.file_name();
                let candidate = format!("{}{}", prefix, name.to_string_lossy());
                // Stray files that aren't hashes are not ours to report.
                if let Ok(hash) = candidate.parse::<ContentHash>() {
                    hashes.push(hash);
                }
            }
        }
        hashes.sort();
        Ok(hashes)
    }

    fn lock(&self, hash: &ContentHash, mode: LockMode) -> Result<Option<BlobLock>> {
        // Readers of a read-only store never race a delete they could cause.
        if self.config.read_only {
            return Ok(None);
        }
        BlobLock::acquire(&self.lock_path(hash), mode).map(Some)
    }

    fn sweep_partial(&self, grace: Duration) -> Result<usize> {
        self.ensure_writable()?;

        let tmp = self.config.tmp_dir();
        let entries = match fs::read_dir(&tmp) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e).context("failed to list CAS tmp directory"),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let age = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| modified.elapsed().ok());
            // Unknown or future mtimes count as fresh; a writer may own them.
            if age.map_or(true, |age| age < grace) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    trace!(path = %entry.path().display(), "partial write removed");
                    removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e).context("failed to remove partial write"),
            }
        }
        if removed > 0 {
            debug!(removed, "swept abandoned partial writes");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn test_put_and_retrieve() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;

        let hash = store.store(b"Hello, World!")?;
        assert_eq!(store.retrieve(&hash)?.as_deref(), Some(&b"Hello, World!"[..]));
        assert!(store.object_path(&hash).starts_with(temp_dir.path().join("objects")));

        Ok(())
    }

    #[test]
    fn test_put_is_insert_if_absent() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;

        let hash = ContentHash::from_data(b"dedup me");
        assert!(store.put(&hash, b"dedup me")?);
        assert!(!store.put(&hash, b"dedup me")?);
        assert_eq!(store.hashes()?, vec![hash]);

        Ok(())
    }

    #[test]
    fn test_retrieve_missing_is_none() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;

        let missing: ContentHash = "00000000000000000000000000000000".parse()?;
        assert!(store.retrieve(&missing)?.is_none());
        assert!(!store.exists(&missing));

        Ok(())
    }

    #[test]
    fn test_delete() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;

        let hash = store.store(b"short lived")?;
        assert!(store.delete(&hash)?);
        assert!(!store.exists(&hash));
        assert!(!store.delete(&hash)?);

        Ok(())
    }

    #[test]
    fn test_hashes_skips_foreign_files() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;

        let a = store.store(b"a")?;
        let b = store.store(b"b")?;
        fs::write(temp_dir.path().join("objects").join("README"), "not a blob")?;
        fs::write(temp_dir.path().join("tmp").join("left.over"), "partial")?;

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(store.hashes()?, expected);

        Ok(())
    }

    #[test]
    fn test_read_only_rejects_writes_and_deletes() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let hash = FileStore::at_path(temp_dir.path())?.store(b"keep me")?;

        let readonly = FileStore::read_only_at(temp_dir.path())?;
        let err = readonly.store(b"nope").unwrap_err();
        assert!(err.to_string().contains("read-only"));
        assert!(readonly.delete(&hash).is_err());
        assert_eq!(readonly.retrieve(&hash)?.as_deref(), Some(&b"keep me"[..]));

        Ok(())
    }

    #[test]
    fn test_sweep_partial_respects_grace() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;
        let kept = store.store(b"sealed")?;
        fs::write(temp_dir.path().join("tmp").join("crashed.write"), "partial")?;

        assert_eq!(store.sweep_partial(Duration::from_secs(3600))?, 0);
        assert_eq!(store.sweep_partial(Duration::ZERO)?, 1);
        assert_eq!(fs::read_dir(temp_dir.path().join("tmp"))?.count(), 0);
        assert!(store.exists(&kept));

        Ok(())
    }

    #[test]
    fn test_lock_is_shared_across_store_handles() -> Result<()> {
        use std::sync::atomic::{AtomicBool, Ordering};

        let temp_dir = TempDir::new()?;
        let collector = FileStore::at_path(temp_dir.path())?;
        let writer = FileStore::at_path(temp_dir.path())?;
        let hash = ContentHash::from_data(b"contended");
        assert_eq!(collector.lock_path(&hash), writer.lock_path(&hash));

        let released = Arc::new(AtomicBool::new(false));
        let exclusive = collector.lock(&hash, LockMode::Exclusive)?;
        assert!(exclusive.is_some());

        let waiter = {
            let released = released.clone();
            let hash = hash.clone();
            thread::spawn(move || {
                let _shared = writer.lock(&hash, LockMode::Shared).expect("lock failed");
                assert!(released.load(Ordering::SeqCst));
            })
        };
        thread::sleep(Duration::from_millis(30));
        released.store(true, Ordering::SeqCst);
        drop(exclusive);
        waiter.join().unwrap();

        assert!(FileStore::read_only_at(temp_dir.path())?
            .lock(&hash, LockMode::Shared)?
            .is_none());

        Ok(())
    }

    #[test]
    fn test_concurrent_puts_of_same_content() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = Arc::new(FileStore::at_path(temp_dir.path())?);
        let expected: ContentHash = "5c735d76fe3537a0f35cf4a4eb14a532".parse()?;

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || store.store(b"Concurrent Data").expect("write failed"))
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
        assert_eq!(store.hashes()?, vec![expected.clone()]);
        assert_eq!(store.retrieve(&expected)?.as_deref(), Some(&b"Concurrent Data"[..]));

        Ok(())
    }
}
