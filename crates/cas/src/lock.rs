//! Advisory file locks that serialize blob writers against blob deleters
//! across processes sharing one store directory.
//!
//! One lock file per hash prefix lives under `{base_path}/locks/`. Writers
//! take it shared, the collector takes it exclusive. Locks are released when
//! the [`BlobLock`] is dropped.

use std::fs::{self, File, OpenOptions};
use std::path::Path;

use anyhow::{Context, Result};
use fs4::FileExt;

/// How a [`BlobLock`] is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Held by writers while a blob must not disappear under them.
    Shared,
    /// Held by the collector from its orphan check through the delete.
    Exclusive,
}

/// A held lock file. Dropping it releases the lock.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct BlobLock {
    _file: File,
}

impl BlobLock {
    /// Block until `path` is locked in `mode`, creating the file if needed.
    pub fn acquire(path: &Path, mode: LockMode) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create lock directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("failed to open lock file {}", path.display()))?;

        let locked = match mode {
            LockMode::Shared => file.lock_shared(),
            LockMode::Exclusive => file.lock_exclusive(),
        };
        locked.with_context(|| format!("failed to lock {}", path.display()))?;

        Ok(Self { _file: file })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_exclusive_blocks_shared_on_separate_handles() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("locks").join("ab.lock");
        let released = Arc::new(AtomicBool::new(false));

        let exclusive = BlobLock::acquire(&path, LockMode::Exclusive)?;
        let waiter = {
            let path = path.clone();
            let released = released.clone();
            thread::spawn(move || {
                let _shared = BlobLock::acquire(&path, LockMode::Shared).expect("lock failed");
                assert!(released.load(Ordering::SeqCst));
            })
        };

        thread::sleep(Duration::from_millis(30));
        released.store(true, Ordering::SeqCst);
        drop(exclusive);
        waiter.join().unwrap();

        Ok(())
    }

    #[test]
    fn test_shared_holders_coexist() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("cd.lock");
        let _a = BlobLock::acquire(&path, LockMode::Shared)?;
        let _b = BlobLock::acquire(&path, LockMode::Shared)?;
        Ok(())
    }
}
