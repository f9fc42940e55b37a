//! Blob store configuration.
//!
//! Layout under `base_path`:
//! - `objects/` sealed payloads, sharded by hash prefix
//! - `tmp/` partially written payloads awaiting an atomic rename
//! - `locks/` per-prefix lock files shared by every process using the store

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for a filesystem blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasConfig {
    /// Root directory of the store.
    pub base_path: PathBuf,

    /// Reject writes and deletes. Readers that share a store with a writer
    /// process (e.g. an inspection tool) open it this way.
    #[serde(default)]
    pub read_only: bool,
}

impl CasConfig {
    /// Writable store rooted at `path`.
    pub fn with_base_path(path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: path.into(),
            read_only: false,
        }
    }

    /// Read-only store rooted at `path`.
    pub fn read_only(path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: path.into(),
            read_only: true,
        }
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.base_path.join("objects")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.base_path.join("tmp")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.base_path.join("locks")
    }
}
