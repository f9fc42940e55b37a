//! Record storage: asset id -> metadata, content hash, and reference index.
//!
//! The record store is the authority on liveness. Blob reclamation asks it
//! whether a hash is still in use, and the purge asks it whether an asset is
//! still referenced. Each method maps to one atomic operation in the
//! backend; callers add no locking of their own except around blob deletion.

mod memory;
mod sqlite;

pub use memory::MemoryRecordStore;
pub use sqlite::SqliteRecordStore;

use anyhow::Result;
use cas::ContentHash;
use std::collections::HashSet;

use crate::asset::AssetRecord;
use crate::id::AssetId;

/// Result of inserting a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A record with the same id already exists; nothing was written.
    Duplicate,
}

pub trait RecordStore: Send + Sync {
    fn get(&self, id: AssetId) -> Result<Option<AssetRecord>>;

    /// The subset of `ids` that have a record.
    fn existing(&self, ids: &[AssetId]) -> Result<HashSet<AssetId>>;

    fn insert(&self, record: &AssetRecord) -> Result<InsertOutcome>;

    /// Overwrite an existing record. Returns `false` if there was none.
    fn replace(&self, record: &AssetRecord) -> Result<bool>;

    /// Remove a record, returning the hash it pointed at.
    fn delete(&self, id: AssetId) -> Result<Option<ContentHash>>;

    /// Store an extracted reference set and flip `processed` on.
    /// Returns `false` if the record no longer exists.
    fn set_references(&self, id: AssetId, references: &[AssetId]) -> Result<bool>;

    /// Set `access_time` on every listed record that exists. Returns how many
    /// were updated.
    fn touch(&self, ids: &[AssetId], access_time: i64) -> Result<usize>;

    /// Ids of processed records with `access_time < cutoff`, oldest first.
    fn stale_processed(&self, cutoff: i64) -> Result<Vec<AssetId>>;

    /// Does any record other than `id` list `id` among its references?
    fn referenced_by_other(&self, id: AssetId) -> Result<bool>;

    /// Delete `id` only if it is processed, older than `cutoff`, and not
    /// referenced by any other record, all evaluated together with the
    /// delete. Returns the freed hash when the record was removed.
    fn delete_if_collectable(&self, id: AssetId, cutoff: i64) -> Result<Option<ContentHash>>;

    /// Does any record point at this payload?
    fn has_hash(&self, hash: &ContentHash) -> Result<bool>;

    /// Ids of records still waiting for reference extraction.
    fn unprocessed(&self) -> Result<Vec<AssetId>>;

    fn count(&self) -> Result<usize>;

    /// Identifies the backing storage. Two handles with the same location
    /// see the same records.
    fn location(&self) -> String;
}
