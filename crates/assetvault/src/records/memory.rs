use anyhow::{anyhow, Result};
use cas::ContentHash;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use super::{InsertOutcome, RecordStore};
use crate::asset::AssetRecord;
use crate::id::AssetId;

/// In-memory record store.
///
/// Every operation holds the map lock for its full duration, which gives the
/// same single-operation atomicity a database would.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<AssetId, AssetRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> anyhow::Error {
    anyhow!("memory record store lock poisoned")
}

/// Only processed records carry an authoritative reference set.
fn referenced_elsewhere(records: &HashMap<AssetId, AssetRecord>, id: AssetId) -> bool {
    records
        .values()
        .any(|r| r.processed && r.id() != id && r.references.contains(&id))
}

impl RecordStore for MemoryRecordStore {
    fn get(&self, id: AssetId) -> Result<Option<AssetRecord>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(&id).cloned())
    }

    fn existing(&self, ids: &[AssetId]) -> Result<HashSet<AssetId>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(ids
            .iter()
            .filter(|id| records.contains_key(id))
            .copied()
            .collect())
    }

    fn insert(&self, record: &AssetRecord) -> Result<InsertOutcome> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        if records.contains_key(&record.id()) {
            return Ok(InsertOutcome::Duplicate);
        }
        records.insert(record.id(), record.clone());
        Ok(InsertOutcome::Inserted)
    }

    fn replace(&self, record: &AssetRecord) -> Result<bool> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        match records.get_mut(&record.id()) {
            Some(existing) => {
                *existing = record.clone();
                if !existing.processed {
                    existing.references.clear();
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete(&self, id: AssetId) -> Result<Option<ContentHash>> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        Ok(records.remove(&id).map(|r| r.content_hash))
    }

    fn set_references(&self, id: AssetId, references: &[AssetId]) -> Result<bool> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        match records.get_mut(&id) {
            Some(record) => {
                record.references = references.to_vec();
                record.processed = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn touch(&self, ids: &[AssetId], access_time: i64) -> Result<usize> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        let mut updated = 0;
        for id in ids {
            if let Some(record) = records.get_mut(id) {
                record.metadata.access_time = access_time;
                updated += 1;
            }
        }
        Ok(updated)
    }

    fn stale_processed(&self, cutoff: i64) -> Result<Vec<AssetId>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        let mut stale: Vec<_> = records
            .values()
            .filter(|r| r.processed && r.metadata.access_time < cutoff)
            .map(|r| (r.metadata.access_time, r.id()))
            .collect();
        stale.sort();
        Ok(stale.into_iter().map(|(_, id)| id).collect())
    }

    fn referenced_by_other(&self, id: AssetId) -> Result<bool> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(referenced_elsewhere(&records, id))
    }

    fn delete_if_collectable(&self, id: AssetId, cutoff: i64) -> Result<Option<ContentHash>> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        let collectable = match records.get(&id) {
            Some(r) => r.processed && r.metadata.access_time < cutoff,
            None => false,
        };
        if !collectable || referenced_elsewhere(&records, id) {
            return Ok(None);
        }
        Ok(records.remove(&id).map(|r| r.content_hash))
    }

    fn has_hash(&self, hash: &ContentHash) -> Result<bool> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.values().any(|r| &r.content_hash == hash))
    }

    fn unprocessed(&self) -> Result<Vec<AssetId>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        let mut ids: Vec<_> = records
            .values()
            .filter(|r| !r.processed)
            .map(|r| r.id())
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn count(&self) -> Result<usize> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.len())
    }

    fn location(&self) -> String {
        format!("memory:{:p}", self)
    }
}
