//! The asset service: store, read, mark, and purge over one record store
//! and one blob store.

use anyhow::Context;
use cas::{BlobStore, ContentHash, FileStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use vaultconf::VaultConfig;

use crate::asset::{unix_now, AssetData, AssetMetadata, AssetRecord};
use crate::error::{AssetError, AssetResult};
use crate::extract::ExtractorRegistry;
use crate::id::AssetId;
use crate::indexer::ReferenceIndexer;
use crate::loader::AssetLoader;
use crate::locks::HashLocks;
use crate::purge::{GarbageCollector, PurgeSummary};
use crate::queue::{ProcessingQueue, QueueStat, REFERENCE_QUEUE_NAME};
use crate::records::{InsertOutcome, RecordStore, SqliteRecordStore};

/// Tunables for an [`AssetService`].
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Records idle this long become purge candidates.
    pub retention: Duration,
    /// Queue worker shutdown delay.
    pub idle_timeout: Duration,
    pub full_blob_scan: bool,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(2 * 24 * 3600),
            idle_timeout: Duration::from_secs(1),
            full_blob_scan: false,
        }
    }
}

impl ServiceOptions {
    pub fn from_config(config: &VaultConfig) -> Self {
        Self {
            retention: config.gc.retention(),
            idle_timeout: config.queue.idle_timeout(),
            full_blob_scan: config.gc.full_blob_scan,
        }
    }
}

pub struct AssetService {
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    loader: AssetLoader,
    extractors: Arc<ExtractorRegistry>,
    locks: Arc<HashLocks>,
    queue: ProcessingQueue,
    collector: Arc<GarbageCollector>,
    retention: Duration,
}

impl AssetService {
    /// Service with default options and the built-in extractors. Must be
    /// called inside a tokio runtime.
    pub fn new(records: Arc<dyn RecordStore>, blobs: Arc<dyn BlobStore>) -> anyhow::Result<Self> {
        Self::with_options(
            records,
            blobs,
            ExtractorRegistry::with_defaults(),
            ServiceOptions::default(),
        )
    }

    pub fn with_options(
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        extractors: ExtractorRegistry,
        options: ServiceOptions,
    ) -> anyhow::Result<Self> {
        let extractors = Arc::new(extractors);
        let locks = Arc::new(HashLocks::over(blobs.clone()));
        let loader = AssetLoader::new(records.clone(), blobs.clone());

        let indexer = ReferenceIndexer::new(loader.clone(), records.clone(), extractors.clone());
        let queue =
            ProcessingQueue::new(REFERENCE_QUEUE_NAME, Arc::new(indexer), options.idle_timeout)?;

        let collector = Arc::new(
            GarbageCollector::new(records.clone(), blobs.clone(), locks.clone())
                .with_full_blob_scan(options.full_blob_scan),
        );

        Ok(Self {
            records,
            blobs,
            loader,
            extractors,
            locks,
            queue,
            collector,
            retention: options.retention,
        })
    }

    /// Open the on-disk vault described by `config`: a SQLite record index
    /// and a sharded blob directory.
    pub fn open(config: &VaultConfig) -> anyhow::Result<Self> {
        let records_path = config.paths.records_db();
        let cas_path = config.paths.cas_dir();

        let records = SqliteRecordStore::open(&records_path)
            .with_context(|| format!("opening record index at {}", records_path.display()))?;
        let blobs = FileStore::at_path(&cas_path)
            .with_context(|| format!("opening blob store at {}", cas_path.display()))?;

        info!(
            records = %records_path.display(),
            cas = %cas_path.display(),
            "asset vault opened"
        );

        Self::with_options(
            Arc::new(records),
            Arc::new(blobs),
            ExtractorRegistry::with_defaults(),
            ServiceOptions::from_config(config),
        )
    }

    /// Persist an asset and queue it for reference indexing.
    ///
    /// The blob goes in first. If the record insert then fails, the blob is
    /// left for the next purge to reclaim. A second store under an existing
    /// id fails with [`AssetError::StoreFailed`].
    pub fn store(&self, asset: &AssetData) -> AssetResult<ContentHash> {
        let id = asset.id();
        let hash = ContentHash::from_data(&asset.data);
        let record = AssetRecord::unprocessed(asset, hash.clone());

        {
            let _guard = self.locks.read(&hash)?;
            let new_blob = self.blobs.put(&hash, &asset.data)?;

            let outcome = match self.records.insert(&record) {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.collector.defer(hash);
                    return Err(e.into());
                }
            };
            if outcome == InsertOutcome::Duplicate {
                if new_blob {
                    self.collector.defer(hash);
                }
                return Err(AssetError::StoreFailed(id));
            }
        }

        self.queue.enqueue(id);
        debug!(asset.id = %id, %hash, size = asset.data.len(), "asset stored");
        Ok(hash)
    }

    pub fn get(&self, id: AssetId) -> AssetResult<AssetData> {
        self.loader.load(id)
    }

    /// Like [`get`](Self::get), with a missing record as `None`.
    pub fn try_get(&self, id: AssetId) -> AssetResult<Option<AssetData>> {
        match self.loader.load(id) {
            Ok(asset) => Ok(Some(asset)),
            Err(AssetError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn metadata(&self, id: AssetId) -> AssetResult<AssetMetadata> {
        Ok(self.loader.record(id)?.metadata)
    }

    pub fn data(&self, id: AssetId) -> AssetResult<Vec<u8>> {
        let record = self.loader.record(id)?;
        self.loader.payload(&record)
    }

    pub fn record(&self, id: AssetId) -> AssetResult<AssetRecord> {
        self.loader.record(id)
    }

    pub fn exists(&self, id: AssetId) -> AssetResult<bool> {
        Ok(self.records.get(id)?.is_some())
    }

    pub fn exists_many(&self, ids: &[AssetId]) -> AssetResult<HashMap<AssetId, bool>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let found = self.records.existing(ids)?;
        Ok(ids.iter().map(|id| (*id, found.contains(id))).collect())
    }

    /// Remove a record. The payload stays until a purge finds no other
    /// record using it.
    pub fn delete(&self, id: AssetId) -> AssetResult<bool> {
        match self.records.delete(id)? {
            Some(hash) => {
                debug!(asset.id = %id, %hash, "asset deleted");
                self.collector.defer(hash);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Ids embedded in an asset. Uses the stored set once indexed, otherwise
    /// decodes the payload now.
    pub fn references(&self, id: AssetId) -> AssetResult<Vec<AssetId>> {
        let record = self.loader.record(id)?;
        if record.processed {
            return Ok(record.references);
        }
        let asset = self.loader.load_record(record)?;
        Ok(self.extractors.extract(&asset)?)
    }

    /// Does another record list `id` among its references?
    pub fn is_referenced(&self, id: AssetId) -> AssetResult<bool> {
        Ok(self.records.referenced_by_other(id)?)
    }

    pub fn unprocessed_assets(&self) -> AssetResult<Vec<AssetId>> {
        Ok(self.records.unprocessed()?)
    }

    /// Queue every unprocessed record again, e.g. after a restart dropped
    /// the in-memory queue.
    pub fn requeue_unprocessed(&self) -> AssetResult<usize> {
        let pending = self.records.unprocessed()?;
        for id in &pending {
            self.queue.enqueue(*id);
        }
        if !pending.is_empty() {
            info!(count = pending.len(), "requeued unprocessed assets");
        }
        Ok(pending.len())
    }

    /// Bump `access_time` to now on each listed asset. Returns how many
    /// records were updated.
    pub fn mark_asset_as_used(&self, ids: &[AssetId]) -> AssetResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        Ok(self.records.touch(ids, unix_now())?)
    }

    /// Purge with the configured retention window.
    pub fn purge_unused_assets(&self) -> AssetResult<PurgeSummary> {
        self.collector.purge_with_retention(self.retention)
    }

    /// Purge everything last accessed before `cutoff` (unix seconds).
    pub fn purge_with(&self, cutoff: i64) -> AssetResult<PurgeSummary> {
        self.collector.purge_accessed_before(cutoff)
    }

    pub fn queue_stats(&self) -> QueueStat {
        self.queue.stats()
    }

    /// Wait for the indexing queue to empty.
    pub async fn wait_indexed(&self, timeout: Duration) -> bool {
        self.queue.wait_drained(timeout).await
    }

    pub fn is_same_store(&self, other: &AssetService) -> bool {
        self.records.location() == other.records.location()
    }

    pub fn collector(&self) -> Arc<GarbageCollector> {
        self.collector.clone()
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn record_count(&self) -> AssetResult<usize> {
        Ok(self.records.count()?)
    }

    pub fn blob_count(&self) -> AssetResult<usize> {
        Ok(self.blobs.hashes()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::AssetType;
    use crate::records::MemoryRecordStore;
    use cas::MemoryStore;

    fn service() -> (AssetService, Arc<MemoryRecordStore>, Arc<MemoryStore>) {
        let records = Arc::new(MemoryRecordStore::new());
        let blobs = Arc::new(MemoryStore::new());
        let options = ServiceOptions {
            idle_timeout: Duration::from_millis(50),
            ..ServiceOptions::default()
        };
        let svc = AssetService::with_options(
            records.clone(),
            blobs.clone(),
            ExtractorRegistry::with_defaults(),
            options,
        )
        .unwrap();
        (svc, records, blobs)
    }

    #[tokio::test]
    async fn test_store_then_index() {
        let (svc, _records, _blobs) = service();
        let y = AssetId::new();
        let z = AssetId::new();
        let x = AssetData::new(AssetType::Notecard, "x", format!("see {y} and {z}").into_bytes());

        svc.store(&x).unwrap();
        assert!(!svc.record(x.id()).unwrap().processed);
        // Unindexed: decoded on demand.
        let mut expected = vec![y, z];
        expected.sort();
        assert_eq!(svc.references(x.id()).unwrap(), expected);

        assert!(svc.wait_indexed(Duration::from_secs(5)).await);
        let record = svc.record(x.id()).unwrap();
        assert!(record.processed);
        assert_eq!(record.references, expected);
        assert_eq!(svc.queue_stats().processed, 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected() {
        let (svc, _records, blobs) = service();
        let first = AssetData::new(AssetType::Texture, "t", b"one".to_vec());
        svc.store(&first).unwrap();

        let clash = AssetData::new(AssetType::Texture, "t", b"two".to_vec()).with_id(first.id());
        let err = svc.store(&clash).unwrap_err();
        assert!(matches!(err, AssetError::StoreFailed(id) if id == first.id()));
        assert_eq!(svc.data(first.id()).unwrap(), b"one");

        // The stray blob is reclaimed by the next purge.
        assert_eq!(blobs.len(), 2);
        let summary = svc.purge_with(0).unwrap();
        assert_eq!(summary.blobs_purged, 1);
        assert_eq!(blobs.len(), 1);
    }

    #[tokio::test]
    async fn test_exists_and_try_get() {
        let (svc, _records, _blobs) = service();
        let a = AssetData::new(AssetType::Sound, "a", b"a".to_vec());
        svc.store(&a).unwrap();
        let missing = AssetId::new();

        assert!(svc.exists(a.id()).unwrap());
        assert!(!svc.exists(missing).unwrap());
        assert!(svc.exists_many(&[]).unwrap().is_empty());

        let map = svc.exists_many(&[a.id(), missing]).unwrap();
        assert_eq!(map.get(&a.id()), Some(&true));
        assert_eq!(map.get(&missing), Some(&false));

        assert!(svc.try_get(missing).unwrap().is_none());
        assert!(matches!(svc.get(missing), Err(AssetError::NotFound(_))));
        assert_eq!(svc.try_get(a.id()).unwrap().unwrap().data, b"a");
    }

    #[tokio::test]
    async fn test_missing_payload_is_reported() {
        let (svc, _records, blobs) = service();
        let a = AssetData::new(AssetType::Sound, "a", b"vanishing".to_vec());
        let hash = svc.store(&a).unwrap();
        blobs.delete(&hash).unwrap();

        assert!(matches!(svc.get(a.id()), Err(AssetError::DataMissing { .. })));
        assert!(svc.metadata(a.id()).is_ok());
    }

    #[tokio::test]
    async fn test_mark_keeps_assets_alive() {
        let (svc, records, _blobs) = service();
        let a = AssetData::new(AssetType::Texture, "a", b"a".to_vec()).with_access_time(10);
        svc.store(&a).unwrap();
        assert!(svc.wait_indexed(Duration::from_secs(5)).await);

        assert_eq!(svc.mark_asset_as_used(&[]).unwrap(), 0);
        assert_eq!(svc.mark_asset_as_used(&[a.id(), AssetId::new()]).unwrap(), 1);
        assert!(records.get(a.id()).unwrap().unwrap().metadata.access_time > 10);

        let summary = svc.purge_unused_assets().unwrap();
        assert_eq!(summary.records_purged, 0);
        assert!(svc.exists(a.id()).unwrap());
    }

    #[tokio::test]
    async fn test_delete_defers_blob_reclaim() {
        let (svc, _records, blobs) = service();
        let a = AssetData::new(AssetType::Texture, "a", b"payload".to_vec());
        let hash = svc.store(&a).unwrap();

        assert!(svc.delete(a.id()).unwrap());
        assert!(!svc.delete(a.id()).unwrap());
        assert!(blobs.exists(&hash));

        svc.purge_unused_assets().unwrap();
        assert!(!blobs.exists(&hash));
    }

    #[tokio::test]
    async fn test_requeue_unprocessed() {
        let (svc, records, blobs) = service();
        // Written behind the service's back, as a restart would leave it.
        let a = AssetData::new(AssetType::Notecard, "a", b"plain".to_vec());
        let hash = blobs.store(&a.data).unwrap();
        records.insert(&AssetRecord::unprocessed(&a, hash)).unwrap();
        assert_eq!(svc.unprocessed_assets().unwrap(), vec![a.id()]);

        assert_eq!(svc.requeue_unprocessed().unwrap(), 1);
        assert!(svc.wait_indexed(Duration::from_secs(5)).await);
        assert!(svc.unprocessed_assets().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_is_same_store() {
        let records: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new());
        let blobs: Arc<dyn BlobStore> = Arc::new(MemoryStore::new());
        let a = AssetService::new(records.clone(), blobs.clone()).unwrap();
        let b = AssetService::new(records, blobs.clone()).unwrap();
        let (c, _, _) = service();

        assert!(a.is_same_store(&b));
        assert!(!a.is_same_store(&c));
    }
}
