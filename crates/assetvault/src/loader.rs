use cas::BlobStore;
use std::sync::Arc;

use crate::asset::{AssetData, AssetRecord};
use crate::error::{AssetError, AssetResult};
use crate::id::AssetId;
use crate::records::RecordStore;

/// Joins a record with its payload blob.
#[derive(Clone)]
pub struct AssetLoader {
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
}

impl AssetLoader {
    pub fn new(records: Arc<dyn RecordStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { records, blobs }
    }

    pub fn record(&self, id: AssetId) -> AssetResult<AssetRecord> {
        self.records.get(id)?.ok_or(AssetError::NotFound(id))
    }

    pub fn load(&self, id: AssetId) -> AssetResult<AssetData> {
        let record = self.record(id)?;
        self.load_record(record)
    }

    pub fn load_record(&self, record: AssetRecord) -> AssetResult<AssetData> {
        let data = self.payload(&record)?;
        Ok(AssetData {
            metadata: record.metadata,
            data,
        })
    }

    pub fn payload(&self, record: &AssetRecord) -> AssetResult<Vec<u8>> {
        self.blobs
            .retrieve(&record.content_hash)?
            .ok_or_else(|| AssetError::DataMissing {
                id: record.id(),
                hash: record.content_hash.clone(),
            })
    }
}
