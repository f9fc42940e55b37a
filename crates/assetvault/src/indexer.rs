//! Reference indexing: decode a stored asset and persist what it points at.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::asset::AssetData;
use crate::error::{AssetError, AssetResult};
use crate::extract::ExtractorRegistry;
use crate::id::AssetId;
use crate::loader::AssetLoader;
use crate::queue::{ProcessOutcome, QueueProcessor};
use crate::records::RecordStore;

pub struct ReferenceIndexer {
    loader: AssetLoader,
    records: Arc<dyn RecordStore>,
    extractors: Arc<ExtractorRegistry>,
}

impl ReferenceIndexer {
    pub fn new(
        loader: AssetLoader,
        records: Arc<dyn RecordStore>,
        extractors: Arc<ExtractorRegistry>,
    ) -> Self {
        Self {
            loader,
            records,
            extractors,
        }
    }

    /// Extract the reference set of `asset` and write it to its record,
    /// marking the record processed. Running it again on the same payload
    /// writes the same set.
    ///
    /// Extraction and write failures come back as transient errors. A record
    /// deleted while it was being indexed comes back as `NotFound`.
    pub fn extract_and_store(&self, asset: &AssetData) -> AssetResult<Vec<AssetId>> {
        let id = asset.id();
        let references = self.extractors.extract(asset)?;

        if !self.records.set_references(id, &references)? {
            return Err(AssetError::NotFound(id));
        }

        debug!(
            asset.id = %id,
            asset.kind = %asset.asset_type(),
            references = references.len(),
            "references indexed"
        );
        Ok(references)
    }
}

impl QueueProcessor for ReferenceIndexer {
    fn process(&self, id: AssetId) -> ProcessOutcome {
        let asset = match self.loader.load(id) {
            Ok(asset) => asset,
            Err(e) => {
                debug!(asset.id = %id, error = %e, "dropping unloadable asset");
                return ProcessOutcome::Dropped;
            }
        };

        match self.extract_and_store(&asset) {
            Ok(_) => ProcessOutcome::Indexed,
            Err(e) if e.is_transient() => {
                warn!(asset.id = %id, error = %e, "reference indexing failed, requeueing");
                ProcessOutcome::Retry
            }
            Err(e) => {
                debug!(asset.id = %id, error = %e, "asset gone during indexing");
                ProcessOutcome::Dropped
            }
        }
    }
}
