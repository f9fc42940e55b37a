//! Payload decoding: which other assets does this asset embed?
//!
//! Extraction is keyed by [`AssetType`]. Each type maps to at most one
//! [`ReferenceExtractor`]; types with no entry embed nothing.

mod text;
mod wearable;

pub use text::TextUuidExtractor;
pub use wearable::WearableExtractor;

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;

use crate::asset::{AssetData, AssetType};
use crate::id::AssetId;

/// Decodes one payload format into the asset ids it mentions.
pub trait ReferenceExtractor: Send + Sync {
    fn extract(&self, asset: &AssetData) -> Result<Vec<AssetId>>;
}

impl<F> ReferenceExtractor for F
where
    F: Fn(&AssetData) -> Result<Vec<AssetId>> + Send + Sync,
{
    fn extract(&self, asset: &AssetData) -> Result<Vec<AssetId>> {
        self(asset)
    }
}

/// Lookup table from asset type to extractor.
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    extractors: HashMap<AssetType, Arc<dyn ReferenceExtractor>>,
}

impl ExtractorRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the built-in decoders.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();

        let wearable: Arc<dyn ReferenceExtractor> = Arc::new(WearableExtractor);
        registry.register_shared(AssetType::Clothing, wearable.clone());
        registry.register_shared(AssetType::Bodypart, wearable);

        let text: Arc<dyn ReferenceExtractor> = Arc::new(TextUuidExtractor);
        for kind in [
            AssetType::Object,
            AssetType::Notecard,
            AssetType::Gesture,
            AssetType::Material,
            AssetType::Settings,
            AssetType::LslText,
        ] {
            registry.register_shared(kind, text.clone());
        }

        registry
    }

    /// Install or replace the extractor for `kind`.
    pub fn register(&mut self, kind: AssetType, extractor: impl ReferenceExtractor + 'static) {
        self.register_shared(kind, Arc::new(extractor));
    }

    pub fn register_shared(&mut self, kind: AssetType, extractor: Arc<dyn ReferenceExtractor>) {
        self.extractors.insert(kind, extractor);
    }

    pub fn handles(&self, kind: AssetType) -> bool {
        self.extractors.contains_key(&kind)
    }

    /// Extract the reference set of `asset`: sorted, without duplicates,
    /// never containing the asset itself or the nil id.
    pub fn extract(&self, asset: &AssetData) -> Result<Vec<AssetId>> {
        let Some(extractor) = self.extractors.get(&asset.asset_type()) else {
            return Ok(Vec::new());
        };

        let own = asset.id();
        let mut references: Vec<AssetId> = extractor
            .extract(asset)?
            .into_iter()
            .filter(|id| *id != own && !id.is_nil())
            .collect();
        references.sort();
        references.dedup();
        Ok(references)
    }
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.extractors.keys().map(|k| k.code()).collect();
        kinds.sort();
        f.debug_struct("ExtractorRegistry")
            .field("types", &kinds)
            .finish()
    }
}
