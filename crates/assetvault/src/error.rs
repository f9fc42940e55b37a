use cas::ContentHash;
use thiserror::Error;

use crate::id::AssetId;

/// Errors surfaced by the asset vault.
#[derive(Debug, Error)]
pub enum AssetError {
    /// No record exists for this id.
    #[error("asset {0} not found")]
    NotFound(AssetId),

    /// The record exists but its payload blob is gone.
    #[error("asset {id} is missing its payload {hash}")]
    DataMissing { id: AssetId, hash: ContentHash },

    /// A record with this id already exists. Assets are immutable.
    #[error("failed to store asset {0}: id already in use")]
    StoreFailed(AssetId),

    /// Backend I/O or query failure. Worth retrying.
    #[error("asset store failure: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl AssetError {
    /// Backend failures may succeed on retry; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(self, AssetError::Store(_))
    }
}

pub type AssetResult<T> = std::result::Result<T, AssetError>;
