//! ContentHash: the deduplication key for asset payloads.
//!
//! A BLAKE3 digest truncated to 128 bits and rendered as 32 lowercase hex
//! characters. Every asset record carries one of these, and the blob store is
//! keyed by it, so two assets with byte-identical payloads share one blob.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of the hex form of a content hash.
pub const HASH_HEX_LEN: usize = 32;

/// A content hash - 128 bits (16 bytes, 32 hex chars) of BLAKE3.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

/// Errors that can occur when parsing content hashes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HashError {
    #[error("invalid hash length: expected {HASH_HEX_LEN} hex chars, got {0}")]
    InvalidLength(usize),

    #[error("invalid hex character in hash")]
    InvalidHex,
}

impl ContentHash {
    /// Hash a payload.
    pub fn from_data(data: &[u8]) -> Self {
        let digest = blake3::hash(data);
        Self(hex::encode(&digest.as_bytes()[..HASH_HEX_LEN / 2]))
    }

    /// Parse a stored hash string, normalising to lowercase.
    pub fn from_str_checked(s: &str) -> Result<Self, HashError> {
        if s.len() != HASH_HEX_LEN {
            return Err(HashError::InvalidLength(s.len()));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex);
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// First two hex characters, used as the shard directory.
    pub fn prefix(&self) -> &str {
        &self.0[..2]
    }

    /// Everything after the shard prefix, used as the file name.
    pub fn remainder(&self) -> &str {
        &self.0[2..]
    }

    /// Leading byte of the digest. Used to spread hashes over lock stripes.
    pub fn first_byte(&self) -> u8 {
        u8::from_str_radix(self.prefix(), 16).unwrap_or(0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_checked(s)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = HashError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_str_checked(&value)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
