//! Asset metadata, payloads, and the persisted record shape.

use cas::ContentHash;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::id::AssetId;

/// Longest name kept on a record; longer names are cut on store.
pub const NAME_MAX_CHARS: usize = 64;

/// Current wall clock as unix seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Asset kind. The integer codes are persisted and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum AssetType {
    Texture,
    Sound,
    CallingCard,
    Landmark,
    Clothing,
    Object,
    Notecard,
    LslText,
    LslBytecode,
    Bodypart,
    Animation,
    Gesture,
    Mesh,
    Settings,
    Material,
    Unknown(i32),
}

impl AssetType {
    pub fn code(self) -> i32 {
        match self {
            AssetType::Texture => 0,
            AssetType::Sound => 1,
            AssetType::CallingCard => 2,
            AssetType::Landmark => 3,
            AssetType::Clothing => 5,
            AssetType::Object => 6,
            AssetType::Notecard => 7,
            AssetType::LslText => 10,
            AssetType::LslBytecode => 11,
            AssetType::Bodypart => 13,
            AssetType::Animation => 20,
            AssetType::Gesture => 21,
            AssetType::Mesh => 49,
            AssetType::Settings => 56,
            AssetType::Material => 57,
            AssetType::Unknown(code) => code,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            0 => AssetType::Texture,
            1 => AssetType::Sound,
            2 => AssetType::CallingCard,
            3 => AssetType::Landmark,
            5 => AssetType::Clothing,
            6 => AssetType::Object,
            7 => AssetType::Notecard,
            10 => AssetType::LslText,
            11 => AssetType::LslBytecode,
            13 => AssetType::Bodypart,
            20 => AssetType::Animation,
            21 => AssetType::Gesture,
            49 => AssetType::Mesh,
            56 => AssetType::Settings,
            57 => AssetType::Material,
            other => AssetType::Unknown(other),
        }
    }

    /// Parse a CLI-style name (`notecard`, `lsl-text`) or a numeric code.
    pub fn parse_name(name: &str) -> Option<Self> {
        if let Ok(code) = name.parse::<i32>() {
            return Some(Self::from_code(code));
        }
        let kind = match name.to_ascii_lowercase().replace('_', "-").as_str() {
            "texture" => AssetType::Texture,
            "sound" => AssetType::Sound,
            "callingcard" | "calling-card" => AssetType::CallingCard,
            "landmark" => AssetType::Landmark,
            "clothing" => AssetType::Clothing,
            "object" => AssetType::Object,
            "notecard" => AssetType::Notecard,
            "lsltext" | "lsl-text" => AssetType::LslText,
            "lslbytecode" | "lsl-bytecode" => AssetType::LslBytecode,
            "bodypart" => AssetType::Bodypart,
            "animation" => AssetType::Animation,
            "gesture" => AssetType::Gesture,
            "mesh" => AssetType::Mesh,
            "settings" => AssetType::Settings,
            "material" => AssetType::Material,
            _ => return None,
        };
        Some(kind)
    }
}

impl From<i32> for AssetType {
    fn from(code: i32) -> Self {
        Self::from_code(code)
    }
}

impl From<AssetType> for i32 {
    fn from(kind: AssetType) -> Self {
        kind.code()
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetType::Unknown(code) => write!(f, "unknown({code})"),
            other => write!(f, "{}", format!("{other:?}").to_lowercase()),
        }
    }
}

/// Asset flag bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetFlags(pub u32);

impl AssetFlags {
    pub const NONE: AssetFlags = AssetFlags(0);
    pub const MAPTILE: AssetFlags = AssetFlags(1);
    pub const REWRITABLE: AssetFlags = AssetFlags(2);
    pub const COLLECTABLE: AssetFlags = AssetFlags(4);

    pub fn contains(self, other: AssetFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for AssetFlags {
    type Output = AssetFlags;

    fn bitor(self, rhs: AssetFlags) -> AssetFlags {
        AssetFlags(self.0 | rhs.0)
    }
}

/// Everything about an asset except its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetMetadata {
    pub id: AssetId,
    pub name: String,
    pub asset_type: AssetType,
    pub flags: AssetFlags,
    pub local: bool,
    pub temporary: bool,
    /// Unix seconds.
    pub create_time: i64,
    /// Unix seconds. Bumped by `mark_asset_as_used`.
    pub access_time: i64,
}

impl AssetMetadata {
    pub fn new(id: AssetId, asset_type: AssetType, name: impl Into<String>) -> Self {
        let now = unix_now();
        Self {
            id,
            name: name.into(),
            asset_type,
            flags: AssetFlags::NONE,
            local: false,
            temporary: false,
            create_time: now,
            access_time: now,
        }
    }
}

/// A materialized asset: metadata plus payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetData {
    pub metadata: AssetMetadata,
    pub data: Vec<u8>,
}

impl AssetData {
    /// New asset with a fresh id.
    pub fn new(asset_type: AssetType, name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            metadata: AssetMetadata::new(AssetId::new(), asset_type, name),
            data: data.into(),
        }
    }

    pub fn with_id(mut self, id: AssetId) -> Self {
        self.metadata.id = id;
        self
    }

    pub fn with_flags(mut self, flags: AssetFlags) -> Self {
        self.metadata.flags = flags;
        self
    }

    pub fn with_access_time(mut self, access_time: i64) -> Self {
        self.metadata.access_time = access_time;
        self
    }

    pub fn temporary(mut self, temporary: bool) -> Self {
        self.metadata.temporary = temporary;
        self
    }

    pub fn local(mut self, local: bool) -> Self {
        self.metadata.local = local;
        self
    }

    pub fn id(&self) -> AssetId {
        self.metadata.id
    }

    pub fn asset_type(&self) -> AssetType {
        self.metadata.asset_type
    }
}

/// One row per asset id: metadata, payload hash, and indexing state.
///
/// `references` is only meaningful once `processed` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub metadata: AssetMetadata,
    pub content_hash: ContentHash,
    pub references: Vec<AssetId>,
    pub processed: bool,
}

impl AssetRecord {
    /// Fresh, unprocessed record for a just-stored asset.
    pub fn unprocessed(asset: &AssetData, content_hash: ContentHash) -> Self {
        let mut metadata = asset.metadata.clone();
        metadata.name = trim_name(&metadata.name);
        Self {
            metadata,
            content_hash,
            references: Vec::new(),
            processed: false,
        }
    }

    pub fn id(&self) -> AssetId {
        self.metadata.id
    }
}

/// Cut a name to [`NAME_MAX_CHARS`] characters.
pub fn trim_name(name: &str) -> String {
    name.chars().take(NAME_MAX_CHARS).collect()
}
