use anyhow::Result;

use super::ReferenceExtractor;
use crate::asset::AssetData;
use crate::id::AssetId;

const UUID_LEN: usize = 36;
const DASHES: [usize; 4] = [8, 13, 18, 23];

/// Finds every hyphenated UUID written out in a payload.
///
/// Works on raw bytes, so binary junk around the text is harmless. Hex runs
/// longer than a UUID are not split into one.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextUuidExtractor;

impl ReferenceExtractor for TextUuidExtractor {
    fn extract(&self, asset: &AssetData) -> Result<Vec<AssetId>> {
        Ok(scan_uuids(&asset.data))
    }
}

pub(crate) fn scan_uuids(bytes: &[u8]) -> Vec<AssetId> {
    let mut found = Vec::new();
    if bytes.len() < UUID_LEN {
        return found;
    }

    let mut i = 0;
    while i + UUID_LEN <= bytes.len() {
        let window = &bytes[i..i + UUID_LEN];
        let bounded_left = i == 0 || !is_id_byte(bytes[i - 1]);
        let bounded_right = i + UUID_LEN == bytes.len() || !is_id_byte(bytes[i + UUID_LEN]);

        if bounded_left && bounded_right && looks_like_uuid(window) {
            if let Some(id) = std::str::from_utf8(window).ok().and_then(|s| s.parse().ok()) {
                found.push(id);
                i += UUID_LEN;
                continue;
            }
        }
        i += 1;
    }
    found
}

fn is_id_byte(b: u8) -> bool {
    b.is_ascii_hexdigit() || b == b'-'
}

fn looks_like_uuid(window: &[u8]) -> bool {
    window.iter().enumerate().all(|(pos, b)| {
        if DASHES.contains(&pos) {
            *b == b'-'
        } else {
            b.is_ascii_hexdigit()
        }
    })
}
