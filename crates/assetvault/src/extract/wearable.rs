use anyhow::Result;

use super::ReferenceExtractor;
use crate::asset::AssetData;
use crate::id::AssetId;

/// Reads the `textures N` block of a wearable (clothing or body part).
///
/// ```text
/// LLWearable version 22
/// Shirt
///     permissions 0
///     { ... creator_id / owner_id ... }
/// type 4
/// parameters 1
/// 781 0.5
/// textures 2
/// 1 5748decc-f629-461c-9a36-a35a221fe21f
/// 5 c228d1cf-4b5d-4ba8-84f4-899a0796aa97
/// ```
///
/// Only the texture entries are references; the permission block names
/// agents, not assets. Malformed lines are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct WearableExtractor;

impl ReferenceExtractor for WearableExtractor {
    fn extract(&self, asset: &AssetData) -> Result<Vec<AssetId>> {
        let text = String::from_utf8_lossy(&asset.data);
        let mut lines = text.lines().map(str::trim);
        let mut textures = Vec::new();

        while let Some(line) = lines.next() {
            let mut parts = line.split_whitespace();
            if parts.next() != Some("textures") {
                continue;
            }
            let count: usize = parts.next().and_then(|n| n.parse().ok()).unwrap_or(0);

            for entry in lines.by_ref().take(count) {
                let mut fields = entry.split_whitespace();
                let _index = fields.next();
                if let Some(id) = fields.next().and_then(|f| f.parse::<AssetId>().ok()) {
                    textures.push(id);
                }
            }
            break;
        }

        Ok(textures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::AssetType;

    fn wearable(body: String) -> AssetData {
        AssetData::new(AssetType::Clothing, "shirt", body.into_bytes())
    }

    #[test]
    fn test_reads_texture_block_only() {
        let creator = AssetId::new();
        let t1 = AssetId::new();
        let t2 = AssetId::new();
        let body = format!(
            "LLWearable version 22\nShirt\n\n\tpermissions 0\n\t{{\n\t\tcreator_id\t{creator}\n\t}}\n\
             type 4\nparameters 1\n781 0.5\ntextures 2\n1 {t1}\n5 {t2}\n"
        );

        assert_eq!(WearableExtractor.extract(&wearable(body)).unwrap(), vec![t1, t2]);
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let t1 = AssetId::new();
        let body = format!("LLWearable version 22\ntextures 3\n0 not-a-uuid\n1 {t1}\n");
        assert_eq!(WearableExtractor.extract(&wearable(body)).unwrap(), vec![t1]);
    }

    #[test]
    fn test_missing_block_is_empty() {
        let body = "LLWearable version 22\nparameters 0\n".to_string();
        assert!(WearableExtractor.extract(&wearable(body)).unwrap().is_empty());
    }
}
