//! End-to-end collection tests over the on-disk backends.
//!
//! These tests verify:
//! - Stored assets are indexed once the queue drains
//! - Identical payloads share one blob until the last record goes
//! - Stale, unreferenced assets are purged; everything else survives
//! - A store racing a purge never loses its payload, even from another
//!   service opened on the same directory
//! - State survives reopening the vault

use anyhow::Result;
use assetvault::{AssetData, AssetId, AssetService, AssetType, ServiceOptions};
use assetvault::{ExtractorRegistry, SqliteRecordStore};
use cas::{BlobStore, ContentHash, FileStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const DRAIN: Duration = Duration::from_secs(10);

fn open_at(dir: &Path) -> Result<(AssetService, Arc<FileStore>)> {
    let records = Arc::new(SqliteRecordStore::open(dir.join("records.sqlite"))?);
    let blobs = Arc::new(FileStore::at_path(dir.join("cas"))?);
    let options = ServiceOptions {
        idle_timeout: Duration::from_millis(50),
        ..ServiceOptions::default()
    };
    let service = AssetService::with_options(
        records,
        blobs.clone(),
        ExtractorRegistry::with_defaults(),
        options,
    )?;
    Ok((service, blobs))
}

fn test_vault() -> Result<(AssetService, Arc<FileStore>, TempDir)> {
    let temp_dir = TempDir::new()?;
    let (service, blobs) = open_at(temp_dir.path())?;
    Ok((service, blobs, temp_dir))
}

/// An asset last touched long before any realistic cutoff.
fn ancient(kind: AssetType, payload: impl Into<Vec<u8>>) -> AssetData {
    AssetData::new(kind, "ancient", payload).with_access_time(1_000)
}

const CUTOFF: i64 = 10_000;

#[tokio::test]
async fn test_references_appear_after_drain() -> Result<()> {
    let (svc, _blobs, _temp) = test_vault()?;
    let y = AssetId::new();
    let z = AssetId::new();
    let x = AssetData::new(
        AssetType::Notecard,
        "x",
        format!("Linden text version 2\n{{ {y} {z} }}"),
    );

    svc.store(&x)?;
    assert!(!svc.record(x.id())?.processed);

    assert!(svc.wait_indexed(DRAIN).await);
    let record = svc.record(x.id())?;
    assert!(record.processed);
    let mut expected = vec![y, z];
    expected.sort();
    assert_eq!(record.references, expected);

    Ok(())
}

#[tokio::test]
async fn test_identical_payloads_share_a_blob() -> Result<()> {
    let (svc, blobs, _temp) = test_vault()?;
    let a = ancient(AssetType::Texture, b"same bytes".to_vec());
    let b = ancient(AssetType::Texture, b"same bytes".to_vec());

    let ha = svc.store(&a)?;
    let hb = svc.store(&b)?;
    assert_eq!(ha, hb);
    assert_eq!(blobs.hashes()?, vec![ha.clone()]);
    assert!(svc.wait_indexed(DRAIN).await);

    assert!(svc.delete(a.id())?);
    let summary = svc.purge_with(0)?;
    assert_eq!(summary.blobs_purged, 0);
    assert!(blobs.exists(&ha));
    assert_eq!(svc.get(b.id())?.data, b"same bytes");

    assert!(svc.delete(b.id())?);
    let summary = svc.purge_with(0)?;
    assert_eq!(summary.blobs_purged, 1);
    assert!(!blobs.exists(&ha));

    Ok(())
}

#[tokio::test]
async fn test_stale_unreferenced_asset_is_purged() -> Result<()> {
    let (svc, blobs, _temp) = test_vault()?;
    let x = ancient(AssetType::Notecard, b"nobody needs me".to_vec());
    let hash = svc.store(&x)?;
    assert!(svc.wait_indexed(DRAIN).await);

    let summary = svc.purge_with(CUTOFF)?;
    assert_eq!(summary.records_purged, 1);
    assert_eq!(summary.blobs_purged, 1);
    assert!(!svc.exists(x.id())?);
    assert!(!blobs.exists(&hash));

    Ok(())
}

#[tokio::test]
async fn test_purge_spares_live_assets() -> Result<()> {
    let (svc, blobs, _temp) = test_vault()?;

    // Referenced by a fresh notecard.
    let texture = ancient(AssetType::Texture, b"texture bytes".to_vec());
    let card = AssetData::new(AssetType::Notecard, "card", format!("uses {}", texture.id()));
    // Fresh.
    let fresh = AssetData::new(AssetType::Sound, "fresh", b"fresh".to_vec());
    // Stale, but marked used.
    let marked = ancient(AssetType::Sound, b"marked".to_vec());

    for asset in [&texture, &card, &fresh, &marked] {
        svc.store(asset)?;
    }
    assert!(svc.wait_indexed(DRAIN).await);
    assert_eq!(svc.mark_asset_as_used(&[marked.id()])?, 1);
    assert!(svc.is_referenced(texture.id())?);

    let summary = svc.purge_with(CUTOFF)?;
    assert_eq!(summary.records_purged, 0);
    for asset in [&texture, &card, &fresh, &marked] {
        assert_eq!(svc.get(asset.id())?.data, asset.data);
    }
    assert_eq!(blobs.hashes()?.len(), 4);

    Ok(())
}

#[tokio::test]
async fn test_unprocessed_assets_are_never_collected() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let records = Arc::new(SqliteRecordStore::open(temp_dir.path().join("records.sqlite"))?);
    let blobs = Arc::new(FileStore::at_path(temp_dir.path().join("cas"))?);

    // A decoder that always fails keeps the record unprocessed.
    let mut registry = ExtractorRegistry::empty();
    registry.register(AssetType::Object, |_: &AssetData| -> Result<Vec<AssetId>> {
        anyhow::bail!("decoder offline")
    });
    let svc = AssetService::with_options(
        records,
        blobs.clone(),
        registry,
        ServiceOptions {
            idle_timeout: Duration::from_millis(20),
            ..ServiceOptions::default()
        },
    )?;

    let x = ancient(AssetType::Object, b"undecodable".to_vec());
    svc.store(&x)?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let summary = svc.purge_with(CUTOFF)?;
    assert_eq!(summary.candidates, 0);
    assert!(svc.exists(x.id())?);
    assert_eq!(svc.unprocessed_assets()?, vec![x.id()]);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_store_racing_purge_keeps_payload() -> Result<()> {
    let (svc, blobs, _temp) = test_vault()?;
    let svc = Arc::new(svc);

    for round in 0..25 {
        let payload = format!("contested payload {round}").into_bytes();
        let hash = ContentHash::from_data(&payload);

        let doomed = ancient(AssetType::Texture, payload.clone());
        svc.store(&doomed)?;
        assert!(svc.wait_indexed(DRAIN).await);

        let newcomer = AssetData::new(AssetType::Texture, "newcomer", payload.clone());
        let (purged, stored) = std::thread::scope(|s| {
            let purge = s.spawn(|| svc.purge_with(CUTOFF));
            let store = s.spawn(|| svc.store(&newcomer));
            (purge.join(), store.join())
        });
        purged.expect("purge thread panicked")?;
        stored.expect("store thread panicked")?;

        assert!(
            blobs.exists(&hash),
            "round {round}: payload vanished under a live record"
        );
        assert_eq!(svc.get(newcomer.id())?.data, payload);
        assert!(!svc.exists(doomed.id())?);
    }

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_store_racing_purge_from_another_handle_keeps_payload() -> Result<()> {
    // Two services on one directory, as with `vaultctl watch` running
    // beside a one-shot `vaultctl store`.
    let temp_dir = TempDir::new()?;
    let (watcher, blobs) = open_at(temp_dir.path())?;
    let (writer, _) = open_at(temp_dir.path())?;

    for round in 0..50 {
        let payload = format!("shared across handles {round}").into_bytes();
        let hash = ContentHash::from_data(&payload);

        let doomed = ancient(AssetType::Texture, payload.clone());
        writer.store(&doomed)?;
        assert!(writer.wait_indexed(DRAIN).await);

        let newcomer = AssetData::new(AssetType::Texture, "newcomer", payload.clone());
        let (purged, stored) = std::thread::scope(|s| {
            let purge = s.spawn(|| watcher.purge_with(CUTOFF));
            let store = s.spawn(|| writer.store(&newcomer));
            (purge.join(), store.join())
        });
        purged.expect("purge thread panicked")?;
        stored.expect("store thread panicked")?;

        assert!(
            blobs.exists(&hash),
            "round {round}: payload vanished under a live record"
        );
        assert_eq!(watcher.get(newcomer.id())?.data, payload);
    }

    Ok(())
}

#[tokio::test]
async fn test_vault_state_survives_reopen() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let target = AssetId::new();
    let card = AssetData::new(AssetType::Notecard, "card", format!("see {target}"));

    {
        let (svc, _blobs) = open_at(temp_dir.path())?;
        svc.store(&card)?;
        assert!(svc.wait_indexed(DRAIN).await);
    }

    let (svc, _blobs) = open_at(temp_dir.path())?;
    assert_eq!(svc.references(card.id())?, vec![target]);
    assert!(svc.unprocessed_assets()?.is_empty());
    assert_eq!(svc.requeue_unprocessed()?, 0);

    let (other, _blobs) = open_at(temp_dir.path())?;
    assert!(svc.is_same_store(&other));

    Ok(())
}
