//! CLI command implementations

use anyhow::{anyhow, Context, Result};
use assetvault::{spawn_purge_loop, AssetData, AssetId, AssetService, AssetType};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vaultconf::{ConfigSources, VaultConfig};

/// How long a one-shot command waits for the assets it stored to be indexed.
const INDEX_WAIT: Duration = Duration::from_secs(60);

fn parse_id(raw: &str) -> Result<AssetId> {
    raw.parse()
        .with_context(|| format!("Invalid asset id: '{}'", raw))
}

fn parse_ids(raw: &[String]) -> Result<Vec<AssetId>> {
    raw.iter().map(|s| parse_id(s)).collect()
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Store a file and wait for it to be indexed
pub async fn store(
    service: &AssetService,
    file: &Path,
    kind: &str,
    name: Option<String>,
    id: Option<&str>,
) -> Result<()> {
    let asset_type = AssetType::parse_name(kind)
        .ok_or_else(|| anyhow!("Unknown asset type: '{}'", kind))?;
    let data = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let name = name.unwrap_or_else(|| {
        file.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    });

    let mut asset = AssetData::new(asset_type, name, data);
    if let Some(id) = id {
        asset = asset.with_id(parse_id(id)?);
    }

    let hash = service.store(&asset)?;
    if !service.wait_indexed(INDEX_WAIT).await {
        tracing::warn!(asset.id = %asset.id(), "indexing still pending; run `vaultctl reindex`");
    }

    println!("{}\t{}", asset.id(), hash);
    Ok(())
}

/// Write a payload to a file, or stdout
pub fn get(service: &AssetService, id: &str, output: Option<&Path>) -> Result<()> {
    let data = service.data(parse_id(id)?)?;
    match output {
        Some(path) => {
            std::fs::write(path, &data)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&data)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

/// Print metadata, processing state and references
pub fn refs(service: &AssetService, id: &str) -> Result<()> {
    let id = parse_id(id)?;
    let record = service.record(id)?;
    let references = service.references(id)?;

    print_json(&serde_json::json!({
        "id": id,
        "name": record.metadata.name,
        "type": record.metadata.asset_type.to_string(),
        "hash": record.content_hash,
        "processed": record.processed,
        "access_time": record.metadata.access_time,
        "references": references,
        "referenced_by_others": service.is_referenced(id)?,
    }))
}

pub fn delete(service: &AssetService, id: &str) -> Result<()> {
    let id = parse_id(id)?;
    if service.delete(id)? {
        println!("deleted {}", id);
    } else {
        println!("{} not found", id);
    }
    Ok(())
}

pub fn exists(service: &AssetService, ids: &[String]) -> Result<()> {
    let ids = parse_ids(ids)?;
    let found = service.exists_many(&ids)?;
    for id in &ids {
        let present = found.get(id).copied().unwrap_or(false);
        println!("{}\t{}", id, present);
    }
    Ok(())
}

pub fn mark(service: &AssetService, ids: &[String]) -> Result<()> {
    let ids = parse_ids(ids)?;
    let updated = service.mark_asset_as_used(&ids)?;
    println!("marked {} of {} assets", updated, ids.len());
    Ok(())
}

pub fn unprocessed(service: &AssetService) -> Result<()> {
    for id in service.unprocessed_assets()? {
        println!("{}", id);
    }
    Ok(())
}

/// Requeue unprocessed assets and wait for the queue to drain
pub async fn reindex(service: &AssetService, timeout_secs: u64) -> Result<()> {
    let queued = service.requeue_unprocessed()?;
    let drained = service.wait_indexed(Duration::from_secs(timeout_secs)).await;

    let remaining = service.unprocessed_assets()?.len();
    println!("queued {}, still unprocessed {}", queued, remaining);
    if !drained {
        anyhow::bail!("queue did not drain within {}s", timeout_secs);
    }
    Ok(())
}

pub fn purge(service: &AssetService, retention_secs: Option<u64>) -> Result<()> {
    let summary = match retention_secs {
        Some(secs) => service
            .collector()
            .purge_with_retention(Duration::from_secs(secs))?,
        None => service.purge_unused_assets()?,
    };
    print_json(&summary)
}

pub fn stats(service: &AssetService) -> Result<()> {
    print_json(&serde_json::json!({
        "queue": service.queue_stats(),
        "records": service.record_count()?,
        "blobs": service.blob_count()?,
        "unprocessed": service.unprocessed_assets()?.len(),
        "retention_secs": service.retention().as_secs(),
    }))
}

/// Index any backlog, then purge every `interval` until Ctrl-C
pub async fn watch(service: AssetService, interval: Duration) -> Result<()> {
    service.requeue_unprocessed()?;

    let cancel = CancellationToken::new();
    let handle = spawn_purge_loop(
        service.collector(),
        service.retention(),
        interval,
        cancel.clone(),
    );
    tracing::info!(interval_secs = interval.as_secs(), "watching; Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    cancel.cancel();
    handle.await.context("purge loop failed")?;

    if !service.wait_indexed(Duration::from_secs(5)).await {
        tracing::warn!("exiting with indexing work still queued");
    }
    Ok(())
}

pub fn show_config(config: &VaultConfig, sources: &ConfigSources) {
    if sources.files.is_empty() {
        println!("# no config files found, using defaults");
    }
    for file in &sources.files {
        println!("# loaded {}", file.display());
    }
    for var in &sources.env_overrides {
        println!("# overridden by ${}", var);
    }
    print!("{}", config.to_toml());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ids_reports_bad_input() {
        let good = AssetId::new().to_string();
        assert_eq!(parse_ids(&[good.clone()]).unwrap().len(), 1);

        let err = parse_ids(&[good, "nope".to_string()]).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}
