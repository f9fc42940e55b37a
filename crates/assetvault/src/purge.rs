//! Mark/sweep collection of stale, unreferenced assets and orphaned blobs.
//!
//! Phase 1 sweeps records: every processed record last accessed before the
//! cutoff is deleted unless another record references it. The check runs
//! against live state, candidate by candidate, so a reference written after
//! the scan started still saves its target.
//!
//! Phase 2 sweeps blobs: for each hash freed in phase 1 (plus hashes deferred
//! by deletes and failed stores), the blob is removed only if no record
//! still points at it. That check and the delete happen under the hash's
//! write lock, which stores hold for reading while they insert.
//!
//! A full blob scan also clears partial writes abandoned by crashed writers.

use cas::{BlobStore, ContentHash};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::asset::unix_now;
use crate::error::AssetResult;
use crate::locks::HashLocks;
use crate::records::RecordStore;

/// Partial writes younger than this may still belong to a live writer.
const PARTIAL_WRITE_GRACE: Duration = Duration::from_secs(3600);

/// Outcome of one purge pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeSummary {
    /// Stale processed records examined.
    pub candidates: usize,
    pub records_purged: usize,
    pub blobs_purged: usize,
    /// Per-item errors that were skipped.
    pub failures: usize,
}

pub struct GarbageCollector {
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    locks: Arc<HashLocks>,
    deferred: Mutex<HashSet<ContentHash>>,
    full_blob_scan: bool,
    pass: Mutex<()>,
}

impl GarbageCollector {
    pub fn new(
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        locks: Arc<HashLocks>,
    ) -> Self {
        Self {
            records,
            blobs,
            locks,
            deferred: Mutex::new(HashSet::new()),
            full_blob_scan: false,
            pass: Mutex::new(()),
        }
    }

    /// Check every stored blob in phase 2, not only hashes freed by this
    /// process. Reclaims orphans left behind by crashes.
    pub fn with_full_blob_scan(mut self, enabled: bool) -> Self {
        self.full_blob_scan = enabled;
        self
    }

    /// Queue `hash` for an orphan check on the next pass.
    pub fn defer(&self, hash: ContentHash) {
        self.deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(hash);
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn take_deferred(&self) -> HashSet<ContentHash> {
        std::mem::take(&mut *self.deferred.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Purge with the cutoff `retention` before now.
    pub fn purge_with_retention(&self, retention: Duration) -> AssetResult<PurgeSummary> {
        let retention = i64::try_from(retention.as_secs()).unwrap_or(i64::MAX);
        self.purge_accessed_before(unix_now().saturating_sub(retention))
    }

    /// Run both phases. Records with `access_time < cutoff` are stale.
    ///
    /// Fails only if the candidate scan itself fails; errors on individual
    /// records or blobs are logged, counted, and skipped.
    pub fn purge_accessed_before(&self, cutoff: i64) -> AssetResult<PurgeSummary> {
        let _pass = self.pass.lock().unwrap_or_else(PoisonError::into_inner);
        let mut summary = PurgeSummary::default();

        let candidates = self.records.stale_processed(cutoff)?;
        summary.candidates = candidates.len();
        debug!(cutoff, candidates = summary.candidates, "purge phase 1");

        let mut freed = HashSet::new();
        for id in candidates {
            match self.records.delete_if_collectable(id, cutoff) {
                Ok(Some(hash)) => {
                    trace!(asset.id = %id, %hash, "record purged");
                    summary.records_purged += 1;
                    freed.insert(hash);
                }
                Ok(None) => {
                    trace!(asset.id = %id, "record still live");
                }
                Err(e) => {
                    warn!(asset.id = %id, error = %e, "failed to purge record");
                    summary.failures += 1;
                }
            }
        }

        freed.extend(self.take_deferred());
        if self.full_blob_scan {
            match self.blobs.hashes() {
                Ok(all) => freed.extend(all),
                Err(e) => {
                    warn!(error = %e, "blob enumeration failed, skipping full scan");
                    summary.failures += 1;
                }
            }
            if let Err(e) = self.blobs.sweep_partial(PARTIAL_WRITE_GRACE) {
                warn!(error = %e, "failed to sweep partial writes");
                summary.failures += 1;
            }
        }
        debug!(hashes = freed.len(), "purge phase 2");

        for hash in freed {
            match self.reclaim(&hash) {
                Ok(true) => summary.blobs_purged += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(%hash, error = %e, "failed to reclaim blob, deferring");
                    summary.failures += 1;
                    self.defer(hash);
                }
            }
        }

        info!(
            candidates = summary.candidates,
            records_purged = summary.records_purged,
            blobs_purged = summary.blobs_purged,
            failures = summary.failures,
            "purge complete"
        );
        Ok(summary)
    }

    /// Delete the blob for `hash` if no record uses it.
    fn reclaim(&self, hash: &ContentHash) -> anyhow::Result<bool> {
        let _guard = self.locks.write(hash)?;
        if self.records.has_hash(hash)? {
            return Ok(false);
        }
        let deleted = self.blobs.delete(hash)?;
        if deleted {
            debug!(%hash, "orphan blob deleted");
        }
        Ok(deleted)
    }
}

/// Run a purge every `interval` until `cancel` fires.
pub fn spawn_purge_loop(
    collector: Arc<GarbageCollector>,
    retention: Duration,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Purge loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let gc = collector.clone();
                    match tokio::task::spawn_blocking(move || gc.purge_with_retention(retention)).await {
                        Ok(Ok(_summary)) => {}
                        Ok(Err(e)) => warn!(error = %e, "purge pass failed"),
                        Err(e) => error!(error = %e, "purge pass panicked"),
                    }
                }
            }
        }
    })
}
