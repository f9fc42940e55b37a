//! Pending-work queue with a single, lazily started drain loop.
//!
//! `enqueue` never blocks. At most one worker drains the queue at a time; it
//! starts when work arrives and exits after sitting idle for the configured
//! timeout.
//!
//! Worker lifecycle is an atomic handoff on `active`:
//! - `enqueue` bumps `depth`, sends, then tries `active: 0 -> 1`. Winning the
//!   exchange means it must spawn the worker.
//! - An idle worker releases `active` first and only then reads `depth`. If
//!   work slipped in, it tries to take `active` back; if an enqueuer already
//!   did, that enqueuer's worker owns the queue and this one exits.
//!
//! Every interleaving leaves exactly one worker whenever `depth > 0`.
//!
//! `outstanding` counts ids from `enqueue` until they leave the queue for
//! good. A retry keeps its slot, so an item moving between the channel and
//! the processor is never momentarily invisible to `wait_drained`.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering::SeqCst};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, trace};

use crate::id::AssetId;

/// Name reported in queue statistics.
pub const REFERENCE_QUEUE_NAME: &str = "AssetReferences";

/// What happened to one dequeued item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Indexed,
    /// Not processable now or later (deleted, payload gone).
    Dropped,
    /// Transient failure; put it back on the queue.
    Retry,
}

/// Work performed for each dequeued id. Runs on the blocking pool.
pub trait QueueProcessor: Send + Sync + 'static {
    fn process(&self, id: AssetId) -> ProcessOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueState {
    Processing,
    Idle,
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueState::Processing => write!(f, "PROCESSING"),
            QueueState::Idle => write!(f, "IDLE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStat {
    pub name: String,
    pub state: QueueState,
    pub depth: usize,
    pub processed: u64,
}

struct QueueInner {
    name: String,
    tx: mpsc::UnboundedSender<AssetId>,
    rx: Mutex<mpsc::UnboundedReceiver<AssetId>>,
    processor: Arc<dyn QueueProcessor>,
    runtime: Handle,
    idle_timeout: Duration,
    depth: AtomicUsize,
    outstanding: AtomicUsize,
    active: AtomicUsize,
    processed: AtomicU64,
    workers_started: AtomicU64,
}

#[derive(Clone)]
pub struct ProcessingQueue {
    inner: Arc<QueueInner>,
}

impl ProcessingQueue {
    /// Queue whose worker runs on the current tokio runtime.
    pub fn new(
        name: impl Into<String>,
        processor: Arc<dyn QueueProcessor>,
        idle_timeout: Duration,
    ) -> Result<Self> {
        let runtime = Handle::try_current().context("processing queue requires a tokio runtime")?;
        Ok(Self::with_handle(runtime, name, processor, idle_timeout))
    }

    pub fn with_handle(
        runtime: Handle,
        name: impl Into<String>,
        processor: Arc<dyn QueueProcessor>,
        idle_timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(QueueInner {
                name: name.into(),
                tx,
                rx: Mutex::new(rx),
                processor,
                runtime,
                idle_timeout,
                depth: AtomicUsize::new(0),
                outstanding: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                processed: AtomicU64::new(0),
                workers_started: AtomicU64::new(0),
            }),
        }
    }

    pub fn enqueue(&self, id: AssetId) {
        let inner = &self.inner;
        inner.outstanding.fetch_add(1, SeqCst);
        if !inner.push(id) {
            inner.outstanding.fetch_sub(1, SeqCst);
        }

        if inner.active.compare_exchange(0, 1, SeqCst, SeqCst).is_ok() {
            inner.workers_started.fetch_add(1, SeqCst);
            trace!(queue = %inner.name, "starting queue worker");
            inner.runtime.spawn(drain(inner.clone()));
        }
    }

    pub fn stats(&self) -> QueueStat {
        let depth = self.inner.depth.load(SeqCst);
        QueueStat {
            name: self.inner.name.clone(),
            state: if depth > 0 {
                QueueState::Processing
            } else {
                QueueState::Idle
            },
            depth,
            processed: self.inner.processed.load(SeqCst),
        }
    }

    pub fn active_workers(&self) -> usize {
        self.inner.active.load(SeqCst)
    }

    /// Workers spawned over the queue's lifetime.
    pub fn workers_started(&self) -> u64 {
        self.inner.workers_started.load(SeqCst)
    }

    /// Wait until nothing is queued or being processed. Returns `false` if
    /// `timeout` elapsed first.
    pub async fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.inner.outstanding.load(SeqCst) == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl QueueInner {
    /// Put `id` on the channel. `false` if the channel is closed.
    fn push(&self, id: AssetId) -> bool {
        self.depth.fetch_add(1, SeqCst);
        if self.tx.send(id).is_err() {
            // The receiver lives in self, so this only happens mid-teardown.
            self.depth.fetch_sub(1, SeqCst);
            error!(queue = %self.name, asset.id = %id, "queue closed, item lost");
            return false;
        }
        true
    }
}

async fn drain(inner: Arc<QueueInner>) {
    debug!(queue = %inner.name, "queue worker running");

    loop {
        let next = {
            let mut rx = inner.rx.lock().await;
            tokio::time::timeout(inner.idle_timeout, rx.recv()).await
        };

        match next {
            Ok(Some(id)) => {
                inner.depth.fetch_sub(1, SeqCst);
                if !process_one(&inner, id).await {
                    inner.outstanding.fetch_sub(1, SeqCst);
                }
            }
            Ok(None) => {
                inner.active.fetch_sub(1, SeqCst);
                return;
            }
            Err(_idle) => {
                inner.active.fetch_sub(1, SeqCst);
                if inner.depth.load(SeqCst) == 0 {
                    debug!(queue = %inner.name, "queue worker idle, exiting");
                    return;
                }
                if inner.active.compare_exchange(0, 1, SeqCst, SeqCst).is_err() {
                    // A concurrent enqueue started a replacement.
                    return;
                }
            }
        }
    }
}

/// Returns `true` if `id` went back on the queue.
async fn process_one(inner: &Arc<QueueInner>, id: AssetId) -> bool {
    let processor = inner.processor.clone();
    let outcome = tokio::task::spawn_blocking(move || processor.process(id)).await;

    match outcome {
        Ok(ProcessOutcome::Indexed) => {
            inner.processed.fetch_add(1, SeqCst);
            false
        }
        Ok(ProcessOutcome::Dropped) => false,
        Ok(ProcessOutcome::Retry) => {
            trace!(queue = %inner.name, asset.id = %id, "requeueing");
            inner.push(id)
        }
        Err(e) => {
            error!(queue = %inner.name, asset.id = %id, error = %e, "queue processor panicked, dropping item");
            false
        }
    }
}
