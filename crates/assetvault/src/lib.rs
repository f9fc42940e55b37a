//! Deduplicating asset storage with reference tracking and garbage collection.
//!
//! Assets are immutable payloads with metadata, addressed by [`AssetId`].
//! Payloads live once per content hash in a [`cas::BlobStore`]; per-asset
//! records live in a [`RecordStore`].
//!
//! After a store, a single background worker decodes the payload, records
//! which other assets it references, and marks the record processed. The
//! [`GarbageCollector`] then deletes processed records that have gone
//! unaccessed past the retention window and are referenced by nothing else,
//! followed by any blobs no surviving record points at.
//!
//! ```text
//! store ──► blob put ──► record insert (processed = false) ──► enqueue
//!                                                                 │
//!              record.references + processed = true ◄── indexer ◄─┘
//!
//! purge ──► stale & unreferenced records ──► orphaned blobs
//! ```

pub mod asset;
pub mod error;
pub mod extract;
pub mod id;
pub mod indexer;
pub mod loader;
pub mod locks;
pub mod purge;
pub mod queue;
pub mod records;
pub mod service;

pub use asset::{AssetData, AssetFlags, AssetMetadata, AssetRecord, AssetType};
pub use error::{AssetError, AssetResult};
pub use extract::{ExtractorRegistry, ReferenceExtractor};
pub use id::AssetId;
pub use indexer::ReferenceIndexer;
pub use loader::AssetLoader;
pub use locks::HashLocks;
pub use purge::{spawn_purge_loop, GarbageCollector, PurgeSummary};
pub use queue::{ProcessOutcome, ProcessingQueue, QueueProcessor, QueueStat, QueueState};
pub use records::{InsertOutcome, MemoryRecordStore, RecordStore, SqliteRecordStore};
pub use service::{AssetService, ServiceOptions};
