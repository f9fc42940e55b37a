//! Content addressable blob storage for assetvault.
//!
//! Payloads are addressed by a truncated BLAKE3 digest ([`ContentHash`]).
//! Storing the same bytes twice yields the same hash and a single blob, which
//! is what lets many asset records share one physical payload.
//!
//! ```rust,no_run
//! use cas::{BlobStore, FileStore};
//!
//! let store = FileStore::at_path("/var/lib/assetvault/cas").unwrap();
//! let hash = store.store(b"texture bytes").unwrap();
//! assert!(store.exists(&hash));
//! ```
//!
//! Blobs never know who uses them. Deciding when a blob is an orphan is the
//! job of the vault's garbage collector, which holds the record index.

pub mod config;
pub mod hash;
pub mod lock;
pub mod memory;
pub mod store;

pub use config::CasConfig;
pub use hash::{ContentHash, HashError, HASH_HEX_LEN};
pub use lock::{BlobLock, LockMode};
pub use memory::MemoryStore;
pub use store::{BlobStore, FileStore};
