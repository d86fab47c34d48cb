//! Persistent stores for embedding artifacts.
//!
//! - `temporal`: content-addressed store of per-time-step matrices, one
//!   self-describing file per video, written atomically.
//! - `query_cache`: two-tier (memory + disk) cache of query encodings
//!   keyed by a content fingerprint, with per-fingerprint encode
//!   coalescing.
//! - `layout`: where everything lives under the storage root.

pub mod codec;
pub mod error;
pub mod layout;
pub mod query_cache;
pub mod temporal;

pub use error::{StorageError, StorageResult};
pub use layout::StorageLayout;
pub use query_cache::{Fingerprint, QueryCache, QueryCacheConfig, QueryCacheStats};
pub use temporal::TemporalStore;
