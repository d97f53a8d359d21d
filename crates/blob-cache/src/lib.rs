//! Namespaced blob cache with hybrid storage and TTL expiration
//!
//! Small payloads are stored inline in an SQLite index; larger ones are
//! written to per-namespace blob files referenced from the index. Expired
//! entries read as absent immediately and are physically removed by
//! `prune`, which a background task runs on an interval.

mod blobs;
mod cache;
mod error;
mod index;
mod namespace;
mod placement;
mod pruner;
mod reclaim;
mod types;

pub use blobs::BlobStore;
pub use cache::BlobCache;
pub use error::{CacheError, Result};
pub use index::{ExpiredRow, IndexStats, IndexStore};
pub use namespace::{Namespace, MAX_NAMESPACE_LEN};
pub use placement::{Placement, PlacementPolicy, DEFAULT_INLINE_THRESHOLD};
pub use pruner::{spawn_pruner, DEFAULT_PRUNE_INTERVAL};
pub use reclaim::{ReclaimReason, Reclaimer};
pub use types::{
    CacheConfig, CacheEntry, CacheStats, CachedPayload, CachedValue, PayloadLocation,
    ReclaimStats,
};
