//! Cache types

use crate::placement::DEFAULT_INLINE_THRESHOLD;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Where an entry's payload lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadLocation {
    Inline(Vec<u8>),
    OnDisk(String),
}

impl PayloadLocation {
    pub fn blob_id(&self) -> Option<&str> {
        match self {
            PayloadLocation::Inline(_) => None,
            PayloadLocation::OnDisk(id) => Some(id),
        }
    }
}

/// An index record for a (namespace, key) pair
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub namespace: String,
    pub key: String,
    pub location: PayloadLocation,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    /// `None` means the entry never expires through time alone
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// An entry is live until `expires_at`; at that instant it is expired.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// A live entry resolved for reading
#[derive(Debug)]
pub struct CachedValue {
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub size: u64,
    pub payload: CachedPayload,
}

#[derive(Debug)]
pub enum CachedPayload {
    Inline(Vec<u8>),
    /// Open handle to the blob file. Stays readable even if the blob is
    /// unlinked by a later `set` or `del`.
    File { file: tokio::fs::File, len: u64 },
}

/// Statistics about the cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: u64,
    pub inline_entries: u64,
    pub disk_entries: u64,
    pub total_size: u64,
    pub hits: u64,
    pub misses: u64,
    pub reclaim: ReclaimStats,
}

/// Counters for background blob reclamation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReclaimStats {
    pub requested: u64,
    pub reclaimed: u64,
    pub failed: u64,
}

/// Configuration for opening a cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Holds `index.sqlite` and the `blobs/` tree
    pub root_dir: PathBuf,
    pub inline_threshold: usize,
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl CacheConfig {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    pub fn index_path(&self) -> PathBuf {
        self.root_dir.join("index.sqlite")
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.root_dir.join("blobs")
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./cache"),
            inline_threshold: DEFAULT_INLINE_THRESHOLD,
            max_connections: 4,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Expiry instant for a TTL in seconds. `None` or zero never expires.
pub(crate) fn expiry_from_ttl(now: DateTime<Utc>, ttl_secs: Option<u64>) -> Option<DateTime<Utc>> {
    let ttl_secs = ttl_secs.filter(|secs| *secs > 0)?;
    let ttl_ms = i64::try_from(ttl_secs)
        .ok()
        .and_then(|secs| secs.checked_mul(1000))
        .unwrap_or(i64::MAX);
    Some(from_millis(to_millis(now).saturating_add(ttl_ms)))
}
