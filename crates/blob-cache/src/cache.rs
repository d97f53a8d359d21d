//! The cache facade
//!
//! Composes the index, blob store, and reclaimer. Ordering rules for writes:
//! the new blob is written before its row is committed, and the superseded
//! blob is reclaimed only after the commit, so the index never references a
//! missing or partially written file through the cache's own actions.

use crate::blobs::BlobStore;
use crate::error::{CacheError, Result};
use crate::index::IndexStore;
use crate::namespace::Namespace;
use crate::placement::{Placement, PlacementPolicy};
use crate::reclaim::{ReclaimReason, Reclaimer};
use crate::types::{
    expiry_from_ttl, CacheConfig, CacheEntry, CacheStats, CachedPayload, CachedValue,
    PayloadLocation,
};
use chrono::Utc;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

const KEY_LOCK_STRIPES: usize = 64;

/// Striped per-key locks serializing operations on the same (namespace, key)
struct KeyLocks {
    stripes: Vec<Mutex<()>>,
}

impl KeyLocks {
    fn new() -> Self {
        Self {
            stripes: (0..KEY_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    async fn lock(&self, namespace: &Namespace, key: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        namespace.hash(&mut hasher);
        key.hash(&mut hasher);
        let stripe = (hasher.finish() as usize) % self.stripes.len();
        self.stripes[stripe].lock().await
    }
}

/// A namespaced blob cache with inline/on-disk placement and TTL expiry
pub struct BlobCache {
    index: IndexStore,
    blobs: BlobStore,
    placement: PlacementPolicy,
    reclaimer: Reclaimer,
    key_locks: KeyLocks,
    /// Shared by key-scoped operations, exclusive for bulk clears
    gate: RwLock<()>,
    hits: AtomicU64,
    misses: AtomicU64,
}

fn require_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::MissingField("key"));
    }
    Ok(())
}

impl BlobCache {
    /// Open the cache, creating the root directory and index as needed.
    ///
    /// Fails with `CacheError::Init` if the root cannot be created or the
    /// index cannot be opened; the cache is unusable in that case.
    pub async fn open(config: CacheConfig) -> Result<Self> {
        fs::create_dir_all(&config.root_dir).await.map_err(|e| {
            CacheError::Init(format!(
                "cannot create cache root {:?}: {}",
                config.root_dir, e
            ))
        })?;

        let blobs = BlobStore::new(config.blobs_dir());
        blobs.ensure_root().await.map_err(|e| {
            CacheError::Init(format!("cannot create blob root {:?}: {}", blobs.root(), e))
        })?;

        let index = IndexStore::open(&config).await?;
        let reclaimer = Reclaimer::spawn(blobs.clone());

        info!(
            root_dir = ?config.root_dir,
            inline_threshold = config.inline_threshold,
            "Cache opened"
        );

        Ok(Self {
            index,
            blobs,
            placement: PlacementPolicy::new(config.inline_threshold),
            reclaimer,
            key_locks: KeyLocks::new(),
            gate: RwLock::new(()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Store `payload` under (namespace, key), replacing any previous entry.
    ///
    /// `ttl_secs` of `None` or `Some(0)` means the entry never expires.
    pub async fn set(
        &self,
        namespace: &str,
        key: &str,
        payload: &[u8],
        ttl_secs: Option<u64>,
    ) -> Result<()> {
        let namespace = Namespace::parse(namespace)?;
        require_key(key)?;

        let _gate = self.gate.read().await;
        let _key = self.key_locks.lock(&namespace, key).await;

        let previous = self.index.lookup(&namespace, key).await?;

        let now = Utc::now();
        let location = match self.placement.decide(payload.len()) {
            Placement::Inline => PayloadLocation::Inline(payload.to_vec()),
            Placement::OnDisk => PayloadLocation::OnDisk(self.blobs.write(&namespace, payload).await?),
        };
        let entry = CacheEntry {
            namespace: namespace.to_string(),
            key: key.to_string(),
            location,
            size: payload.len() as u64,
            created_at: now,
            expires_at: expiry_from_ttl(now, ttl_secs),
        };

        if let Err(e) = self.index.upsert(&entry).await {
            if let Some(blob_id) = entry.location.blob_id() {
                if let Err(cleanup) = self.blobs.delete(&namespace, blob_id).await {
                    warn!(
                        namespace = %namespace,
                        blob_id = %blob_id,
                        error = %cleanup,
                        "Failed to remove blob after index write failed"
                    );
                }
            }
            return Err(e);
        }

        if let Some(old_blob) = previous.as_ref().and_then(|p| p.location.blob_id()) {
            self.reclaimer.reclaim(
                namespace.clone(),
                old_blob.to_string(),
                ReclaimReason::Superseded,
            );
        }

        debug!(
            namespace = %namespace,
            key = %key,
            size = entry.size,
            on_disk = entry.location.blob_id().is_some(),
            "Cached value"
        );
        Ok(())
    }

    /// Get a live value, fully buffered in memory.
    pub async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(value) = self.fetch(namespace, key).await? else {
            return Ok(None);
        };
        match value.payload {
            CachedPayload::Inline(bytes) => Ok(Some(bytes)),
            CachedPayload::File { mut file, len } => {
                let mut buf = Vec::with_capacity(usize::try_from(len).unwrap_or(0));
                file.read_to_end(&mut buf).await?;
                Ok(Some(buf))
            }
        }
    }

    /// Get a live value with its metadata. On-disk payloads come back as an
    /// open file handle so callers can stream them.
    pub async fn fetch(&self, namespace: &str, key: &str) -> Result<Option<CachedValue>> {
        let namespace = Namespace::parse(namespace)?;
        require_key(key)?;

        let _gate = self.gate.read().await;
        let _key = self.key_locks.lock(&namespace, key).await;

        let Some(entry) = self.live_entry(&namespace, key).await? else {
            return Ok(self.miss());
        };

        let payload = match entry.location {
            PayloadLocation::Inline(bytes) => CachedPayload::Inline(bytes),
            PayloadLocation::OnDisk(blob_id) => match self.blobs.open(&namespace, &blob_id).await? {
                Some((file, len)) => CachedPayload::File { file, len },
                None => {
                    self.forget_dangling(&namespace, key, &blob_id).await;
                    return Ok(self.miss());
                }
            },
        };

        self.hits.fetch_add(1, Ordering::Relaxed);
        Ok(Some(CachedValue {
            created_at: entry.created_at,
            expires_at: entry.expires_at,
            size: entry.size,
            payload,
        }))
    }

    /// Path of a live on-disk payload.
    ///
    /// `None` when the entry is absent, expired, stored inline, or its file
    /// has gone missing.
    pub async fn get_file_path(&self, namespace: &str, key: &str) -> Result<Option<PathBuf>> {
        let namespace = Namespace::parse(namespace)?;
        require_key(key)?;

        let _gate = self.gate.read().await;
        let _key = self.key_locks.lock(&namespace, key).await;

        let Some(entry) = self.live_entry(&namespace, key).await? else {
            return Ok(self.miss());
        };
        let PayloadLocation::OnDisk(blob_id) = entry.location else {
            return Ok(None);
        };

        let path = self.blobs.path(&namespace, &blob_id);
        if fs::try_exists(&path).await? {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Ok(Some(path))
        } else {
            self.forget_dangling(&namespace, key, &blob_id).await;
            Ok(self.miss())
        }
    }

    /// Delete an entry. Returns whether a live entry was removed.
    pub async fn del(&self, namespace: &str, key: &str) -> Result<bool> {
        let namespace = Namespace::parse(namespace)?;
        require_key(key)?;

        let _gate = self.gate.read().await;
        let _key = self.key_locks.lock(&namespace, key).await;

        let Some(removed) = self.index.remove(&namespace, key).await? else {
            return Ok(false);
        };
        if let Some(blob_id) = removed.location.blob_id() {
            self.reclaimer
                .reclaim(namespace.clone(), blob_id.to_string(), ReclaimReason::Deleted);
        }

        let was_live = removed.is_live(Utc::now());
        debug!(namespace = %namespace, key = %key, was_live, "Deleted cache entry");
        Ok(was_live)
    }

    /// Delete every entry in a namespace and its blob directory.
    pub async fn clear_namespace(&self, namespace: &str) -> Result<u64> {
        let namespace = Namespace::parse(namespace)?;

        let _gate = self.gate.write().await;

        let removed = self.index.remove_namespace(&namespace).await?;
        if let Err(e) = self.blobs.delete_namespace(&namespace).await {
            warn!(namespace = %namespace, error = %e, "Failed to remove namespace blob directory");
        }

        info!(namespace = %namespace, removed, "Cleared namespace");
        Ok(removed)
    }

    /// Delete everything, leaving an empty but usable cache.
    pub async fn clear(&self) -> Result<()> {
        let _gate = self.gate.write().await;

        let removed = self.index.remove_all().await?;
        self.blobs.delete_all().await?;

        info!(removed, "Cleared cache");
        Ok(())
    }

    /// Remove expired entries and queue their blobs for reclamation.
    /// Returns the number of entries removed.
    pub async fn prune(&self) -> Result<u64> {
        let expired = self.index.take_expired(Utc::now()).await?;
        let count = expired.len() as u64;

        for row in expired {
            let Some(blob_id) = row.blob_id else {
                continue;
            };
            match Namespace::parse(&row.namespace) {
                Ok(namespace) => self
                    .reclaimer
                    .reclaim(namespace, blob_id, ReclaimReason::Expired),
                Err(e) => warn!(blob_id = %blob_id, error = %e, "Skipping blob with invalid namespace"),
            }
        }

        if count > 0 {
            info!(pruned = count, "Pruned expired cache entries");
        } else {
            debug!("No expired cache entries");
        }
        Ok(count)
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let index = self.index.stats().await?;
        Ok(CacheStats {
            entries: index.entries,
            inline_entries: index.entries.saturating_sub(index.disk_entries),
            disk_entries: index.disk_entries,
            total_size: index.total_size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            reclaim: self.reclaimer.stats(),
        })
    }

    /// Wait for queued blob reclamation to be attempted.
    pub async fn flush_reclamation(&self) {
        self.reclaimer.flush().await;
    }

    /// Finish pending reclamation and close the index.
    pub async fn close(&self) {
        self.reclaimer.flush().await;
        self.index.close().await;
        info!("Cache closed");
    }

    async fn live_entry(&self, namespace: &Namespace, key: &str) -> Result<Option<CacheEntry>> {
        let entry = self.index.lookup(namespace, key).await?;
        let now = Utc::now();
        Ok(entry.filter(|e| e.is_live(now)))
    }

    /// The index references a blob that is gone; drop the row if it still
    /// points there. Failures are logged only.
    async fn forget_dangling(&self, namespace: &Namespace, key: &str, blob_id: &str) {
        warn!(namespace = %namespace, key = %key, blob_id = %blob_id, "Blob file missing, treating as miss");
        if let Err(e) = self.index.remove_if_blob(namespace, key, blob_id).await {
            warn!(namespace = %namespace, key = %key, error = %e, "Failed to drop dangling index row");
        }
    }

    fn miss<T>(&self) -> Option<T> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::DEFAULT_INLINE_THRESHOLD;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    async fn open_cache(dir: &Path) -> BlobCache {
        BlobCache::open(CacheConfig::new(dir)).await.unwrap()
    }

    fn blob_files(root: &Path, namespace: &str) -> usize {
        std::fs::read_dir(root.join("blobs").join(namespace))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_open_creates_layout() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("nested/cache");
        let _cache = open_cache(&root).await;

        assert!(root.join("index.sqlite").is_file());
        assert!(root.join("blobs").is_dir());
    }

    #[tokio::test]
    async fn test_open_fails_when_root_cannot_be_created() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let result = BlobCache::open(CacheConfig::new(blocker.join("cache"))).await;
        assert!(matches!(result, Err(CacheError::Init(_))));
    }

    #[tokio::test]
    async fn test_failed_commit_removes_new_blob() {
        let dir = tempdir().unwrap();
        let cache = open_cache(dir.path()).await;
        cache.set("docs", "keep", b"small", None).await.unwrap();

        let options = sqlx::sqlite::SqliteConnectOptions::new()
            .filename(CacheConfig::new(dir.path()).index_path());
        let pool = sqlx::SqlitePool::connect_with(options).await.unwrap();
        sqlx::query(
            "CREATE TRIGGER reject_inserts BEFORE INSERT ON cache_entries \
             BEGIN SELECT RAISE(ABORT, 'rejected'); END",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool.close().await;

        let payload = vec![3u8; DEFAULT_INLINE_THRESHOLD + 1];
        let result = cache.set("docs", "big", &payload, None).await;

        assert!(matches!(result, Err(CacheError::Database(_))));
        assert_eq!(blob_files(dir.path(), "docs"), 0);
        assert_eq!(cache.get("docs", "big").await.unwrap(), None);
        assert_eq!(
            cache.get("docs", "keep").await.unwrap(),
            Some(b"small".to_vec())
        );
    }

    #[tokio::test]
    async fn test_round_trip_around_threshold() {
        let dir = tempdir().unwrap();
        let cache = open_cache(dir.path()).await;

        let sizes = [
            0,
            1,
            DEFAULT_INLINE_THRESHOLD - 1,
            DEFAULT_INLINE_THRESHOLD,
            DEFAULT_INLINE_THRESHOLD + 1,
            3 * DEFAULT_INLINE_THRESHOLD,
        ];
        for (i, size) in sizes.iter().enumerate() {
            let payload: Vec<u8> = (0..*size).map(|b| (b % 251) as u8).collect();
            let key = format!("k{}", i);
            cache.set("docs", &key, &payload, None).await.unwrap();
            assert_eq!(cache.get("docs", &key).await.unwrap(), Some(payload));
        }

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.entries, 6);
        assert_eq!(stats.disk_entries, 2);
        assert_eq!(stats.inline_entries, 4);
        assert_eq!(blob_files(dir.path(), "docs"), 2);
    }

    #[tokio::test]
    async fn test_overwrite_supersedes_blob() {
        let dir = tempdir().unwrap();
        let cache = open_cache(dir.path()).await;

        let p1 = vec![1u8; DEFAULT_INLINE_THRESHOLD + 10];
        let p2 = vec![2u8; DEFAULT_INLINE_THRESHOLD + 20];

        cache.set("docs", "k", &p1, None).await.unwrap();
        let old_path = cache.get_file_path("docs", "k").await.unwrap().unwrap();

        cache.set("docs", "k", &p2, None).await.unwrap();
        assert_eq!(cache.get("docs", "k").await.unwrap(), Some(p2));

        cache.flush_reclamation().await;
        assert!(!old_path.exists());
        assert_eq!(blob_files(dir.path(), "docs"), 1);
        assert_eq!(cache.stats().await.unwrap().reclaim.reclaimed, 1);
    }

    #[tokio::test]
    async fn test_overwrite_disk_with_inline() {
        let dir = tempdir().unwrap();
        let cache = open_cache(dir.path()).await;

        cache
            .set("docs", "k", &vec![9u8; DEFAULT_INLINE_THRESHOLD * 2], None)
            .await
            .unwrap();
        cache.set("docs", "k", b"small now", None).await.unwrap();

        assert_eq!(cache.get("docs", "k").await.unwrap(), Some(b"small now".to_vec()));
        assert_eq!(cache.get_file_path("docs", "k").await.unwrap(), None);

        cache.flush_reclamation().await;
        assert_eq!(blob_files(dir.path(), "docs"), 0);
    }

    #[tokio::test]
    async fn test_expiry() {
        let dir = tempdir().unwrap();
        let cache = open_cache(dir.path()).await;

        cache.set("docs", "short", b"gone soon", Some(1)).await.unwrap();
        cache.set("docs", "forever", b"stays", Some(0)).await.unwrap();
        assert!(cache.get("docs", "short").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(cache.get("docs", "short").await.unwrap(), None);
        assert_eq!(cache.get("docs", "forever").await.unwrap(), Some(b"stays".to_vec()));
    }

    #[tokio::test]
    async fn test_prune_count() {
        let dir = tempdir().unwrap();
        let cache = open_cache(dir.path()).await;

        let large = vec![3u8; DEFAULT_INLINE_THRESHOLD + 1];
        cache.set("docs", "to-be-pruned", &large, Some(1)).await.unwrap();
        cache.set("docs", "to-be-kept", b"I will survive", Some(10)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(cache.prune().await.unwrap(), 1);
        assert_eq!(cache.get("docs", "to-be-pruned").await.unwrap(), None);
        assert_eq!(
            cache.get("docs", "to-be-kept").await.unwrap(),
            Some(b"I will survive".to_vec())
        );

        cache.flush_reclamation().await;
        assert_eq!(blob_files(dir.path(), "docs"), 0);
        assert_eq!(cache.prune().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_namespace_isolation() {
        let dir = tempdir().unwrap();
        let cache = open_cache(dir.path()).await;

        let large_a = vec![0xA; DEFAULT_INLINE_THRESHOLD + 1];
        let large_b = vec![0xB; DEFAULT_INLINE_THRESHOLD + 1];
        cache.set("nsA", "k", &large_a, None).await.unwrap();
        cache.set("nsA", "small", b"a", None).await.unwrap();
        cache.set("nsB", "k", &large_b, None).await.unwrap();

        assert_eq!(cache.clear_namespace("nsA").await.unwrap(), 2);

        assert_eq!(cache.get("nsA", "k").await.unwrap(), None);
        assert_eq!(cache.get("nsA", "small").await.unwrap(), None);
        assert_eq!(cache.get("nsB", "k").await.unwrap(), Some(large_b));
        assert!(!dir.path().join("blobs/nsA").exists());
        assert_eq!(blob_files(dir.path(), "nsB"), 1);

        assert_eq!(cache.clear_namespace("nsA").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_idempotent_delete() {
        let dir = tempdir().unwrap();
        let cache = open_cache(dir.path()).await;

        assert!(!cache.del("docs", "nonexistent").await.unwrap());

        cache
            .set("docs", "k", &vec![5u8; DEFAULT_INLINE_THRESHOLD + 1], None)
            .await
            .unwrap();
        assert!(cache.del("docs", "k").await.unwrap());
        assert!(!cache.del("docs", "k").await.unwrap());
        assert_eq!(cache.get("docs", "k").await.unwrap(), None);

        cache.flush_reclamation().await;
        assert_eq!(blob_files(dir.path(), "docs"), 0);
    }

    #[tokio::test]
    async fn test_delete_expired_reports_false() {
        let dir = tempdir().unwrap();
        let cache = open_cache(dir.path()).await;

        cache.set("docs", "k", b"v", Some(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert!(!cache.del("docs", "k").await.unwrap());
        assert_eq!(cache.stats().await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn test_invalid_namespace_rejected_before_io() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("cache");
        let cache = open_cache(&root).await;

        for bad in ["../escape", "a/b", "", ".."] {
            let err = cache.set(bad, "k", &vec![1u8; DEFAULT_INLINE_THRESHOLD + 1], None).await;
            assert!(matches!(err, Err(CacheError::InvalidNamespace(_))), "{:?}", bad);
            assert!(matches!(cache.get(bad, "k").await, Err(CacheError::InvalidNamespace(_))));
            assert!(matches!(cache.del(bad, "k").await, Err(CacheError::InvalidNamespace(_))));
            assert!(matches!(
                cache.clear_namespace(bad).await,
                Err(CacheError::InvalidNamespace(_))
            ));
        }

        assert_eq!(std::fs::read_dir(root.join("blobs")).unwrap().count(), 0);
        assert!(!root.join("escape").exists());
        assert!(!dir.path().join("escape").exists());
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let dir = tempdir().unwrap();
        let cache = open_cache(dir.path()).await;

        let err = cache.set("docs", "", b"v", None).await.unwrap_err();
        assert!(matches!(err, CacheError::MissingField("key")));
        assert!(err.is_caller_error());
        assert!(cache.get("docs", "").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_file_resilience() {
        let dir = tempdir().unwrap();
        let cache = open_cache(dir.path()).await;

        cache
            .set("docs", "k", &vec![8u8; DEFAULT_INLINE_THRESHOLD + 1], None)
            .await
            .unwrap();
        let path = cache.get_file_path("docs", "k").await.unwrap().unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(cache.get("docs", "k").await.unwrap(), None);
        assert_eq!(cache.get_file_path("docs", "k").await.unwrap(), None);
        assert_eq!(cache.stats().await.unwrap().entries, 0);

        cache.set("docs", "k", b"replacement", None).await.unwrap();
        assert_eq!(cache.get("docs", "k").await.unwrap(), Some(b"replacement".to_vec()));
    }

    #[tokio::test]
    async fn test_global_clear() {
        let dir = tempdir().unwrap();
        let cache = open_cache(dir.path()).await;

        cache.set("nsA", "k1", b"one", None).await.unwrap();
        cache
            .set("nsB", "k2", &vec![2u8; DEFAULT_INLINE_THRESHOLD + 1], None)
            .await
            .unwrap();
        cache.set("nsC", "k3", b"three", Some(60)).await.unwrap();

        cache.clear().await.unwrap();

        assert_eq!(cache.get("nsA", "k1").await.unwrap(), None);
        assert_eq!(cache.get("nsB", "k2").await.unwrap(), None);
        assert_eq!(cache.get("nsC", "k3").await.unwrap(), None);
        assert!(dir.path().join("blobs").is_dir());
        assert_eq!(std::fs::read_dir(dir.path().join("blobs")).unwrap().count(), 0);

        let large = vec![4u8; DEFAULT_INLINE_THRESHOLD + 1];
        cache.set("nsB", "k2", &large, None).await.unwrap();
        assert_eq!(cache.get("nsB", "k2").await.unwrap(), Some(large));
    }

    #[tokio::test]
    async fn test_fetch_streams_large_payloads() {
        let dir = tempdir().unwrap();
        let cache = open_cache(dir.path()).await;

        let large = vec![6u8; DEFAULT_INLINE_THRESHOLD + 1];
        cache.set("docs", "big", &large, Some(60)).await.unwrap();
        cache.set("docs", "small", b"tiny", None).await.unwrap();

        let value = cache.fetch("docs", "big").await.unwrap().unwrap();
        assert_eq!(value.size, large.len() as u64);
        assert!(value.expires_at.is_some());
        let CachedPayload::File { mut file, len } = value.payload else {
            panic!("expected a file handle for an on-disk payload");
        };
        assert_eq!(len, large.len() as u64);
        let mut read = Vec::new();
        file.read_to_end(&mut read).await.unwrap();
        assert_eq!(read, large);

        let value = cache.fetch("docs", "small").await.unwrap().unwrap();
        assert!(value.expires_at.is_none());
        assert!(matches!(value.payload, CachedPayload::Inline(ref b) if b == b"tiny"));
    }

    #[tokio::test]
    async fn test_open_handle_survives_supersede() {
        let dir = tempdir().unwrap();
        let cache = open_cache(dir.path()).await;

        let old = vec![1u8; DEFAULT_INLINE_THRESHOLD + 1];
        let new = vec![2u8; DEFAULT_INLINE_THRESHOLD + 1];
        cache.set("docs", "k", &old, None).await.unwrap();

        let value = cache.fetch("docs", "k").await.unwrap().unwrap();
        cache.set("docs", "k", &new, None).await.unwrap();
        cache.flush_reclamation().await;

        let CachedPayload::File { mut file, .. } = value.payload else {
            panic!("expected a file handle");
        };
        let mut read = Vec::new();
        file.read_to_end(&mut read).await.unwrap();
        assert_eq!(read, old);
        assert_eq!(cache.get("docs", "k").await.unwrap(), Some(new));
    }

    #[tokio::test]
    async fn test_concurrent_sets_on_same_key() {
        let dir = tempdir().unwrap();
        let cache = Arc::new(open_cache(dir.path()).await);

        let payloads: Vec<Vec<u8>> = (0..16u8)
            .map(|i| vec![i; DEFAULT_INLINE_THRESHOLD + 1 + i as usize])
            .collect();

        let tasks = payloads.iter().cloned().map(|payload| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.set("docs", "shared", &payload, None).await })
        });
        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }

        let stored = cache.get("docs", "shared").await.unwrap().unwrap();
        assert!(payloads.contains(&stored));

        cache.flush_reclamation().await;
        assert_eq!(blob_files(dir.path(), "docs"), 1);
        assert_eq!(cache.stats().await.unwrap().entries, 1);
    }

    #[tokio::test]
    async fn test_hit_miss_counters() {
        let dir = tempdir().unwrap();
        let cache = open_cache(dir.path()).await;

        cache.get("docs", "missing").await.unwrap();
        cache.set("docs", "k", b"v", None).await.unwrap();
        cache.get("docs", "k").await.unwrap();
        cache.get("docs", "k").await.unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempdir().unwrap();
        let large = vec![7u8; DEFAULT_INLINE_THRESHOLD + 1];
        {
            let cache = open_cache(dir.path()).await;
            cache.set("docs", "small", b"kept", None).await.unwrap();
            cache.set("docs", "large", &large, None).await.unwrap();
            cache.close().await;
        }

        let cache = open_cache(dir.path()).await;
        assert_eq!(cache.get("docs", "small").await.unwrap(), Some(b"kept".to_vec()));
        assert_eq!(cache.get("docs", "large").await.unwrap(), Some(large));
    }
}
