//! SQLite index of cache entries
//!
//! The index is the source of truth: an entry exists iff its row exists.
//! Rows carry the payload inline or reference a blob file by id. The store
//! is expiry-agnostic apart from `take_expired`; callers decide liveness.

use crate::error::{CacheError, Result};
use crate::namespace::Namespace;
use crate::types::{from_millis, to_millis, CacheConfig, CacheEntry, PayloadLocation};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tracing::{debug, info};

#[derive(sqlx::FromRow)]
struct IndexRow {
    namespace: String,
    key: String,
    inline_value: Option<Vec<u8>>,
    blob_id: Option<String>,
    size: i64,
    created_at: i64,
    expires_at: Option<i64>,
}

impl From<IndexRow> for CacheEntry {
    fn from(row: IndexRow) -> Self {
        let location = match row.blob_id {
            Some(id) => PayloadLocation::OnDisk(id),
            None => PayloadLocation::Inline(row.inline_value.unwrap_or_default()),
        };
        CacheEntry {
            namespace: row.namespace,
            key: row.key,
            location,
            size: u64::try_from(row.size).unwrap_or(0),
            created_at: from_millis(row.created_at),
            expires_at: row.expires_at.map(from_millis),
        }
    }
}

/// Row counts and sizes across the whole index
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexStats {
    pub entries: u64,
    pub disk_entries: u64,
    pub total_size: u64,
}

/// A row removed by `take_expired`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExpiredRow {
    pub namespace: String,
    pub blob_id: Option<String>,
}

pub struct IndexStore {
    pool: SqlitePool,
}

impl IndexStore {
    /// Open (creating if needed) the index database and apply migrations.
    pub async fn open(config: &CacheConfig) -> Result<Self> {
        let path = config.index_path();
        info!(path = ?path, "Opening cache index");

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| CacheError::Init(format!("cannot open index {:?}: {}", path, e)))?;

        sqlx::migrate!().run(&pool).await?;
        debug!("Cache index migrations applied");

        Ok(Self { pool })
    }

    /// Insert or replace the row for (namespace, key).
    pub async fn upsert(&self, entry: &CacheEntry) -> Result<()> {
        let (inline_value, blob_id) = match &entry.location {
            PayloadLocation::Inline(bytes) => (Some(bytes.as_slice()), None),
            PayloadLocation::OnDisk(id) => (None, Some(id.as_str())),
        };

        sqlx::query(
            r#"
            INSERT INTO cache_entries
                (namespace, key, inline_value, blob_id, size, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (namespace, key) DO UPDATE SET
                inline_value = excluded.inline_value,
                blob_id      = excluded.blob_id,
                size         = excluded.size,
                created_at   = excluded.created_at,
                expires_at   = excluded.expires_at
            "#,
        )
        .bind(&entry.namespace)
        .bind(&entry.key)
        .bind(inline_value)
        .bind(blob_id)
        .bind(i64::try_from(entry.size).unwrap_or(i64::MAX))
        .bind(to_millis(entry.created_at))
        .bind(entry.expires_at.map(to_millis))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch the row for (namespace, key), expired or not.
    pub async fn lookup(&self, namespace: &Namespace, key: &str) -> Result<Option<CacheEntry>> {
        let row = sqlx::query_as::<_, IndexRow>(
            r#"
            SELECT namespace, key, inline_value, blob_id, size, created_at, expires_at
            FROM cache_entries
            WHERE namespace = ? AND key = ?
            "#,
        )
        .bind(namespace.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(CacheEntry::from))
    }

    /// Delete the row for (namespace, key).
    ///
    /// Returns `None` if there was no row, otherwise the removed row so the
    /// caller can reclaim its blob and judge whether it was still live.
    pub async fn remove(&self, namespace: &Namespace, key: &str) -> Result<Option<CacheEntry>> {
        let row = sqlx::query_as::<_, IndexRow>(
            r#"
            DELETE FROM cache_entries
            WHERE namespace = ? AND key = ?
            RETURNING namespace, key, inline_value, blob_id, size, created_at, expires_at
            "#,
        )
        .bind(namespace.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(CacheEntry::from))
    }

    /// Delete the row only if it still references `blob_id`.
    pub async fn remove_if_blob(
        &self,
        namespace: &Namespace,
        key: &str,
        blob_id: &str,
    ) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM cache_entries WHERE namespace = ? AND key = ? AND blob_id = ?")
                .bind(namespace.as_str())
                .bind(key)
                .bind(blob_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every row in a namespace, returning how many were removed.
    pub async fn remove_namespace(&self, namespace: &Namespace) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE namespace = ?")
            .bind(namespace.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn remove_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Atomically delete every row with `expires_at <= now`, returning what
    /// is needed to reclaim their blobs.
    pub async fn take_expired(&self, now: DateTime<Utc>) -> Result<Vec<ExpiredRow>> {
        let rows = sqlx::query_as::<_, ExpiredRow>(
            r#"
            DELETE FROM cache_entries
            WHERE expires_at IS NOT NULL AND expires_at <= ?
            RETURNING namespace, blob_id
            "#,
        )
        .bind(to_millis(now))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let (entries, disk_entries, total_size): (i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(blob_id), COALESCE(SUM(size), 0) FROM cache_entries",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(IndexStats {
            entries: u64::try_from(entries).unwrap_or(0),
            disk_entries: u64::try_from(disk_entries).unwrap_or(0),
            total_size: u64::try_from(total_size).unwrap_or(0),
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
