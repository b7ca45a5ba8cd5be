//! SQLite-backed partition store

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use crate::backend::PartitionStore;
use crate::entry::{CacheEntry, EntryMeta, ResponseSnapshot};
use crate::error::StorageError;

/// SQLite-backed partition store
///
/// Insertion order is the autoincrement row id: replacing a key deletes the
/// old row and inserts a new one, which moves it to the tail.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    quota_bytes: Option<u64>,
}

impl SqliteStore {
    /// Connect to a database and run migrations
    pub async fn connect(database_url: &str, quota_bytes: Option<u64>) -> Result<Self, StorageError> {
        info!("Connecting to partition store: {}", database_url);

        // Every connection to an in-memory database is a separate database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        let store = Self { pool, quota_bytes };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS partitions (
                name TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                partition TEXT NOT NULL,
                key TEXT NOT NULL,
                stored_at TEXT NOT NULL,
                last_accessed_at TEXT NOT NULL,
                size INTEGER NOT NULL,
                status INTEGER NOT NULL,
                headers TEXT NOT NULL,
                body BLOB NOT NULL,
                UNIQUE(partition, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_cache_entries_partition ON cache_entries(partition, id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("Partition store migrations completed");
        Ok(())
    }

    async fn used_bytes_excluding(&self, partition: &str, key: &str) -> Result<u64, StorageError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(size), 0) AS total FROM cache_entries WHERE NOT (partition = ? AND key = ?)",
        )
        .bind(partition)
        .bind(key)
        .fetch_one(&self.pool)
        .await?;
        let total: i64 = row.try_get("total")?;
        Ok(total as u64)
    }
}

fn parse_timestamp(key: &str, value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })
}

fn meta_from_row(row: &SqliteRow) -> Result<EntryMeta, StorageError> {
    let key: String = row.try_get("key")?;
    let stored_at: String = row.try_get("stored_at")?;
    let last_accessed_at: String = row.try_get("last_accessed_at")?;
    let size: i64 = row.try_get("size")?;
    Ok(EntryMeta {
        stored_at: parse_timestamp(&key, &stored_at)?,
        last_accessed_at: parse_timestamp(&key, &last_accessed_at)?,
        size: size as u64,
        key,
    })
}

fn entry_from_row(row: &SqliteRow) -> Result<CacheEntry, StorageError> {
    let meta = meta_from_row(row)?;
    let status: i64 = row.try_get("status")?;
    let headers: String = row.try_get("headers")?;
    let body: Vec<u8> = row.try_get("body")?;
    Ok(CacheEntry {
        key: meta.key,
        stored_at: meta.stored_at,
        last_accessed_at: meta.last_accessed_at,
        size: meta.size,
        payload: ResponseSnapshot {
            status: status as u16,
            headers: serde_json::from_str(&headers)?,
            body: Bytes::from(body),
        },
    })
}

#[async_trait]
impl PartitionStore for SqliteStore {
    async fn partitions(&self) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query("SELECT name FROM partitions ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get("name").map_err(StorageError::from))
            .collect()
    }

    async fn get(&self, partition: &str, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT key, stored_at, last_accessed_at, size, status, headers, body
            FROM cache_entries
            WHERE partition = ? AND key = ?
            "#,
        )
        .bind(partition)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(entry_from_row).transpose()
    }

    async fn put(&self, partition: &str, entry: CacheEntry) -> Result<(), StorageError> {
        if let Some(quota) = self.quota_bytes {
            let used = self.used_bytes_excluding(partition, &entry.key).await?;
            if used + entry.size > quota {
                return Err(StorageError::QuotaExceeded {
                    required: entry.size,
                    available: quota.saturating_sub(used),
                });
            }
        }

        let headers = serde_json::to_string(&entry.payload.headers)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT OR IGNORE INTO partitions (name, created_at) VALUES (?, ?)")
            .bind(partition)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM cache_entries WHERE partition = ? AND key = ?")
            .bind(partition)
            .bind(&entry.key)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO cache_entries (partition, key, stored_at, last_accessed_at, size, status, headers, body)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(partition)
        .bind(&entry.key)
        .bind(entry.stored_at.to_rfc3339())
        .bind(entry.last_accessed_at.to_rfc3339())
        .bind(entry.size as i64)
        .bind(entry.payload.status as i64)
        .bind(headers)
        .bind(entry.payload.body.as_ref())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Stored {} in partition {}", entry.key, partition);
        Ok(())
    }

    async fn delete(&self, partition: &str, key: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE partition = ? AND key = ?")
            .bind(partition)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn entries(&self, partition: &str) -> Result<Vec<EntryMeta>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT key, stored_at, last_accessed_at, size
            FROM cache_entries
            WHERE partition = ?
            ORDER BY id ASC
            "#,
        )
        .bind(partition)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(meta_from_row).collect()
    }

    async fn touch(&self, partition: &str, key: &str) -> Result<(), StorageError> {
        sqlx::query("UPDATE cache_entries SET last_accessed_at = ? WHERE partition = ? AND key = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(partition)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn len(&self, partition: &str) -> Result<usize, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM cache_entries WHERE partition = ?")
            .bind(partition)
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("count")?;
        Ok(count as usize)
    }

    async fn delete_partition(&self, partition: &str) -> Result<bool, StorageError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM cache_entries WHERE partition = ?")
            .bind(partition)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM partitions WHERE name = ?")
            .bind(partition)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}
