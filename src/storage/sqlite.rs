//! SQLite-backed key-value store

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::path::Path;

use super::{KeyValueStore, check_value_size, db};

/// Durable store over the `kv_store` table
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    max_value_bytes: usize,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, max_value_bytes: usize) -> Self {
        Self {
            pool,
            max_value_bytes,
        }
    }

    /// Open (or create) the database file and bring its schema up to date
    pub async fn open(path: &Path, max_value_bytes: usize) -> Result<Self> {
        let pool = db::connect(path).await?;
        db::run_migrations(&pool).await?;
        Ok(Self::new(pool, max_value_bytes))
    }

    /// Migrated in-memory database
    pub async fn open_memory(max_value_bytes: usize) -> Result<Self> {
        let pool = db::connect_memory().await?;
        db::run_migrations(&pool).await?;
        Ok(Self::new(pool, max_value_bytes))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        // Size first so an oversized row is reported without being loaded
        let bytes: Option<i64> =
            sqlx::query_scalar("SELECT length(CAST(value AS BLOB)) FROM kv_store WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .with_context(|| format!("Failed to read size of key '{}'", key))?;

        let Some(bytes) = bytes else {
            return Ok(None);
        };
        check_value_size(key, bytes.max(0) as usize, self.max_value_bytes)?;

        sqlx::query_scalar("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to read key '{}'", key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        check_value_size(key, value.len(), self.max_value_bytes)?;

        sqlx::query(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to write key '{}'", key))?;

        log::trace!("Stored {} bytes under '{}'", value.len(), key);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to remove key '{}'", key))?;
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        // substr instead of LIKE: keys may contain '%' and '_'
        sqlx::query_scalar(
            "SELECT key FROM kv_store WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to list keys with prefix '{}'", prefix))
    }

    fn max_value_bytes(&self) -> usize {
        self.max_value_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_row_too_big;

    #[tokio::test]
    async fn test_upsert_and_read() {
        let store = SqliteStore::open_memory(1024).await.unwrap();

        store.set("surveys", "[]").await.unwrap();
        store.set("surveys", "[1]").await.unwrap();
        assert_eq!(store.get("surveys").await.unwrap(), Some("[1]".to_string()));

        store.remove("surveys").await.unwrap();
        assert_eq!(store.get("surveys").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_row_is_reported_on_read() {
        let store = SqliteStore::open_memory(8).await.unwrap();

        // A row written by a build with a larger ceiling
        sqlx::query("INSERT INTO kv_store (key, value) VALUES ('big', '0123456789')")
            .execute(store.pool())
            .await
            .unwrap();

        let err = store.get("big").await.unwrap_err();
        assert!(is_row_too_big(&err));

        let err = store.set("big2", "0123456789").await.unwrap_err();
        assert!(is_row_too_big(&err));
    }

    #[tokio::test]
    async fn test_prefix_scan_treats_wildcards_literally() {
        let store = SqliteStore::open_memory(1024).await.unwrap();
        for key in ["ref:a_1", "ref:ab1", "ref%x", "other"] {
            store.set(key, "v").await.unwrap();
        }

        let keys = store.keys_with_prefix("ref:a_").await.unwrap();
        assert_eq!(keys, vec!["ref:a_1".to_string()]);

        let keys = store.keys_with_prefix("ref").await.unwrap();
        assert_eq!(keys.len(), 3);
    }
}
