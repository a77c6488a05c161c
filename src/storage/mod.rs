//! Key-value persistence layer
//!
//! Every cache component reads and writes through [`KeyValueStore`]: an async,
//! string-keyed store with a hard per-key size ceiling. Values larger than the
//! ceiling are refused on write and reported as [`StoreError::RowTooBig`] on
//! read, mirroring the row-size limit of the platform stores the data is
//! shipped on.
//!
//! - [`SqliteStore`] is the durable implementation (sqlx + SQLite, WAL)
//! - [`MemoryStore`] backs tests and throwaway sessions

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use crate::error::StoreError;

pub mod db;
pub mod memory;
pub mod migrations;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Default per-key ceiling (6 MiB)
pub const DEFAULT_MAX_VALUE_BYTES: usize = 6 * 1024 * 1024;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value; `StoreError::RowTooBig` if the stored row exceeds the ceiling
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value; `StoreError::RowTooBig` if it exceeds the ceiling
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key; removing a missing key is not an error
    async fn remove(&self, key: &str) -> Result<()>;

    /// All keys starting with `prefix`, in ascending key order
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// The per-key ceiling in bytes
    fn max_value_bytes(&self) -> usize;
}

/// Read and decode a JSON value
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(raw) => {
            let value = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse stored JSON for key '{}'", key))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Encode and write a JSON value, returning the encoded size
pub async fn set_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<usize> {
    let raw = serde_json::to_string(value)
        .with_context(|| format!("Failed to serialize value for key '{}'", key))?;
    store.set(key, &raw).await?;
    Ok(raw.len())
}

/// Remove every key under `prefix`, returning how many were removed
pub async fn remove_prefix(store: &dyn KeyValueStore, prefix: &str) -> Result<usize> {
    let keys = store.keys_with_prefix(prefix).await?;
    for key in &keys {
        store.remove(key).await?;
    }
    Ok(keys.len())
}

pub(crate) fn check_value_size(key: &str, bytes: usize, limit: usize) -> Result<()> {
    if bytes > limit {
        return Err(StoreError::RowTooBig {
            key: key.to_string(),
            bytes,
            limit,
        }
        .into());
    }
    Ok(())
}
