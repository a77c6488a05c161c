//! Database connection and schema management

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::path::Path;

/// Connect to SQLite database with proper configuration
pub async fn connect(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory: {:?}", parent))?;
            log::info!("Created data directory: {:?}", parent);
        }
    }

    let database_url = format!("sqlite://{}?mode=rwc", db_path.display());

    let pool = SqlitePool::connect(&database_url)
        .await
        .with_context(|| format!("Failed to connect to database: {}", db_path.display()))?;

    // WAL keeps readers unblocked while the capture screen writes
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await
        .context("Failed to enable WAL mode")?;

    // Interviews must survive a crash right after save
    sqlx::query("PRAGMA synchronous = FULL")
        .execute(&pool)
        .await
        .context("Failed to set synchronous mode")?;

    sqlx::query("PRAGMA temp_store = MEMORY")
        .execute(&pool)
        .await
        .context("Failed to set temp store")?;

    log::debug!("Connected to SQLite database: {}", db_path.display());
    Ok(pool)
}

/// Connect to in-memory database for testing
///
/// Pinned to a single connection that is never recycled; every pooled
/// connection would otherwise get its own empty database.
pub async fn connect_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .context("Failed to connect to in-memory database")?;

    log::debug!("Connected to in-memory SQLite database");
    Ok(pool)
}

/// Run database migrations using the embedded migration files
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    log::debug!("Running database migrations");

    let migration_manager = super::migrations::MigrationManager::new(pool);
    migration_manager.migrate_up().await?;

    Ok(())
}

/// Get database info for debugging
pub async fn get_db_info(pool: &SqlitePool) -> Result<DatabaseInfo> {
    let version: String = sqlx::query_scalar("SELECT sqlite_version()")
        .fetch_one(pool)
        .await
        .context("Failed to get SQLite version")?;

    let schema_version = super::migrations::get_current_version(pool)
        .await?
        .unwrap_or(0);

    let key_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM kv_store")
        .fetch_one(pool)
        .await
        .context("Failed to count stored keys")?;

    let stored_bytes: i64 =
        sqlx::query_scalar("SELECT COALESCE(SUM(length(CAST(value AS BLOB))), 0) FROM kv_store")
            .fetch_one(pool)
            .await
            .context("Failed to sum stored bytes")?;

    let journal_mode: String = sqlx::query_scalar("PRAGMA journal_mode")
        .fetch_one(pool)
        .await
        .context("Failed to get journal mode")?;

    Ok(DatabaseInfo {
        sqlite_version: version,
        schema_version,
        key_count,
        stored_bytes,
        journal_mode,
    })
}

#[derive(Debug)]
pub struct DatabaseInfo {
    pub sqlite_version: String,
    pub schema_version: i64,
    pub key_count: i64,
    pub stored_bytes: i64,
    pub journal_mode: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_database_info() {
        let pool = connect_memory().await.unwrap();
        run_migrations(&pool).await.unwrap();

        let info = get_db_info(&pool).await.unwrap();
        assert_eq!(info.schema_version, 1);
        assert_eq!(info.key_count, 0);
        assert_eq!(info.stored_bytes, 0);
        assert!(!info.sqlite_version.is_empty());
    }
}
