//! Schema migrations for the local database

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::collections::BTreeMap;

pub mod manager;

pub use manager::{MigrationManager, MigrationStatus};

/// Represents a single migration with up and down SQL
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub name: String,
    pub up_sql: String,
    pub down_sql: String,
}

/// Migration status in the database
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AppliedMigration {
    pub version: i64,
    pub name: String,
    pub applied_at: chrono::DateTime<chrono::Utc>,
    pub checksum: String,
}

/// Load all available migrations from the embedded files
/// Migrations are auto-discovered from files/ directory using include_dir!
pub fn load_migrations() -> Result<BTreeMap<i64, Migration>> {
    use include_dir::{Dir, include_dir};

    static MIGRATIONS_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/src/storage/migrations/files");

    let mut migrations = BTreeMap::new();

    // Each directory is named NNN_name and holds up.sql and down.sql
    for entry in MIGRATIONS_DIR.dirs() {
        let name_only = entry
            .path()
            .file_name()
            .and_then(|n| n.to_str())
            .context("Invalid migration directory name")?;

        let (version, name) = name_only.split_once('_').with_context(|| {
            format!(
                "Invalid migration directory format: {}. Expected format: NNN_name",
                name_only
            )
        })?;

        let version: i64 = version
            .parse()
            .with_context(|| format!("Invalid migration version in directory: {}", name_only))?;

        let read_sql = |file: &str| -> Result<String> {
            let path = format!("{}/{}", name_only, file);
            Ok(MIGRATIONS_DIR
                .get_file(&path)
                .with_context(|| format!("Missing {} in migration {}", file, name_only))?
                .contents_utf8()
                .with_context(|| format!("{} is not valid UTF-8 in migration {}", file, name_only))?
                .to_string())
        };

        migrations.insert(
            version,
            Migration {
                version,
                name: name.to_string(),
                up_sql: read_sql("up.sql")?,
                down_sql: read_sql("down.sql")?,
            },
        );
    }

    if migrations.is_empty() {
        anyhow::bail!("No migrations found in files directory");
    }

    Ok(migrations)
}

/// Initialize the migration tracking table
pub async fn init_migration_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            checksum TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create schema_migrations table")?;

    Ok(())
}

/// Get list of applied migrations
pub async fn get_applied_migrations(pool: &SqlitePool) -> Result<Vec<AppliedMigration>> {
    let migrations = sqlx::query_as::<_, AppliedMigration>(
        "SELECT version, name, applied_at, checksum FROM schema_migrations ORDER BY version",
    )
    .fetch_all(pool)
    .await
    .context("Failed to get applied migrations")?;

    Ok(migrations)
}

/// SHA-256 of the migration SQL as lowercase hex
/// Line endings are normalized so the checksum matches across platforms
pub fn calculate_checksum(sql: &str) -> String {
    use sha2::{Digest, Sha256};

    let normalized = sql.replace("\r\n", "\n").replace('\r', "\n");

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Checksums recorded by older builds were 64-bit hashes, not SHA-256 hex
fn is_legacy_checksum(checksum: &str) -> bool {
    checksum.len() != 64
}

/// Validate that applied migrations match available ones
///
/// Rows carrying a legacy checksum are rewritten with the SHA-256 value
/// instead of failing, since their hash cannot be recomputed.
pub async fn validate_migrations(pool: &SqlitePool) -> Result<()> {
    let available = load_migrations()?;
    let applied = get_applied_migrations(pool).await?;

    for applied_migration in applied {
        let Some(available_migration) = available.get(&applied_migration.version) else {
            anyhow::bail!(
                "Applied migration {} '{}' not found in available migrations",
                applied_migration.version,
                applied_migration.name
            );
        };

        let expected_checksum = calculate_checksum(&available_migration.up_sql);
        if applied_migration.checksum == expected_checksum {
            continue;
        }

        if is_legacy_checksum(&applied_migration.checksum) {
            log::info!(
                "Upgrading checksum of migration {} to SHA-256",
                applied_migration.version
            );
            sqlx::query("UPDATE schema_migrations SET checksum = ? WHERE version = ?")
                .bind(&expected_checksum)
                .bind(applied_migration.version)
                .execute(pool)
                .await
                .context("Failed to upgrade migration checksum")?;
            continue;
        }

        anyhow::bail!(
            "Migration {} checksum mismatch! Applied: {}, Expected: {}. \
            This indicates the migration file has been modified after being applied.",
            applied_migration.version,
            applied_migration.checksum,
            expected_checksum
        );
    }

    Ok(())
}

/// Get pending migrations (available but not applied)
pub async fn get_pending_migrations(pool: &SqlitePool) -> Result<Vec<Migration>> {
    let available = load_migrations()?;
    let applied = get_applied_migrations(pool).await?;

    let applied_versions: std::collections::HashSet<i64> =
        applied.into_iter().map(|m| m.version).collect();

    Ok(available
        .into_values()
        .filter(|migration| !applied_versions.contains(&migration.version))
        .collect())
}

/// Get the current schema version (highest applied migration)
pub async fn get_current_version(pool: &SqlitePool) -> Result<Option<i64>> {
    init_migration_table(pool).await?;

    let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
        .fetch_one(pool)
        .await
        .context("Failed to get current schema version")?;

    Ok(version.filter(|v| *v != 0))
}
