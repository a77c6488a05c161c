//! Migration manager for applying embedded schema migrations

use anyhow::{Context, Result};
use log::{debug, info, warn};
use sqlx::SqlitePool;

use super::{
    AppliedMigration, Migration, calculate_checksum, get_applied_migrations, get_current_version,
    get_pending_migrations, init_migration_table, load_migrations, validate_migrations,
};

pub struct MigrationManager<'a> {
    pool: &'a SqlitePool,
}

impl<'a> MigrationManager<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations
    pub async fn migrate_up(&self) -> Result<()> {
        init_migration_table(self.pool).await?;
        validate_migrations(self.pool).await?;

        let pending = get_pending_migrations(self.pool).await?;
        if pending.is_empty() {
            debug!("No pending migrations");
            return Ok(());
        }

        info!("Running {} pending migrations", pending.len());
        for migration in pending {
            self.apply(&migration).await?;
        }

        Ok(())
    }

    /// Apply a single migration and record it, in one transaction
    async fn apply(&self, migration: &Migration) -> Result<()> {
        if migration.up_sql.trim().is_empty() {
            warn!("Migration {} has empty up SQL, skipping", migration.version);
            return Ok(());
        }

        info!("Applying migration {} '{}'", migration.version, migration.name);

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to start migration transaction")?;

        sqlx::query(&migration.up_sql)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to execute migration {}", migration.version))?;

        sqlx::query("INSERT INTO schema_migrations (version, name, checksum) VALUES (?, ?, ?)")
            .bind(migration.version)
            .bind(&migration.name)
            .bind(calculate_checksum(&migration.up_sql))
            .execute(&mut *tx)
            .await
            .context("Failed to record migration")?;

        tx.commit()
            .await
            .context("Failed to commit migration transaction")?;

        Ok(())
    }

    pub async fn status(&self) -> Result<MigrationStatus> {
        init_migration_table(self.pool).await?;

        let available = load_migrations()?;
        let applied = get_applied_migrations(self.pool).await?;
        let pending = get_pending_migrations(self.pool).await?;
        let current_version = get_current_version(self.pool).await?;

        Ok(MigrationStatus {
            current_version,
            total_available: available.len(),
            applied_migrations: applied,
            pending_migrations: pending,
        })
    }
}

#[derive(Debug)]
pub struct MigrationStatus {
    pub current_version: Option<i64>,
    pub total_available: usize,
    pub applied_migrations: Vec<AppliedMigration>,
    pub pending_migrations: Vec<Migration>,
}

impl MigrationStatus {
    pub fn is_up_to_date(&self) -> bool {
        self.pending_migrations.is_empty()
    }
}
