use anyhow::Result;
use colored::*;

use crate::offline::OfflineCache;
use crate::storage::SqliteStore;
use crate::storage::db::get_db_info;
use crate::storage::migrations::manager::MigrationManager;

pub async fn status_command(cache: &OfflineCache, store: &SqliteStore) -> Result<()> {
    let stats = cache.interviews.stats().await?;
    let queued = cache.queue.len().await?;
    let info = get_db_info(store.pool()).await?;
    let migrations = MigrationManager::new(store.pool()).status().await?;

    println!("{}", "Offline interviews".bright_white().bold());
    println!("  Total:    {}", stats.total.to_string().bright_cyan());
    println!("  Pending:  {}", stats.pending.to_string().bright_yellow());
    println!("  Syncing:  {}", stats.syncing);
    println!("  Synced:   {}", stats.synced.to_string().bright_green());
    println!("  Failed:   {}", stats.failed.to_string().bright_red());
    println!("  Size:     {} bytes", stats.total_bytes);
    println!();

    println!("{}", "Sync".bright_white().bold());
    println!("  Queued operations: {}", queued);
    match cache.ancillary.get_last_sync_time().await? {
        Some(at) => println!("  Last sync:         {}", at.to_rfc3339()),
        None => println!("  Last sync:         {}", "never".dimmed()),
    }
    match cache.ancillary.get_last_download_time().await? {
        Some(at) => println!("  Last download:     {}", at.to_rfc3339()),
        None => println!("  Last download:     {}", "never".dimmed()),
    }
    println!();

    println!("{}", "Database".bright_white().bold());
    println!("  SQLite:  {} ({} journal)", info.sqlite_version, info.journal_mode);
    println!(
        "  Schema:  v{}{}",
        info.schema_version,
        if migrations.is_up_to_date() {
            String::new()
        } else {
            format!(" ({} pending)", migrations.pending_migrations.len())
                .bright_yellow()
                .to_string()
        }
    );
    println!("  Keys:    {} ({} bytes)", info.key_count, info.stored_bytes);
    Ok(())
}
