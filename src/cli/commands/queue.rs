use anyhow::Result;
use clap::{Args, Subcommand};
use colored::*;

use crate::offline::OfflineCache;

#[derive(Args)]
pub struct QueueCommands {
    #[command(subcommand)]
    pub command: QueueSubcommands,
}

#[derive(Subcommand)]
pub enum QueueSubcommands {
    /// List queued operations in sync order
    List,
    /// Queue every pending interview that has no queued operation
    Rebuild,
}

pub async fn queue_command(cache: &OfflineCache, args: QueueCommands) -> Result<()> {
    match args.command {
        QueueSubcommands::List => {
            let listing = cache.queue.list_with_report().await?;
            for warning in &listing.warnings {
                println!("  {} {}", "⚠️".bright_yellow(), warning);
            }
            if listing.evicted > 0 {
                println!("  {} {} unreadable entries dropped", "✗".bright_red(), listing.evicted);
            }
            let items = listing.items;
            if items.is_empty() {
                println!("  {}", "Sync queue is empty".dimmed());
                return Ok(());
            }
            for (position, item) in items.iter().enumerate() {
                println!(
                    "  {:>3}. {:<8} {} attempts={}{}",
                    position + 1,
                    item.operation.to_string().bright_cyan(),
                    item.interview_id.bright_white(),
                    item.attempts,
                    item.last_error
                        .as_deref()
                        .map(|e| format!(" last error: {}", e).bright_red().to_string())
                        .unwrap_or_default()
                );
            }
        }
        QueueSubcommands::Rebuild => {
            let added = cache.queue.rebuild_from(&cache.interviews).await?;
            println!(
                "{} Queued {} interviews ({} operations total)",
                "✓".bright_green().bold(),
                added,
                cache.queue.len().await?
            );
        }
    }
    Ok(())
}
