use anyhow::Result;
use clap::{Args, Subcommand};
use colored::*;

use crate::error::StoreError;
use crate::models::{InterviewStatus, OfflineInterview};
use crate::offline::OfflineCache;
use crate::repository::CleanupReport;

#[derive(Args)]
pub struct InterviewCommands {
    #[command(subcommand)]
    pub command: InterviewSubcommands,
}

#[derive(Subcommand)]
pub enum InterviewSubcommands {
    /// List stored interviews
    List {
        /// Only interviews still waiting to sync
        #[arg(long)]
        pending: bool,
    },
    /// Print one interview as JSON
    Show {
        id: String,
        /// Join the cached survey body back in, as it would be uploaded
        #[arg(long)]
        hydrate: bool,
    },
    /// Delete an interview and its queued operations
    Delete { id: String },
    /// Mark a failed interview pending again and queue it for sync
    Requeue { id: String },
    /// Run a listing pass and report everything it repaired
    Repair,
    /// Print records held aside because they no longer decode
    Quarantined,
}

fn status_label(status: InterviewStatus) -> ColoredString {
    match status {
        InterviewStatus::Pending => status.as_str().bright_yellow(),
        InterviewStatus::Syncing => status.as_str().bright_cyan(),
        InterviewStatus::Synced => status.as_str().bright_green(),
        InterviewStatus::Failed => status.as_str().bright_red(),
    }
}

fn print_interview_line(interview: &OfflineInterview) {
    println!(
        "  {} {:<8} {} survey={} ac={}{}",
        "●".dimmed(),
        status_label(interview.status),
        interview.id.bright_white(),
        interview.survey_id,
        interview.selections.ac.as_deref().unwrap_or("-"),
        interview
            .error
            .as_deref()
            .map(|e| format!(" ({})", e).bright_red().to_string())
            .unwrap_or_default()
    );
}

fn print_report(report: &CleanupReport) {
    if report.is_clean() {
        println!("{} Store is consistent", "✓".bright_green().bold());
        return;
    }
    for dropped in &report.dropped {
        println!(
            "  {} Dropped {}: {}",
            "✗".bright_red(),
            dropped.id.as_deref().unwrap_or("<no id>"),
            dropped.reason
        );
    }
    for held in &report.quarantined {
        println!(
            "  {} Quarantined {}: {}",
            "⚠️".bright_yellow(),
            held.id.as_deref().unwrap_or("<no id>"),
            held.reason
        );
    }
    if report.missing > 0 {
        println!("  {} {} manifest entries had no record", "⚠️".bright_yellow(), report.missing);
    }
    if report.reindexed > 0 {
        println!("  {} {} orphaned records reindexed", "↻".bright_cyan(), report.reindexed);
    }
    if report.imported > 0 {
        println!("  {} {} legacy records imported", "↻".bright_cyan(), report.imported);
    }
    for warning in &report.warnings {
        println!("  {} {}", "⚠️".bright_yellow(), warning);
    }
}

pub async fn interviews_command(cache: &OfflineCache, args: InterviewCommands) -> Result<()> {
    match args.command {
        InterviewSubcommands::List { pending } => {
            let interviews = if pending {
                cache.interviews.list_pending().await?
            } else {
                cache.interviews.list_all().await?
            };
            if interviews.is_empty() {
                println!("  {}", "No offline interviews".dimmed());
                return Ok(());
            }
            println!("{}", format!("{} interviews", interviews.len()).bright_white().bold());
            for interview in &interviews {
                print_interview_line(interview);
            }
        }
        InterviewSubcommands::Show { id, hydrate } => {
            let interview = if hydrate {
                cache.interviews.hydrate_for_sync(&id, &cache.ancillary).await?
            } else {
                cache.interviews.get_by_id(&id).await?
            };
            match interview {
                Some(interview) => println!("{}", serde_json::to_string_pretty(&interview)?),
                None => {
                    return Err(StoreError::NotFound {
                        what: "Interview",
                        id,
                    }
                    .into());
                }
            }
        }
        InterviewSubcommands::Delete { id } => {
            let removed = cache.interviews.delete(&id).await?;
            let dequeued = cache.queue.remove_for_interview(&id).await?;
            if removed {
                println!(
                    "{} Deleted interview {} ({} queued operations removed)",
                    "✓".bright_green().bold(),
                    id.bright_white(),
                    dequeued
                );
            } else {
                println!("  {} No interview with id {}", "⚠️".bright_yellow(), id);
            }
        }
        InterviewSubcommands::Requeue { id } => {
            let interview = cache
                .interviews
                .update_status(&id, InterviewStatus::Pending, None)
                .await?;
            let item = cache.queue.enqueue_interview(&interview).await?;
            println!(
                "{} Interview {} queued for {} (item {})",
                "✓".bright_green().bold(),
                id.bright_white(),
                item.operation,
                item.id.dimmed()
            );
        }
        InterviewSubcommands::Repair => {
            let listing = cache.interviews.list_all_with_report().await?;
            println!(
                "{} {} interviews readable, {} bytes",
                "🔍".bright_cyan(),
                listing.interviews.len(),
                listing.total_bytes
            );
            print_report(&listing.report);
        }
        InterviewSubcommands::Quarantined => {
            let held = cache.interviews.list_quarantined().await?;
            if held.is_empty() {
                println!("  {}", "Nothing in quarantine".dimmed());
            }
            for record in held {
                println!("{} {}", "●".bright_yellow(), record.id.bright_white());
                println!("{}", record.raw.dimmed());
            }
        }
    }
    Ok(())
}
