use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::api::remote::UnavailableRemote;
use crate::models::Survey;
use crate::offline::OfflineCache;
use crate::provisioning::{ProvisioningOutcome, ProvisioningReport};

#[derive(Args)]
pub struct ProvisionCommands {
    /// JSON file holding the array of assigned surveys
    #[arg(long)]
    pub surveys: PathBuf,
}

fn print_report(report: &ProvisioningReport) {
    println!("  States:          {}", report.states.join(", "));
    println!("  Assigned ACs:    {}", report.assigned_acs);
    println!("  ACs warmed:      {}", report.acs_warmed.to_string().bright_green());
    println!("  Groups cached:   {}", report.groups_cached);
    println!("  Stations cached: {} ({} with GPS)", report.stations_cached, report.gps_cached);
    if !report.ac_lists_cached.is_empty() {
        println!("  AC lists cached: {}", report.ac_lists_cached.join(", "));
    }
    if !report.ac_lists_skipped.is_empty() {
        println!(
            "  AC lists below completeness floor: {}",
            report.ac_lists_skipped.join(", ").bright_yellow()
        );
    }
    if !report.missing_acs.is_empty() {
        println!("  Not in bundled data: {}", report.missing_acs.join(", ").bright_yellow());
    }
    if !report.failures.is_empty() {
        println!("  {} {} steps failed:", "⚠️".bright_yellow(), report.failures.len());
        for failure in &report.failures {
            println!(
                "    {} {}: {}",
                failure.step.bright_red(),
                failure.target,
                failure.message.dimmed()
            );
        }
    }
}

/// Offline provisioning: everything remote is unavailable, only the bundled data is used
pub async fn provision_command(cache: &OfflineCache, args: ProvisionCommands) -> Result<()> {
    let content = fs::read_to_string(&args.surveys)
        .with_context(|| format!("Failed to read surveys file: {}", args.surveys.display()))?;
    let surveys: Vec<Survey> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse surveys file: {}", args.surveys.display()))?;

    println!("🔄 {}", format!("Provisioning {} surveys...", surveys.len()).dimmed());
    let provisioner = cache.provisioner(Arc::new(UnavailableRemote));

    match provisioner.run(&surveys).await {
        ProvisioningOutcome::Completed(report) => {
            println!("{} Provisioning finished", "✓".bright_green().bold());
            print_report(&report);
        }
        ProvisioningOutcome::AlreadyRunning => {
            println!("  {} Provisioning already in progress", "⚠️".bright_yellow());
        }
        ProvisioningOutcome::Aborted { error, report } => {
            print_report(&report);
            anyhow::bail!("Provisioning aborted: {}", error);
        }
    }
    Ok(())
}
