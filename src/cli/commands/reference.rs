use anyhow::Result;
use clap::{Args, Subcommand};
use colored::*;

use crate::models::Station;
use crate::offline::OfflineCache;
use crate::reference::matching::canonical_ac_name;

#[derive(Args)]
pub struct ReferenceCommands {
    /// State to look in (defaults to the configured state)
    #[arg(long, global = true)]
    pub state: Option<String>,
    #[command(subcommand)]
    pub command: ReferenceSubcommands,
}

#[derive(Subcommand)]
pub enum ReferenceSubcommands {
    /// States present in the bundled dataset
    States,
    /// Resolve an AC name or alias to its identifier
    Resolve { name: String },
    /// List every AC of the state
    Acs,
    /// Fuzzy search over AC names
    Search {
        query: String,
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Polling groups of an AC, cache first
    Groups { ac: String },
    /// Polling stations of a group, cache first
    Stations { ac: String, group: String },
    /// Drop every cached reference entry
    Clear,
}

fn print_stations(stations: &[Station]) {
    for station in stations {
        let gps = match (station.latitude, station.longitude) {
            (Some(lat), Some(lon)) => format!(" ({:.5}, {:.5})", lat, lon).dimmed().to_string(),
            _ => String::new(),
        };
        println!(
            "  {:>4}  {}{}",
            station
                .number
                .map(|n| n.to_string())
                .unwrap_or_else(|| "-".to_string()),
            station.name,
            gps
        );
    }
}

pub async fn reference_command(cache: &OfflineCache, args: ReferenceCommands) -> Result<()> {
    let state = args
        .state
        .unwrap_or_else(|| cache.settings().reference.default_state.clone());

    match args.command {
        ReferenceSubcommands::States => {
            for name in cache.bundled.list_states().await {
                println!("  {}", name);
            }
        }
        ReferenceSubcommands::Resolve { name } => {
            if let Some(canonical) = canonical_ac_name(&name) {
                println!("  {} {}", "Alias of".dimmed(), canonical.bright_white());
            }
            match cache.bundled.find_ac_by_name(&state, &name).await {
                Some(id) => println!("{} '{}' -> {}", "✓".bright_green().bold(), name, id.bright_cyan()),
                None => println!("  {} No AC matching '{}' in {}", "⚠️".bright_yellow(), name, state),
            }
        }
        ReferenceSubcommands::Acs => {
            let mut acs = cache.reference.get_all_acs_for_state(&state).await;
            let source = if acs.is_empty() {
                acs = cache.bundled.get_all_acs_for_state(&state).await;
                "bundled"
            } else {
                "cached"
            };
            println!("{}", format!("{} ACs in {} ({})", acs.len(), state, source).bright_white().bold());
            for ac in &acs {
                println!(
                    "  {:>4}  {}  {}",
                    ac.ac_no.map(|n| n.to_string()).unwrap_or_default(),
                    ac.ac_name,
                    ac.district.as_deref().unwrap_or_default().dimmed()
                );
            }
        }
        ReferenceSubcommands::Search { query, limit } => {
            let matches = cache.bundled.suggest_acs(&state, &query, limit).await;
            if matches.is_empty() {
                println!("  {}", "No matches".dimmed());
            }
            for ac in matches {
                println!("  {}", ac.ac_name);
            }
        }
        ReferenceSubcommands::Groups { ac } => {
            let (groups, source) = match cache.reference.get_groups_for_ac(&state, &ac).await {
                Some(entry) => (Some(entry.data.groups), "cached"),
                None => (
                    cache
                        .bundled
                        .get_groups_for_ac(&state, &ac)
                        .await
                        .map(|record| record.group_names()),
                    "bundled",
                ),
            };
            match groups {
                Some(groups) => {
                    println!("{}", format!("{} groups ({})", groups.len(), source).bright_white().bold());
                    for group in groups {
                        println!("  {}", group);
                    }
                }
                None => println!("  {} AC '{}' not found in {}", "⚠️".bright_yellow(), ac, state),
            }
        }
        ReferenceSubcommands::Stations { ac, group } => {
            let stations = match cache.reference.get_stations_for_group(&state, &ac, &group).await {
                Some(entry) => Some(entry.data.stations),
                None => {
                    cache
                        .bundled
                        .get_polling_stations_for_group(&state, &ac, &group)
                        .await
                }
            };
            match stations {
                Some(stations) => print_stations(&stations),
                None => println!(
                    "  {} No stations for {} / {} in {}",
                    "⚠️".bright_yellow(),
                    ac,
                    group,
                    state
                ),
            }
        }
        ReferenceSubcommands::Clear => {
            let removed = cache.reference.clear_all().await?;
            println!("{} Removed {} cached entries", "✓".bright_green().bold(), removed);
        }
    }
    Ok(())
}
