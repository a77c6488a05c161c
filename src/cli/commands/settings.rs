use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::*;

use crate::config::Settings;

#[derive(Args)]
pub struct SettingsCommands {
    #[command(subcommand)]
    pub command: SettingsSubcommands,
}

#[derive(Subcommand)]
pub enum SettingsSubcommands {
    /// Show effective settings, environment overrides included
    Show,
    /// Print the settings file location
    Path,
    /// Write the default settings to the settings file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

pub fn settings_command(settings: &Settings, args: SettingsCommands) -> Result<()> {
    match args.command {
        SettingsSubcommands::Show => {
            let content =
                toml::to_string_pretty(settings).context("Failed to serialize settings")?;
            println!("{}", content);
            println!("{} {}", "Database:".dimmed(), settings.database_path()?.display());
        }
        SettingsSubcommands::Path => {
            println!("{}", Settings::get_config_path()?.display());
        }
        SettingsSubcommands::Init { force } => {
            let path = Settings::get_config_path()?;
            if path.exists() && !force {
                anyhow::bail!(
                    "Settings file already exists at {} (use --force to overwrite)",
                    path.display()
                );
            }
            Settings::default().save_to(&path)?;
            println!(
                "{} Wrote default settings to {}",
                "✓".bright_green().bold(),
                path.display().to_string().bright_white()
            );
        }
    }
    Ok(())
}
