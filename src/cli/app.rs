use super::commands::interviews::InterviewCommands;
use super::commands::provision::ProvisionCommands;
use super::commands::queue::QueueCommands;
use super::commands::reference::ReferenceCommands;
use super::commands::settings::SettingsCommands;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(about = "Inspect and maintain the offline survey cache")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Summary of stored interviews, the sync queue and the database
    Status,
    /// Offline interview management
    Interviews(InterviewCommands),
    /// Sync queue inspection
    Queue(QueueCommands),
    /// Bundled and cached reference data
    Reference(ReferenceCommands),
    /// Warm the caches for a set of surveys
    Provision(ProvisionCommands),
    /// Application settings
    Settings(SettingsCommands),
}
