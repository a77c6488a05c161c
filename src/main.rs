use anyhow::Result;
use clap::Parser;
use log::info;
use std::sync::Arc;

use fieldsync::OfflineCache;
use fieldsync::cli::commands::{interviews, provision, queue, reference, settings, status};
use fieldsync::cli::{Cli, Commands};
use fieldsync::config::Settings;
use fieldsync::storage::SqliteStore;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Log to file, truncated on each run
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open("fieldsync.log")?;
    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .init();

    let cli = Cli::parse();
    let config = Settings::load()?;
    info!("Starting fieldsync");

    match cli.command {
        Commands::Settings(args) => settings::settings_command(&config, args),
        command => run(command, &config).await,
    }
}

async fn run(command: Commands, config: &Settings) -> Result<()> {
    let path = config.database_path()?;
    let store = SqliteStore::open(&path, config.storage.max_value_bytes).await?;
    let cache = OfflineCache::with_store(Arc::new(store.clone()), config);

    match command {
        Commands::Status => status::status_command(&cache, &store).await,
        Commands::Interviews(args) => interviews::interviews_command(&cache, args).await,
        Commands::Queue(args) => queue::queue_command(&cache, args).await,
        Commands::Reference(args) => reference::reference_command(&cache, args).await,
        Commands::Provision(args) => provision::provision_command(&cache, args).await,
        Commands::Settings(args) => settings::settings_command(config, args),
    }
}
