use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::EnvFilter;

use wrangler::config::EngineConfig;
use wrangler::database::connection::get_database_url;
use wrangler::AppContext;

mod args;
mod commands;
mod migrate;

use commands::{DatasetCommands, EnrichedCommands, IntegrityCommands};
use migrate::MigrateDirection;

#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    #[clap(short, long, global = true)]
    log_level: Option<String>,
    /// YAML engine configuration file
    #[clap(short, long, global = true)]
    config: Option<PathBuf>,
    /// SQLite database file, overrides the configured database URL
    #[clap(short, long, global = true)]
    database: Option<String>,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Db {
        #[clap(subcommand)]
        command: DbCommands,
    },
    Dataset {
        #[clap(subcommand)]
        command: DatasetCommands,
    },
    Enriched {
        #[clap(subcommand)]
        command: EnrichedCommands,
    },
    Integrity {
        #[clap(subcommand)]
        command: IntegrityCommands,
    },
}

#[derive(Subcommand)]
enum DbCommands {
    /// Create the database and apply all migrations
    Init,
    Migrate {
        #[clap(subcommand)]
        direction: MigrateDirection,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    setup_logging(&args.log_level);

    let config = load_config(args.config.as_ref(), args.database.as_deref())?;

    match args.command {
        Commands::Db { command } => match command {
            DbCommands::Init => migrate::init_database(&config.database_url).await?,
            DbCommands::Migrate { direction } => {
                migrate::migrate_database(&config.database_url, direction).await?
            }
        },
        Commands::Dataset { command } => {
            let ctx = AppContext::connect(config).await?;
            commands::run_dataset(&ctx, command).await?;
        }
        Commands::Enriched { command } => {
            let ctx = AppContext::connect(config).await?;
            commands::run_enriched(&ctx, command).await?;
        }
        Commands::Integrity { command } => {
            let ctx = AppContext::connect(config).await?;
            commands::run_integrity(&ctx, command).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>, database: Option<&str>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Could not load configuration from {}", path.display()))?,
        None => EngineConfig::from_env(),
    };
    if let Some(database) = database {
        config.database_url = get_database_url(Some(database));
    }
    config.validate()?;
    Ok(config)
}

fn setup_logging(log_level: &Option<String>) {
    let log_level = match log_level
        .as_deref()
        .map(|level| level.to_lowercase())
        .as_deref()
    {
        Some("trace") => Level::TRACE,
        Some("debug") => Level::DEBUG,
        Some("info") => Level::INFO,
        Some("warn") => Level::WARN,
        Some("error") => Level::ERROR,
        _ => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(format!("sqlx=warn,{}", log_level)))
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}
