use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use serde::Serialize;

use wrangler::app_context::{DatasetCreateRequest, EnrichedCreateRequest};
use wrangler::services::SchemaOwner;
use wrangler::table::{ColumnDefinition, FieldValue, Row};
use wrangler::AppContext;

use crate::args::{parse_column, parse_enrichment};

#[derive(Subcommand)]
pub enum DatasetCommands {
    Create {
        #[clap(long)]
        slot: i32,
        #[clap(long)]
        name: String,
        /// Column as NAME:TYPE[:image], repeat in column order
        #[clap(long = "column", required = true, value_parser = parse_column)]
        columns: Vec<ColumnDefinition>,
        #[clap(long)]
        duplicate_key: Option<String>,
    },
    List,
    /// Import a CSV file whose header matches the dataset columns
    Import {
        id: i32,
        file: PathBuf,
    },
    /// Merge rows from a JSON array of objects
    Merge {
        id: i32,
        file: PathBuf,
    },
    Stats {
        id: i32,
    },
    Rows {
        id: i32,
        #[clap(long, default_value_t = 0)]
        offset: u64,
        #[clap(long)]
        limit: Option<u64>,
    },
    /// Flag columns as holding embedded images
    FlagImages {
        id: i32,
        #[clap(required = true)]
        columns: Vec<String>,
    },
    Delete {
        id: i32,
    },
}

#[derive(Subcommand)]
pub enum EnrichedCommands {
    Create {
        #[clap(long)]
        source: i32,
        #[clap(long)]
        name: String,
        /// Enrichment as COLUMN=FUNCTION, repeat in output order
        #[clap(long = "enrich", required = true, value_parser = parse_enrichment)]
        enrichments: Vec<(String, String)>,
    },
    List {
        #[clap(long)]
        source: Option<i32>,
    },
    Sync {
        id: i32,
    },
    /// Recompute every enriched dataset derived from a source dataset
    SyncAll {
        source: i32,
    },
    Status {
        id: i32,
    },
    Rows {
        id: i32,
        #[clap(long, default_value_t = 0)]
        offset: u64,
        #[clap(long)]
        limit: Option<u64>,
    },
    Delete {
        id: i32,
    },
}

#[derive(Subcommand)]
pub enum IntegrityCommands {
    Check,
    Cleanup {
        /// Report what would be removed without changing anything
        #[clap(long)]
        dry_run: bool,
    },
}

pub async fn run_dataset(ctx: &AppContext, command: DatasetCommands) -> Result<()> {
    match command {
        DatasetCommands::Create {
            slot,
            name,
            columns,
            duplicate_key,
        } => {
            let summary = ctx
                .create_dataset(DatasetCreateRequest {
                    slot,
                    name,
                    columns,
                    duplicate_key,
                })
                .await?;
            print_json(&summary)
        }
        DatasetCommands::List => print_json(&ctx.list_datasets().await?),
        DatasetCommands::Import { id, file } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let result = ctx.import_csv(id, &file_name(&file)?, &bytes).await?;
            print_json(&result)
        }
        DatasetCommands::Merge { id, file } => {
            let rows = read_rows(&file)?;
            print_json(&ctx.merge_rows(id, rows).await?)
        }
        DatasetCommands::Stats { id } => print_json(&ctx.dataset_statistics(id).await?),
        DatasetCommands::Rows { id, offset, limit } => {
            print_json(&ctx.load_rows(SchemaOwner::Dataset(id), offset, limit).await?)
        }
        DatasetCommands::FlagImages { id, columns } => {
            print_json(&ctx.update_image_columns(id, &columns).await?)
        }
        DatasetCommands::Delete { id } => print_json(&ctx.delete_dataset(id).await?),
    }
}

pub async fn run_enriched(ctx: &AppContext, command: EnrichedCommands) -> Result<()> {
    match command {
        EnrichedCommands::Create {
            source,
            name,
            enrichments,
        } => {
            let summary = ctx
                .create_enriched_dataset(EnrichedCreateRequest {
                    source_dataset_id: source,
                    name,
                    enrichments,
                })
                .await?;
            print_json(&summary)
        }
        EnrichedCommands::List { source } => {
            print_json(&ctx.list_enriched_datasets(source).await?)
        }
        EnrichedCommands::Sync { id } => print_json(&ctx.sync_enriched_dataset(id).await?),
        EnrichedCommands::SyncAll { source } => {
            print_json(&ctx.sync_all_for_source(source).await?)
        }
        EnrichedCommands::Status { id } => print_json(&ctx.enriched_status(id).await?),
        EnrichedCommands::Rows { id, offset, limit } => {
            print_json(&ctx.load_rows(SchemaOwner::Enriched(id), offset, limit).await?)
        }
        EnrichedCommands::Delete { id } => print_json(&ctx.delete_enriched_dataset(id).await?),
    }
}

pub async fn run_integrity(ctx: &AppContext, command: IntegrityCommands) -> Result<()> {
    match command {
        IntegrityCommands::Check => print_json(&ctx.check_integrity().await?),
        IntegrityCommands::Cleanup { dry_run } => {
            print_json(&ctx.cleanup_integrity(dry_run).await?)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .with_context(|| format!("{} has no usable file name", path.display()))
}

fn read_rows(path: &Path) -> Result<Vec<Row>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;

    let serde_json::Value::Array(items) = value else {
        bail!("{} must contain a JSON array of objects", path.display());
    };
    items
        .iter()
        .enumerate()
        .map(|(index, item)| match item {
            serde_json::Value::Object(fields) => Ok(fields
                .iter()
                .map(|(name, value)| (name.clone(), FieldValue::from_json(value)))
                .collect::<Row>()),
            _ => bail!("Row {} in {} is not a JSON object", index, path.display()),
        })
        .collect()
}
