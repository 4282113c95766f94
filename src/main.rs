use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;

use state_loader::config;
use state_loader::logging::init_tracing;
use state_loader::{
    run_load, LoaderConfig, LocalObjectStore, ObjectStore, SqliteWarehouse, Warehouse,
};

#[derive(Parser)]
#[command(
    name = "state-loader",
    version,
    about = "Load U.S. state records from object storage into a warehouse table"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    params: Params,
}

/// Deploy/trigger parameters; each flag falls back to its environment variable
#[derive(clap::Args)]
struct Params {
    #[arg(long, global = true, env = config::REGION)]
    region: Option<String>,
    #[arg(long, global = true, env = config::REGISTRY_NAME)]
    registry_name: Option<String>,
    #[arg(long, global = true, env = config::IMAGE_NAME)]
    image_name: Option<String>,
    #[arg(long, global = true, env = config::SERVICE_NAME)]
    service_name: Option<String>,
    #[arg(long, global = true, env = config::PORT)]
    port: Option<String>,
    #[arg(long, global = true, env = config::PROJECT_ID)]
    project_id: Option<String>,
    #[arg(long, global = true, env = config::DATASET)]
    dataset: Option<String>,
    #[arg(long, global = true, env = config::TABLE_NAME)]
    table_name: Option<String>,
    #[arg(long, global = true, env = config::BUCKET_NAME)]
    bucket_name: Option<String>,
    #[arg(long, global = true, env = config::SOURCE_PATH)]
    source_path: Option<String>,
    #[arg(long, global = true, env = config::STORAGE_ROOT)]
    storage_root: Option<String>,
    #[arg(long, global = true, env = config::WAREHOUSE_ROOT)]
    warehouse_root: Option<String>,
    #[arg(long, global = true, env = config::WRITE_DISPOSITION)]
    write_disposition: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Load the configured source object into the destination table
    Load,
    /// Copy a local CSV file to the configured source object
    Upload {
        #[arg(required = true)]
        file: PathBuf,
    },
    /// Create the destination table if it does not exist
    CreateTable,
    /// Print the number of rows in the destination table
    Count,
}

impl Params {
    fn resolve(self) -> Result<LoaderConfig> {
        let pairs = [
            (config::REGION, self.region),
            (config::REGISTRY_NAME, self.registry_name),
            (config::IMAGE_NAME, self.image_name),
            (config::SERVICE_NAME, self.service_name),
            (config::PORT, self.port),
            (config::PROJECT_ID, self.project_id),
            (config::DATASET, self.dataset),
            (config::TABLE_NAME, self.table_name),
            (config::BUCKET_NAME, self.bucket_name),
            (config::SOURCE_PATH, self.source_path),
            (config::STORAGE_ROOT, self.storage_root),
            (config::WAREHOUSE_ROOT, self.warehouse_root),
            (config::WRITE_DISPOSITION, self.write_disposition),
        ];

        let values: HashMap<String, String> = pairs
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| (key.to_string(), v)))
            .collect();

        Ok(LoaderConfig::from_map(&values)?)
    }
}

fn main() -> Result<()> {
    // Before clap reads env-backed flags and before RUST_LOG is consulted
    config::load_dotenv();
    init_tracing("info");

    let cli = Cli::parse();
    let config = cli.params.resolve().context("Failed to resolve configuration")?;

    tracing::debug!(
        service = %config.service_name,
        image = %config.image_uri(),
        "configuration resolved"
    );

    match cli.command {
        Command::Load => {
            let report = run_load(&config)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Upload { file } => {
            let body = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            LocalObjectStore::new(&config.storage_root).write_object(&config.source, &body)?;
            println!("✓ Uploaded {} to {}", file.display(), config.source);
        }
        Command::CreateTable => {
            SqliteWarehouse::new(&config.warehouse_root).create_table(&config.destination)?;
            println!("✓ Table {} ready", config.destination);
        }
        Command::Count => {
            let count =
                SqliteWarehouse::new(&config.warehouse_root).row_count(&config.destination)?;
            println!("{}", count);
        }
    }

    Ok(())
}
