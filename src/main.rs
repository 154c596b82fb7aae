use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use clincode_lib::config::{self, ServiceConfig};
use clincode_lib::crypto::{NoteKey, SealingGateway};
use clincode_lib::db::{open_database, PersistenceGateway, SqliteGateway};
use clincode_lib::pipeline::CodingPipeline;
use clincode_lib::{api, seed};

#[derive(Parser)]
#[command(name = "clincode")]
#[command(version, about = "Clinical note coding service")]
struct Cli {
    /// Environment file loaded before configuration is read
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API (default)
    Serve,
    /// Generate a new note encryption key
    Keygen {
        /// Key file to create; defaults to ENCRYPTION_KEY
        path: Option<PathBuf>,
        /// Replace an existing key file. Notes sealed with the old key become unreadable.
        #[arg(long)]
        force: bool,
    },
    /// Ingest every .txt visit note in a directory
    Seed {
        dir: PathBuf,
        #[arg(long)]
        locality: Option<String>,
    },
    /// Load a tab-delimited Medicare locality configuration file
    SeedLocalities { file: PathBuf },
    /// Load a tab-delimited physician fee schedule file
    SeedFees { file: PathBuf },
    /// Print the billing estimate for one patient
    Estimate { patient_id: String },
    /// Analyze one note by id
    Analyze { note_id: String },
    /// Analyze every note without an analysis record
    AnalyzeAll,
}

fn open_store(config: &ServiceConfig) -> Result<Arc<dyn PersistenceGateway>, Box<dyn std::error::Error>> {
    let conn = open_database(&config.database_path)?;
    Ok(Arc::new(SqliteGateway::new(conn)))
}

fn build_pipeline(config: &ServiceConfig) -> Result<Arc<CodingPipeline>, Box<dyn std::error::Error>> {
    let store = open_store(config)?;
    Ok(Arc::new(CodingPipeline::from_config(config, store)?))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn keygen(path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    NoteKey::write_new(path, force)?;
    println!("Wrote new encryption key to {}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    match dotenvy::from_path(&cli.env_file) {
        Ok(()) => {}
        Err(e) if e.not_found() => {}
        Err(e) => return Err(e.into()),
    }
    clincode_lib::init_tracing();

    let config = ServiceConfig::from_env()?;
    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let pipeline = build_pipeline(&config)?;
            let server = api::start_api_server(pipeline, config.api.clone()).await?;
            server.wait_for_ctrl_c().await;
        }
        Commands::Keygen { path, force } => {
            let path = path.unwrap_or_else(|| config.encryption.key_path.clone());
            keygen(&path, force)?;
        }
        Commands::Seed { dir, locality } => {
            let store = open_store(&config)?;
            let sealer = SealingGateway::from_config(&config.encryption)?;
            let seeded =
                seed::seed_directory(store.as_ref(), &sealer, &dir, locality.as_deref()).await?;
            for note in &seeded {
                println!(
                    "{}\t{}\t{:?}",
                    note.file.display(),
                    note.patient_note_id,
                    note.outcome
                );
            }
        }
        Commands::SeedLocalities { file } => {
            let inserted = seed::seed_medicare_localities(open_store(&config)?.as_ref(), &file).await?;
            println!("{inserted} new localities");
        }
        Commands::SeedFees { file } => {
            let inserted = seed::seed_fee_schedule(open_store(&config)?.as_ref(), &file).await?;
            println!("{inserted} new fee schedule rows");
        }
        Commands::Estimate { patient_id } => {
            let estimate = build_pipeline(&config)?.estimate_billing(&patient_id).await?;
            print_json(&estimate)?;
        }
        Commands::Analyze { note_id } => {
            let outcome = build_pipeline(&config)?.analyze_note(&note_id).await?;
            print_json(&outcome)?;
            if !outcome.succeeded() {
                std::process::exit(2);
            }
        }
        Commands::AnalyzeAll => {
            let batch = build_pipeline(&config)?.analyze_all_pending().await?;
            print_json(&batch)?;
            if !batch.succeeded() {
                std::process::exit(2);
            }
        }
    }
    Ok(())
}
