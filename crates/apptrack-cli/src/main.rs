use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use apptrack_core::validate_application;
use apptrack_metrics::Dashboard;
use apptrack_web::{serve, state_from_env, AppState, WebConfig};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "apptrack")]
#[command(about = "Job application tracker command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create the warehouse table and seed the option lists.
    Init,
    /// Validate a JSON record and upsert it by application_id.
    Upsert {
        #[arg(long)]
        file: PathBuf,
    },
    Delete {
        #[arg(long)]
        id: String,
    },
    /// Print every stored record as JSON, newest first.
    List,
    NextId,
    /// Print the dashboard aggregations as JSON.
    Metrics,
    /// Write a Parquet snapshot plus manifest.
    Export {
        #[arg(long, default_value = "exports")]
        dir: PathBuf,
    },
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let state = state_from_env().await?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Init => {
            let options = state.options.get().await?;
            println!(
                "ready: table={} core_skills={} application_sources={}",
                state.warehouse.table(),
                options.core_skills.len(),
                options.application_sources.len()
            );
        }
        Commands::Upsert { file } => upsert_file(&state, &file).await?,
        Commands::Delete { id } => {
            let outcome = state.warehouse.delete_by_id(&id).await?;
            println!("deleted {} row(s) for application_id={}", outcome.rows_deleted, id);
        }
        Commands::List => {
            let records = state.warehouse.fetch_all().await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Commands::NextId => {
            println!("{}", state.warehouse.next_application_id().await?);
        }
        Commands::Metrics => {
            let apps = state.warehouse.fetch_applications().await?;
            let dashboard = Dashboard::compute(&apps, state.today());
            println!("{}", serde_json::to_string_pretty(&dashboard)?);
        }
        Commands::Export { dir } => {
            let manifest = state.warehouse.export_parquet(&dir).await?;
            for file in &manifest.files {
                println!("{} rows={} sha256={}", file.path, file.rows, file.sha256);
            }
        }
        Commands::Serve => serve(state, &WebConfig::from_env()).await?,
    }

    Ok(())
}

async fn upsert_file(state: &AppState, file: &PathBuf) -> Result<()> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let payload: Value =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", file.display()))?;
    let application = validate_application(&payload, state.today())?;

    let outcome = state.warehouse.upsert(&application).await?;
    if !outcome.is_ok() {
        bail!(
            "upsert of application_id={} failed: {}",
            outcome.application_id,
            outcome.errors.join("; ")
        );
    }
    info!(application_id = %outcome.application_id, "saved");
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
