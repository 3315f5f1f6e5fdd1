use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use festnews_sync::{connect_store, pipeline_from_config, DatabaseConfig, SyncConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "festnews")]
#[command(about = "Poll festival news and keep festival details in sync")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Load festival details, then poll news until stopped.
    Run,
    /// Load festival details and run a single news pass.
    Once,
    /// Only load festival details.
    LoadDetails,
    /// Apply database migrations.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let pipeline = pipeline_from_config(load_config()?).await?;
            let targets = pipeline.bootstrap().await?;
            tokio::select! {
                _ = pipeline.run_forever(&targets) => {}
                signal = tokio::signal::ctrl_c() => {
                    if let Err(err) = signal {
                        warn!(error = %err, "failed to listen for ctrl-c");
                    }
                    info!("shutting down");
                }
            }
        }
        Commands::Once => {
            let pipeline = pipeline_from_config(load_config()?).await?;
            let targets = pipeline.bootstrap().await?;
            let summary = pipeline.run_pass(&targets).await;
            println!(
                "pass complete: run_id={} festivals={} failures={} recent={} saved={} skipped={}",
                summary.run_id,
                summary.festivals,
                summary.search_failures,
                summary.recent_articles,
                summary.persisted.saved(),
                summary.persisted.skipped
            );
        }
        Commands::LoadDetails => {
            let pipeline = pipeline_from_config(load_config()?).await?;
            let summary = pipeline.load_details().await?;
            println!(
                "details loaded: files={} inserted={} updated={} skipped={} failed_files={}",
                summary.files,
                summary.inserted,
                summary.updated,
                summary.skipped_items,
                summary.failed_files.len()
            );
        }
        Commands::Migrate => {
            let database = DatabaseConfig::from_env().context("loading database configuration")?;
            connect_store(&database).await?;
            println!("migrations applied");
        }
    }

    Ok(())
}

fn load_config() -> Result<SyncConfig> {
    SyncConfig::from_env().context("loading configuration")
}
