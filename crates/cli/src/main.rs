use clap::{Parser, Subcommand};

mod commands;

use commands::{BackfillArgs, CollectArgs, DataStatusArgs, ValidateArgs};

#[derive(Parser)]
#[command(name = "funding-rates")]
#[command(about = "Perpetual futures funding rate collection and backfill", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run collection cycles across all enabled sources
    Collect(CollectArgs),
    /// Run a crash-safe historical backfill
    Backfill(BackfillArgs),
    /// Validate historical series completeness and rank retries
    Validate(ValidateArgs),
    /// Show record counts and date ranges per table
    DataStatus(DataStatusArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Collect(args) => commands::run_collect(args).await?,
        Commands::Backfill(args) => commands::run_backfill(args).await?,
        Commands::Validate(args) => commands::run_validate(args).await?,
        Commands::DataStatus(args) => commands::run_data_status(args).await?,
    }

    Ok(())
}
