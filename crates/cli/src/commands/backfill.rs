//! Backfill CLI command.
//!
//! Drives a crash-safe, single-instance historical backfill. Exit codes:
//! 0 on success, 1 on failure, 2 when another instance holds the run lock.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use funding_collector::{BackfillCoordinator, BackfillError};
use funding_connectors::SourceRateLimiter;
use funding_core::ConfigLoader;
use funding_data::{FundingRateRepository, FundingStore};

use super::{build_connectors, parse_source_list};

/// Exit code when another backfill instance holds the run lock.
const EXIT_LOCK_HELD: i32 = 2;

/// Arguments for the backfill command.
#[derive(Args, Debug, Clone)]
pub struct BackfillArgs {
    /// Days of history to fetch (1-90)
    #[arg(long, value_parser = clap::value_parser!(i64).range(1..=90))]
    pub days: Option<i64>,

    /// Records per storage write
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Comma-separated sources (default: all known sources)
    #[arg(long, default_value = "all")]
    pub exchanges: String,

    /// Run sources in parallel instead of sequentially
    #[arg(long, default_value = "false")]
    pub parallel: bool,

    /// Concurrent source workers when parallel
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Fetch everything but skip storage writes
    #[arg(long, default_value = "false")]
    pub dry_run: bool,

    /// Repeat at every UTC hour boundary until interrupted
    #[arg(long, default_value = "false")]
    pub loop_hourly: bool,

    /// Database connection URL (uses DATABASE_URL env var if not provided)
    #[arg(long, env = "DATABASE_URL")]
    pub db_url: Option<String>,
}

/// Runs the backfill command.
///
/// # Errors
/// Returns an error if configuration, database connection, or connector
/// construction fails, or if the run itself fails. A held lock exits the
/// process with code 2 instead of returning.
pub async fn run_backfill(args: BackfillArgs) -> Result<()> {
    let mut config = ConfigLoader::load()?;
    if let Some(days) = args.days {
        config.backfill.days = days;
    }
    if let Some(batch_size) = args.batch_size {
        config.backfill.batch_size = batch_size;
    }
    if args.parallel {
        config.backfill.parallel = true;
    }
    if let Some(max_workers) = args.max_workers {
        config.backfill.max_workers = max_workers;
    }
    config.validate()?;

    let db_url = args.db_url.unwrap_or_else(|| config.database.url.clone());
    let pool = funding_data::connect(&db_url, config.database.max_connections).await?;
    tracing::info!("Connected to database");

    let store: Arc<dyn FundingStore> = Arc::new(FundingRateRepository::new(pool));
    let limiter = Arc::new(SourceRateLimiter::new(&config.rate_limit));
    let sources = parse_source_list(&args.exchanges);
    let connectors = build_connectors(sources.as_deref(), &limiter)?;

    let coordinator = BackfillCoordinator::new(
        connectors,
        store,
        config.backfill.clone(),
        config.validation.clone(),
    )
    .dry_run(args.dry_run);

    if args.loop_hourly {
        let stats = coordinator.run_hourly().await;
        println!(
            "Hourly loop finished: {} runs, {} successful, {} failed",
            stats.total_runs, stats.successful_runs, stats.failed_runs
        );
        if stats.failed_runs > 0 && stats.successful_runs == 0 {
            anyhow::bail!("every backfill iteration failed");
        }
        return Ok(());
    }

    // Ctrl-C drops the run future; the lock guard releases on the way out.
    let run = tokio::select! {
        result = coordinator.run_once() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, lock released");
            return Ok(());
        }
    };

    match run {
        Ok(outcome) => {
            println!(
                "Backfill complete: {} records over [{} .. {}), {} sources ok, {} failed{}",
                outcome.total_records,
                outcome.unified_start.format("%Y-%m-%d %H:%M"),
                outcome.unified_end.format("%Y-%m-%d %H:%M"),
                outcome.succeeded.len(),
                outcome.failed.len(),
                if outcome.dry_run { " (dry run)" } else { "" }
            );
            for (name, error) in &outcome.failed {
                println!("  {name}: {error}");
            }
            if outcome.is_success() {
                Ok(())
            } else {
                anyhow::bail!("{} sources failed", outcome.failed.len())
            }
        }
        Err(BackfillError::AlreadyRunning(e)) => {
            eprintln!("{e}");
            std::process::exit(EXIT_LOCK_HELD);
        }
        Err(BackfillError::Other(e)) => Err(e),
    }
}
