//! Collect CLI command.
//!
//! Runs snapshot collection cycles across all enabled sources, upserting the
//! unified batch into the current table.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use funding_collector::CollectionOrchestrator;
use funding_connectors::SourceRateLimiter;
use funding_core::ConfigLoader;
use funding_data::{FundingRateRepository, FundingStore};

use super::{build_connectors, parse_source_list};

/// Arguments for the collect command.
#[derive(Args, Debug, Clone)]
pub struct CollectArgs {
    /// Seconds between cycles (overrides configuration)
    #[arg(long)]
    pub interval_secs: Option<u64>,

    /// Run a single cycle and exit
    #[arg(long, default_value = "false")]
    pub once: bool,

    /// Comma-separated sources (default: all known sources)
    #[arg(long, default_value = "all")]
    pub sources: String,

    /// Database connection URL (uses DATABASE_URL env var if not provided)
    #[arg(long, env = "DATABASE_URL")]
    pub db_url: Option<String>,
}

/// Runs the collect command.
///
/// # Errors
/// Returns an error if configuration, database connection, or connector
/// construction fails.
pub async fn run_collect(args: CollectArgs) -> Result<()> {
    let mut config = ConfigLoader::load()?;
    if let Some(interval) = args.interval_secs {
        config.collection.interval_secs = interval;
    }
    if let Some(sources) = parse_source_list(&args.sources) {
        config.collection.enabled_sources = sources;
    }

    let db_url = args.db_url.unwrap_or_else(|| config.database.url.clone());
    let pool = funding_data::connect(&db_url, config.database.max_connections).await?;
    tracing::info!("Connected to database");

    let store: Arc<dyn FundingStore> = Arc::new(FundingRateRepository::new(pool));
    let limiter = Arc::new(SourceRateLimiter::new(&config.rate_limit));
    let enabled = if config.collection.enabled_sources.is_empty() {
        None
    } else {
        Some(config.collection.enabled_sources.clone())
    };
    let connectors = build_connectors(enabled.as_deref(), &limiter)?;

    let orchestrator = CollectionOrchestrator::new(connectors, store, config.collection.clone());

    if args.once {
        let batch = orchestrator.collect_and_store().await;
        println!("{}", batch.summary());
        for (name, status) in batch.failed_sources() {
            println!("  {name}: {}", status.as_str());
        }
        return Ok(());
    }

    tracing::info!(
        "Collecting every {}s. Ctrl+C to stop.",
        config.collection.interval_secs
    );
    tokio::select! {
        () = orchestrator.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, stopping collection");
        }
    }

    Ok(())
}
