//! Validate CLI command.
//!
//! Reports historical series completeness per contract and ranks the
//! contracts worth retrying.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use funding_collector::{
    CompletenessStatus, CompletenessValidator, ContractCompleteness, ValidationReport,
};
use funding_core::ConfigLoader;
use funding_data::{FundingRateRepository, FundingStore};

/// Arguments for the validate command.
#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    /// Window length in days (overrides configuration)
    #[arg(long)]
    pub days: Option<i64>,

    /// Validate only this source
    #[arg(long)]
    pub source: Option<String>,

    /// Validate only this symbol (requires --source)
    #[arg(long, requires = "source")]
    pub symbol: Option<String>,

    /// Maximum retry-queue rows to print
    #[arg(long, default_value = "20")]
    pub top: usize,

    /// Database connection URL (uses DATABASE_URL env var if not provided)
    #[arg(long, env = "DATABASE_URL")]
    pub db_url: Option<String>,
}

/// Runs the validate command.
///
/// # Errors
/// Returns an error if configuration, database connection, or the contract
/// listing fails.
pub async fn run_validate(args: ValidateArgs) -> Result<()> {
    let config = ConfigLoader::load()?;
    let days = args.days.unwrap_or(config.validation.window_days);

    let db_url = args.db_url.unwrap_or_else(|| config.database.url.clone());
    let pool = funding_data::connect(&db_url, config.database.max_connections).await?;
    tracing::info!("Connected to database");

    let store: Arc<dyn FundingStore> = Arc::new(FundingRateRepository::new(pool));
    let validator = CompletenessValidator::new(store, config.validation.clone());

    if let (Some(source), Some(symbol)) = (&args.source, &args.symbol) {
        let report = validator.validate(source, symbol, days).await;
        print_contract_detail(&report);
        return Ok(());
    }

    let mut report = validator.validate_all(days).await?;
    if let Some(source) = &args.source {
        report.contracts.retain(|c| &c.source == source);
        report.status_counts.clear();
        for contract in &report.contracts {
            *report.status_counts.entry(contract.status).or_insert(0) += 1;
        }
    }

    print_summary(&report, days, args.top);
    Ok(())
}

fn print_contract_detail(report: &ContractCompleteness) {
    println!();
    println!("{}:{} over {} days", report.source, report.symbol, report.window_days);
    println!("{}", "-".repeat(60));
    println!(
        "  interval:      {}",
        report
            .funding_interval_hours
            .map(|h| format!("{h}h"))
            .unwrap_or_else(|| "unknown".to_string())
    );
    println!(
        "  points:        {} of {} expected ({:.1}%)",
        report.actual_points, report.expected_points, report.completeness_pct
    );
    println!("  status:        {}", report.status.as_str());
    println!("  needs retry:   {}", report.needs_retry);
    println!("  priority:      {:.1}", report.priority);

    if report.gaps.is_empty() {
        println!("  gaps:          none");
    } else {
        println!("  gaps:");
        for gap in &report.gaps {
            println!(
                "    {} .. {} ({:?}, ~{}h, {} missing)",
                gap.start.format("%Y-%m-%d %H:%M"),
                gap.end.format("%Y-%m-%d %H:%M"),
                gap.kind,
                gap.duration().num_hours(),
                gap.missing_points
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "?".to_string())
            );
        }
    }
    if let Some(error) = &report.error {
        println!("  error:         {error}");
    }
    println!();
}

fn print_summary(report: &ValidationReport, days: i64, top: usize) {
    println!();
    println!("{}", "=".repeat(72));
    println!(
        "COMPLETENESS REPORT ({} contracts, {}-day window)",
        report.contracts.len(),
        days
    );
    println!("{}", "=".repeat(72));

    for status in [
        CompletenessStatus::Complete,
        CompletenessStatus::PartialHigh,
        CompletenessStatus::PartialMedium,
        CompletenessStatus::Incomplete,
        CompletenessStatus::NoData,
        CompletenessStatus::IntervalUnknown,
        CompletenessStatus::Error,
    ] {
        let count = report.count(status);
        if count > 0 {
            println!("  {:<18} {}", status.as_str(), count);
        }
    }

    let queue = report.retry_queue();
    if queue.is_empty() {
        println!();
        println!("Nothing needs a retry.");
        println!();
        return;
    }

    println!();
    println!("RETRY QUEUE (top {} of {}):", top.min(queue.len()), queue.len());
    println!(
        "{:<30} {:>10} {:>8} {:>6} {:>9}",
        "contract", "complete%", "points", "gaps", "priority"
    );
    println!("{}", "-".repeat(72));
    for contract in queue.iter().take(top) {
        println!(
            "{:<30} {:>10.1} {:>8} {:>6} {:>9.1}",
            format!("{}:{}", contract.source, contract.symbol),
            contract.completeness_pct,
            contract.actual_points,
            contract.gaps.len(),
            contract.priority
        );
    }
    println!();
}
