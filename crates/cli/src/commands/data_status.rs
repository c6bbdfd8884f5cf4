//! Data status CLI command.
//!
//! Queries the funding tables for record counts and date ranges, a quick
//! availability check before running a backfill or the analytics layer.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use funding_core::ConfigLoader;
use sqlx::PgPool;

/// Arguments for the data-status command.
#[derive(Args, Debug, Clone)]
pub struct DataStatusArgs {
    /// Source to filter by (e.g., "binance"). If not provided, shows all.
    #[arg(long)]
    pub source: Option<String>,

    /// Database connection URL (uses DATABASE_URL env var if not provided)
    #[arg(long, env = "DATABASE_URL")]
    pub db_url: Option<String>,
}

/// Bounds for a single table.
#[derive(Debug)]
struct TableStatus {
    table_name: String,
    record_count: i64,
    contracts: i64,
    earliest: Option<DateTime<Utc>>,
    latest: Option<DateTime<Utc>>,
}

impl TableStatus {
    fn format_date(dt: Option<DateTime<Utc>>) -> String {
        dt.map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "N/A".to_string())
    }

    fn duration_days(&self) -> Option<f64> {
        match (self.earliest, self.latest) {
            (Some(e), Some(l)) => Some((l - e).num_hours() as f64 / 24.0),
            _ => None,
        }
    }
}

/// Runs the data-status command.
///
/// # Errors
/// Returns an error if the database connection or queries fail.
pub async fn run_data_status(args: DataStatusArgs) -> Result<()> {
    let config = ConfigLoader::load()?;
    let db_url = args.db_url.unwrap_or_else(|| config.database.url.clone());
    let pool = funding_data::connect(&db_url, 5).await?;
    tracing::info!("Connected to database");

    let mut statuses = Vec::new();
    for table in ["funding_rates_current", "funding_rates_historical"] {
        match query_table_status(&pool, table, args.source.as_deref()).await {
            Ok(status) => statuses.push(status),
            Err(e) => {
                tracing::warn!("Failed to query {}: {}", table, e);
                statuses.push(TableStatus {
                    table_name: table.to_string(),
                    record_count: 0,
                    contracts: 0,
                    earliest: None,
                    latest: None,
                });
            }
        }
    }

    print_report(&statuses, args.source.as_deref());
    Ok(())
}

async fn query_table_status(
    pool: &PgPool,
    table: &str,
    source_filter: Option<&str>,
) -> Result<TableStatus> {
    let where_clause = source_filter
        .map(|s| format!("WHERE source = '{}'", s.replace('\'', "''")))
        .unwrap_or_default();

    let counts_query = format!(
        "SELECT COUNT(*), COUNT(DISTINCT (source, symbol)) FROM {table} {where_clause}"
    );
    let counts: (i64, i64) = sqlx::query_as(&counts_query).fetch_one(pool).await?;

    let bounds_query =
        format!("SELECT MIN(observed_at), MAX(observed_at) FROM {table} {where_clause}");
    let bounds: (Option<DateTime<Utc>>, Option<DateTime<Utc>>) =
        sqlx::query_as(&bounds_query).fetch_one(pool).await?;

    Ok(TableStatus {
        table_name: table.to_string(),
        record_count: counts.0,
        contracts: counts.1,
        earliest: bounds.0,
        latest: bounds.1,
    })
}

fn print_report(statuses: &[TableStatus], source_filter: Option<&str>) {
    println!();
    println!("{}", "=".repeat(96));
    println!("FUNDING DATA STATUS");
    if let Some(source) = source_filter {
        println!("Filter: source = {source}");
    }
    println!("{}", "=".repeat(96));
    println!(
        "{:<28} {:>12} {:>10} {:>20} {:>20}",
        "Table", "Records", "Contracts", "Earliest", "Latest"
    );
    println!("{}", "-".repeat(96));

    for status in statuses {
        println!(
            "{:<28} {:>12} {:>10} {:>20} {:>20}",
            status.table_name,
            format_count(status.record_count),
            status.contracts,
            TableStatus::format_date(status.earliest),
            TableStatus::format_date(status.latest),
        );
    }
    println!("{}", "=".repeat(96));

    let historical = statuses
        .iter()
        .find(|s| s.table_name == "funding_rates_historical");
    println!();
    match historical {
        Some(h) if h.record_count > 0 => {
            println!(
                "Historical coverage: {} contracts over {:.1} days.",
                h.contracts,
                h.duration_days().unwrap_or(0.0)
            );
            println!("Run `funding-rates validate` for per-contract completeness.");
        }
        _ => {
            println!("No historical data yet. Run `funding-rates backfill --days 30` to seed it.");
        }
    }
    println!();
}

fn format_count(count: i64) -> String {
    if count >= 1_000_000 {
        format!("{:.1}M", count as f64 / 1_000_000.0)
    } else if count >= 1_000 {
        format!("{:.1}K", count as f64 / 1_000.0)
    } else {
        count.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(5_500), "5.5K");
        assert_eq!(format_count(2_500_000), "2.5M");
    }

    #[test]
    fn test_format_date() {
        let dt = Utc.with_ymd_and_hms(2025, 6, 15, 12, 30, 45).unwrap();
        assert_eq!(TableStatus::format_date(Some(dt)), "2025-06-15 12:30:45");
        assert_eq!(TableStatus::format_date(None), "N/A");
    }

    #[test]
    fn test_duration_days() {
        let status = TableStatus {
            table_name: "funding_rates_historical".to_string(),
            record_count: 90,
            contracts: 1,
            earliest: Some(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()),
            latest: Some(Utc.with_ymd_and_hms(2025, 6, 8, 0, 0, 0).unwrap()),
        };
        let days = status.duration_days().unwrap();
        assert!((days - 7.0).abs() < 0.01);
    }
}
