use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub collection: CollectionConfig,
    pub rate_limit: RateLimitConfig,
    pub validation: ValidationConfig,
    pub backfill: BackfillConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Seconds between collection cycles.
    pub interval_secs: u64,
    /// Worker pool size, independent of the number of sources.
    pub max_workers: usize,
    /// Deadline for a single source's fetch.
    pub per_source_timeout_secs: u64,
    /// Deadline for the whole cycle.
    pub global_deadline_secs: u64,
    /// Sources enabled for collection; empty means all registered sources.
    pub enabled_sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Fallback request rate for sources without an override.
    pub default_requests_per_sec: f64,
    /// Per-source request rate overrides.
    pub per_source: HashMap<String, f64>,
    /// Backoff applied when a source reports throttling without a Retry-After.
    pub throttle_backoff_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Window length for completeness checks.
    pub window_days: i64,
    /// A contract at or above this percentage is complete.
    pub completeness_threshold_pct: f64,
    /// Fraction of the funding interval tolerated between consecutive points.
    pub gap_tolerance: f64,
    /// Number of recent timestamps sampled for interval detection.
    pub interval_sample_size: i64,
    /// Retry-priority weight for missing completeness.
    pub weight_completeness: f64,
    /// Retry-priority weight for gap count.
    pub weight_gaps: f64,
    /// Retry-priority weight for having meaningful existing history.
    pub weight_history: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackfillConfig {
    /// Days of history to backfill.
    pub days: i64,
    /// Records per storage write.
    pub batch_size: usize,
    /// Run sources in parallel rather than sequentially.
    pub parallel: bool,
    /// Concurrent source workers when parallel.
    pub max_workers: usize,
    /// Floor the unified start (never the end) to UTC midnight.
    pub floor_start_to_midnight: bool,
    /// Run lock file path.
    pub lock_path: String,
    /// Run status file path.
    pub status_path: String,
    /// Age after which a run lock is considered stale.
    pub lock_stale_secs: u64,
    /// Attempts per source for transient failures.
    pub retry_attempts: u32,
    /// Base delay for exponential retry backoff.
    pub retry_base_delay_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/funding_rates".to_string(),
            max_connections: 10,
        }
    }
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            max_workers: 10,
            per_source_timeout_secs: 60,
            global_deadline_secs: 300,
            enabled_sources: Vec::new(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_requests_per_sec: 5.0,
            per_source: HashMap::new(),
            throttle_backoff_secs: 60,
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            completeness_threshold_pct: 95.0,
            gap_tolerance: 0.5,
            interval_sample_size: 100,
            weight_completeness: 0.5,
            weight_gaps: 0.3,
            weight_history: 0.2,
        }
    }
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            days: 30,
            batch_size: 500,
            parallel: false,
            max_workers: 4,
            floor_start_to_midnight: true,
            lock_path: "data/backfill.lock".to_string(),
            status_path: "data/backfill_status.json".to_string(),
            lock_stale_secs: 600,
            retry_attempts: 3,
            retry_base_delay_secs: 1,
        }
    }
}

impl AppConfig {
    /// Checks invariants once at startup.
    ///
    /// # Errors
    /// Returns an error describing the first invalid setting found.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(1..=90).contains(&self.backfill.days) {
            anyhow::bail!("backfill.days must be between 1 and 90");
        }
        if self.backfill.retry_attempts == 0 {
            anyhow::bail!("backfill.retry_attempts must be at least 1");
        }
        if self.rate_limit.default_requests_per_sec <= 0.0 {
            anyhow::bail!("rate_limit.default_requests_per_sec must be positive");
        }
        if let Some((source, rate)) = self
            .rate_limit
            .per_source
            .iter()
            .find(|(_, rate)| **rate <= 0.0)
        {
            anyhow::bail!("rate_limit.per_source.{source} must be positive, got {rate}");
        }
        if self.validation.gap_tolerance < 0.0 {
            anyhow::bail!("validation.gap_tolerance must not be negative");
        }
        if !(0.0..=100.0).contains(&self.validation.completeness_threshold_pct) {
            anyhow::bail!("validation.completeness_threshold_pct must be within 0-100");
        }
        if self.collection.max_workers == 0 || self.backfill.max_workers == 0 {
            anyhow::bail!("worker pool sizes must be at least 1");
        }
        Ok(())
    }
}
