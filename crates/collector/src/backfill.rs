//! Crash-safe, single-instance historical backfill across all sources.
//!
//! One run: acquire the cross-process lock, compute a synchronized window
//! shared by every source, fetch each source's history with transient-error
//! retries, persist records and progress, write a terminal status, release
//! the lock on every path out.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};
use funding_connectors::Connector;
use funding_core::config::{BackfillConfig, ValidationConfig};
use funding_data::FundingStore;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::lock::{LockError, RunLock};
use crate::retry::RetryPolicy;
use crate::status::{CompletenessSummary, RunStatus, StatusFile};
use crate::validation::{CompletenessStatus, CompletenessValidator};

#[derive(Debug, Error)]
pub enum BackfillError {
    /// Another instance holds the run lock. Expected signal, clean exit,
    /// zero side effects; not something to retry.
    #[error(transparent)]
    AlreadyRunning(LockError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result of one coordinator run.
#[derive(Debug, Clone)]
pub struct BackfillOutcome {
    pub unified_start: DateTime<Utc>,
    pub unified_end: DateTime<Utc>,
    pub total_records: u64,
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub dry_run: bool,
}

impl BackfillOutcome {
    /// True when every source completed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Run statistics accumulated across hourly loop iterations.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopStats {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
}

/// Everything a per-source worker needs, cheap to clone into tasks.
#[derive(Clone)]
struct SourceContext {
    store: Arc<dyn FundingStore>,
    validator: Arc<CompletenessValidator>,
    status: Arc<Mutex<RunStatus>>,
    status_file: Arc<StatusFile>,
    window: (DateTime<Utc>, DateTime<Utc>),
    days: i64,
    batch_size: usize,
    dry_run: bool,
    retry: RetryPolicy,
}

pub struct BackfillCoordinator {
    connectors: Vec<Arc<dyn Connector>>,
    store: Arc<dyn FundingStore>,
    config: BackfillConfig,
    validation: ValidationConfig,
    dry_run: bool,
}

impl BackfillCoordinator {
    /// Creates a coordinator over the given connectors and store.
    #[must_use]
    pub fn new(
        connectors: Vec<Arc<dyn Connector>>,
        store: Arc<dyn FundingStore>,
        config: BackfillConfig,
        validation: ValidationConfig,
    ) -> Self {
        Self {
            connectors,
            store,
            config,
            validation,
            dry_run: false,
        }
    }

    /// Fetch but skip all storage writes.
    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// The synchronized `[start, end)` window every source receives.
    #[must_use]
    pub fn compute_window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        compute_window(&self.config, now)
    }

    /// Runs one backfill to completion.
    ///
    /// # Errors
    /// [`BackfillError::AlreadyRunning`] when a live lock exists (no side
    /// effects have happened); otherwise any error that prevented the run
    /// from starting. Per-source failures are not errors: they are reported
    /// in the outcome while sibling sources proceed.
    pub async fn run_once(&self) -> Result<BackfillOutcome, BackfillError> {
        let lock = RunLock::new(&self.config.lock_path)
            .with_stale_after(StdDuration::from_secs(self.config.lock_stale_secs));

        let guard = match lock.acquire() {
            Ok(guard) => guard,
            Err(held @ LockError::Held { .. }) => {
                tracing::info!("{held}");
                return Err(BackfillError::AlreadyRunning(held));
            }
            Err(LockError::Io(e)) => {
                return Err(BackfillError::Other(
                    anyhow::Error::from(e).context("acquiring backfill lock"),
                ))
            }
        };

        // The guard's Drop releases the lock if execution panics or the
        // future is dropped on interruption; the explicit release below is
        // the normal path.
        let result = self.execute().await;

        if let Err(e) = guard.release() {
            tracing::error!("Failed to release backfill lock: {}", e);
        }

        result.map_err(BackfillError::Other)
    }

    async fn execute(&self) -> anyhow::Result<BackfillOutcome> {
        let window = self.compute_window(Utc::now());
        let source_names: Vec<String> = self
            .connectors
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        tracing::info!(
            "Starting backfill of {} sources over [{} .. {}){}",
            source_names.len(),
            window.0.format("%Y-%m-%d %H:%M"),
            window.1.format("%Y-%m-%d %H:%M"),
            if self.dry_run { " (dry run)" } else { "" }
        );

        let status = Arc::new(Mutex::new(RunStatus::starting(&source_names)));
        let status_file = Arc::new(StatusFile::new(&self.config.status_path));
        status_file.write(&*status.lock().await)?;

        let ctx = SourceContext {
            store: self.store.clone(),
            validator: Arc::new(CompletenessValidator::new(
                self.store.clone(),
                self.validation.clone(),
            )),
            status: status.clone(),
            status_file: status_file.clone(),
            window,
            days: self.config.days,
            batch_size: self.config.batch_size.max(1),
            dry_run: self.dry_run,
            retry: RetryPolicy::new(
                self.config.retry_attempts,
                StdDuration::from_secs(self.config.retry_base_delay_secs),
            ),
        };

        let results = if self.config.parallel {
            self.run_sources_parallel(&ctx).await
        } else {
            self.run_sources_sequential(&ctx).await
        };

        let mut outcome = BackfillOutcome {
            unified_start: window.0,
            unified_end: window.1,
            total_records: 0,
            succeeded: Vec::new(),
            failed: Vec::new(),
            dry_run: self.dry_run,
        };

        for (name, result) in results {
            match result {
                Ok(records) => {
                    outcome.total_records += records;
                    outcome.succeeded.push(name);
                }
                Err(message) => outcome.failed.push((name, message)),
            }
        }

        let message = format!(
            "backfill finished: {} records, {} sources ok, {} failed",
            outcome.total_records,
            outcome.succeeded.len(),
            outcome.failed.len()
        );
        tracing::info!("{}", message);
        for (name, error) in &outcome.failed {
            tracing::warn!("Source {} failed: {}", name, error);
        }

        {
            let mut s = status.lock().await;
            s.running = false;
            s.completed = true;
            s.total_records = outcome.total_records;
            s.overall_progress = 100.0;
            s.message = message;
            status_file.write(&s)?;
        }

        Ok(outcome)
    }

    async fn run_sources_sequential(
        &self,
        ctx: &SourceContext,
    ) -> Vec<(String, Result<u64, String>)> {
        let mut results = Vec::with_capacity(self.connectors.len());
        for connector in &self.connectors {
            let name = connector.name().to_string();
            let result = run_source(connector.clone(), ctx.clone()).await;
            results.push((name, result));
        }
        results
    }

    async fn run_sources_parallel(
        &self,
        ctx: &SourceContext,
    ) -> Vec<(String, Result<u64, String>)> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers));
        let mut tasks: JoinSet<(String, Result<u64, String>)> = JoinSet::new();

        for connector in &self.connectors {
            let connector = connector.clone();
            let ctx = ctx.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let name = connector.name().to_string();
                let result = run_source(connector, ctx).await;
                (name, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(entry) => results.push(entry),
                Err(e) => {
                    tracing::error!("Backfill worker panicked: {}", e);
                }
            }
        }
        results
    }

    /// Runs hourly until interrupted, accumulating loop statistics.
    ///
    /// Each iteration starts at the next UTC hour boundary. Ctrl-C during
    /// the sleep exits the loop; Ctrl-C mid-run drops the run future, whose
    /// lock guard releases the lock on the way out.
    pub async fn run_hourly(&self) -> LoopStats {
        let mut stats = LoopStats::default();

        loop {
            stats.total_runs += 1;
            match self.run_once().await {
                Ok(outcome) if outcome.is_success() => stats.successful_runs += 1,
                Ok(outcome) => {
                    stats.failed_runs += 1;
                    tracing::warn!(
                        "Run finished with {} failed sources",
                        outcome.failed.len()
                    );
                }
                Err(BackfillError::AlreadyRunning(e)) => {
                    stats.failed_runs += 1;
                    tracing::warn!("Skipping iteration: {}", e);
                }
                Err(e) => {
                    stats.failed_runs += 1;
                    tracing::error!("Backfill run failed: {}", e);
                }
            }

            tracing::info!(
                "Loop stats: {} runs, {} successful, {} failed",
                stats.total_runs,
                stats.successful_runs,
                stats.failed_runs
            );

            let wait = duration_until_next_hour(Utc::now());
            tracing::info!("Sleeping {:?} until the next UTC hour boundary", wait);
            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted, exiting hourly loop");
                    break;
                }
            }
        }

        stats
    }
}

/// Fetches, stores, and sanity-checks one source.
///
/// Returns the fetched record count, or the failure message for this source
/// alone; siblings are unaffected either way.
async fn run_source(connector: Arc<dyn Connector>, ctx: SourceContext) -> Result<u64, String> {
    let name = connector.name().to_string();
    let started = Instant::now();
    let (window_start, window_end) = ctx.window;

    update_status(&ctx, |s| {
        if let Some(p) = s.exchanges.get_mut(&name) {
            p.status = "running".to_string();
        }
    })
    .await;

    // Best-effort symbol count for progress estimates.
    let total_symbols = match connector.list_active_symbols().await {
        Ok(symbols) => symbols.len() as u64,
        Err(e) => {
            tracing::debug!("Could not list {} symbols for progress: {}", name, e);
            0
        }
    };
    update_status(&ctx, |s| {
        if let Some(p) = s.exchanges.get_mut(&name) {
            p.total_symbols = total_symbols;
            p.elapsed_time = started.elapsed().as_secs_f64();
        }
    })
    .await;

    let fetch = ctx
        .retry
        .run(&name, || {
            let connector = connector.clone();
            async move {
                connector
                    .fetch_historical(window_start, window_end)
                    .await
                    .map_err(anyhow::Error::from)
            }
        })
        .await;

    let records = match fetch {
        Ok(records) => records,
        Err(e) => {
            let message = e.to_string();
            update_status(&ctx, |s| {
                if let Some(p) = s.exchanges.get_mut(&name) {
                    p.status = format!("failed: {message}");
                    p.elapsed_time = started.elapsed().as_secs_f64();
                    p.estimated_remaining = None;
                }
            })
            .await;
            return Err(message);
        }
    };

    tracing::info!(
        "Source {} fetched {} historical records in {:.1}s",
        name,
        records.len(),
        started.elapsed().as_secs_f64()
    );

    let mut symbols_seen: BTreeSet<String> = BTreeSet::new();
    let mut fetched: u64 = 0;

    for chunk in records.chunks(ctx.batch_size) {
        if !ctx.dry_run {
            if let Err(e) = ctx.store.insert_historical(chunk).await {
                // A failed write loses this chunk only; the run continues.
                tracing::error!(
                    "Failed to store a batch of {} records for {}: {}",
                    chunk.len(),
                    name,
                    e
                );
            }
        }

        fetched += chunk.len() as u64;
        for record in chunk {
            symbols_seen.insert(record.symbol.clone());
        }

        let processed = symbols_seen.len() as u64;
        update_status(&ctx, |s| {
            if let Some(p) = s.exchanges.get_mut(&name) {
                p.records_fetched = fetched;
                p.symbols_processed = processed;
                p.elapsed_time = started.elapsed().as_secs_f64();
                p.estimated_remaining = if processed > 0 && total_symbols > processed {
                    let per_symbol = started.elapsed().as_secs_f64() / processed as f64;
                    Some(per_symbol * (total_symbols - processed) as f64)
                } else {
                    None
                };
            }
            s.total_records += chunk.len() as u64;
        })
        .await;
    }

    // Inline completeness sanity check; shortfalls are logged, never fatal.
    if !ctx.dry_run && !symbols_seen.is_empty() {
        let mut complete: u64 = 0;
        for symbol in &symbols_seen {
            let report = ctx.validator.validate(&name, symbol, ctx.days).await;
            if report.status == CompletenessStatus::Complete {
                complete += 1;
            } else {
                tracing::warn!(
                    "{}:{} is {} after backfill ({:.1}%, {} gaps)",
                    name,
                    symbol,
                    report.status.as_str(),
                    report.completeness_pct,
                    report.gaps.len()
                );
            }
        }

        let total = symbols_seen.len() as u64;
        let summary = CompletenessSummary {
            complete,
            total,
            percentage: complete as f64 / total as f64 * 100.0,
        };
        update_status(&ctx, |s| {
            s.completeness.insert(name.clone(), summary);
        })
        .await;
    }

    update_status(&ctx, |s| {
        if let Some(p) = s.exchanges.get_mut(&name) {
            p.status = "completed".to_string();
            p.symbols_processed = symbols_seen.len() as u64;
            p.elapsed_time = started.elapsed().as_secs_f64();
            p.estimated_remaining = None;
        }
    })
    .await;

    Ok(fetched)
}

/// Applies a mutation to the shared status and persists it atomically.
async fn update_status<F: FnOnce(&mut RunStatus)>(ctx: &SourceContext, mutate: F) {
    let mut status = ctx.status.lock().await;
    mutate(&mut status);
    status.refresh_overall_progress();
    if let Err(e) = ctx.status_file.write(&status) {
        tracing::error!("Failed to persist run status: {}", e);
    }
}

/// The synchronized `[start, end)` window for a run starting at `now`.
///
/// The start may be floored to UTC midnight for day-aligned series; the end
/// never is, so the freshest hours are always included.
#[must_use]
pub fn compute_window(
    config: &BackfillConfig,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let end = now;
    let mut start = end - Duration::days(config.days);
    if config.floor_start_to_midnight {
        start = start.date_naive().and_time(NaiveTime::MIN).and_utc();
    }
    (start, end)
}

/// Time until the next UTC hour boundary.
#[must_use]
pub fn duration_until_next_hour(now: DateTime<Utc>) -> StdDuration {
    let this_hour = now
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    let next_hour = this_hour + Duration::hours(1);
    (next_hour - now).to_std().unwrap_or(StdDuration::ZERO)
}
