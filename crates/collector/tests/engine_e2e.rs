//! End-to-end engine scenarios against mock connectors and an in-memory store.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal_macros::dec;

use funding_collector::{
    BackfillCoordinator, BackfillError, CollectionOrchestrator, CompletenessStatus,
    CompletenessValidator, GapKind, RunLock, SourceStatus, StatusFile,
};
use funding_connectors::{Connector, ConnectorError};
use funding_core::config::{BackfillConfig, CollectionConfig, ValidationConfig};
use funding_data::{ContractRef, FundingRateRecord, FundingStore};

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// In-memory store keyed exactly like the Postgres tables.
#[derive(Default)]
struct MemoryStore {
    current: Mutex<HashMap<(String, String), FundingRateRecord>>,
    historical: Mutex<HashMap<(String, String), BTreeMap<DateTime<Utc>, FundingRateRecord>>>,
    write_calls: AtomicU64,
}

impl MemoryStore {
    fn historical_rows(&self) -> usize {
        self.historical
            .lock()
            .unwrap()
            .values()
            .map(BTreeMap::len)
            .sum()
    }

    fn seed_historical(&self, records: &[FundingRateRecord]) {
        let mut historical = self.historical.lock().unwrap();
        for record in records {
            historical
                .entry((record.source.clone(), record.symbol.clone()))
                .or_default()
                .insert(record.observed_at, record.clone());
        }
    }
}

#[async_trait]
impl FundingStore for MemoryStore {
    async fn upsert_current(&self, records: &[FundingRateRecord]) -> Result<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let mut current = self.current.lock().unwrap();
        for record in records {
            current.insert(
                (record.source.clone(), record.symbol.clone()),
                record.clone(),
            );
        }
        Ok(())
    }

    async fn insert_historical(&self, records: &[FundingRateRecord]) -> Result<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        self.seed_historical(records);
        Ok(())
    }

    async fn latest_timestamp(
        &self,
        source: &str,
        symbol: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .historical
            .lock()
            .unwrap()
            .get(&(source.to_string(), symbol.to_string()))
            .and_then(|series| series.keys().next_back().copied()))
    }

    async fn distinct_contracts(&self) -> Result<Vec<ContractRef>> {
        Ok(self
            .historical
            .lock()
            .unwrap()
            .keys()
            .map(|(source, symbol)| ContractRef::new(source.clone(), symbol.clone()))
            .collect())
    }

    async fn points_in_window(
        &self,
        source: &str,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>> {
        Ok(self
            .historical
            .lock()
            .unwrap()
            .get(&(source.to_string(), symbol.to_string()))
            .map(|series| series.range(start..end).map(|(ts, _)| *ts).collect())
            .unwrap_or_default())
    }

    async fn recent_timestamps(
        &self,
        source: &str,
        symbol: &str,
        limit: i64,
    ) -> Result<Vec<DateTime<Utc>>> {
        Ok(self
            .historical
            .lock()
            .unwrap()
            .get(&(source.to_string(), symbol.to_string()))
            .map(|series| {
                series
                    .keys()
                    .rev()
                    .take(limit.max(0) as usize)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Scripted connector behavior for one scenario.
enum Behavior {
    /// Return records after a delay.
    Respond(StdDuration),
    /// Never respond.
    Hang,
    /// Fail immediately with a permanent error.
    FailPermanent,
    /// Fail with a transient error this many times, then respond.
    FailTransient(AtomicU32),
}

struct MockConnector {
    name: String,
    behavior: Behavior,
    records: Vec<FundingRateRecord>,
}

impl MockConnector {
    fn responding(name: &str, records: Vec<FundingRateRecord>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behavior: Behavior::Respond(StdDuration::from_millis(50)),
            records,
        })
    }

    fn hanging(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behavior: Behavior::Hang,
            records: Vec::new(),
        })
    }

    fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behavior: Behavior::FailPermanent,
            records: Vec::new(),
        })
    }

    fn flaky(name: &str, failures: u32, records: Vec<FundingRateRecord>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behavior: Behavior::FailTransient(AtomicU32::new(failures)),
            records,
        })
    }

    async fn respond(&self) -> Result<Vec<FundingRateRecord>, ConnectorError> {
        match &self.behavior {
            Behavior::Respond(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(self.records.clone())
            }
            Behavior::Hang => {
                tokio::time::sleep(StdDuration::from_secs(1_000_000)).await;
                Ok(Vec::new())
            }
            Behavior::FailPermanent => Err(ConnectorError::api(400, "unsupported endpoint")),
            Behavior::FailTransient(remaining) => {
                if remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
                {
                    Err(ConnectorError::Timeout("mock timeout".to_string()))
                } else {
                    Ok(self.records.clone())
                }
            }
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_current(&self) -> Result<Vec<FundingRateRecord>, ConnectorError> {
        self.respond().await
    }

    async fn fetch_historical(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<FundingRateRecord>, ConnectorError> {
        let records = self.respond().await?;
        Ok(records
            .into_iter()
            .filter(|r| r.observed_at >= start && r.observed_at < end)
            .collect())
    }

    async fn list_active_symbols(&self) -> Result<Vec<String>, ConnectorError> {
        let mut symbols: Vec<String> = self.records.iter().map(|r| r.symbol.clone()).collect();
        symbols.sort();
        symbols.dedup();
        Ok(symbols)
    }
}

fn record(source: &str, symbol: &str, observed_at: DateTime<Utc>) -> FundingRateRecord {
    FundingRateRecord::new(
        source,
        symbol,
        symbol.trim_end_matches("USDT"),
        "USDT",
        dec!(0.0001),
        8,
        observed_at,
    )
}

/// `count` records spaced `interval_hours` apart, ending at `last`.
fn series(
    source: &str,
    symbol: &str,
    last: DateTime<Utc>,
    interval_hours: i64,
    count: i64,
) -> Vec<FundingRateRecord> {
    (0..count)
        .map(|i| {
            record(
                source,
                symbol,
                last - Duration::hours(interval_hours * (count - 1 - i)),
            )
        })
        .collect()
}

fn unique_path(name: &str) -> std::path::PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!("funding-e2e-{}-{}-{}", std::process::id(), n, name))
}

fn backfill_config(lock: &std::path::Path, status: &std::path::Path) -> BackfillConfig {
    BackfillConfig {
        days: 30,
        batch_size: 50,
        parallel: false,
        max_workers: 4,
        floor_start_to_midnight: false,
        lock_path: lock.display().to_string(),
        status_path: status.display().to_string(),
        lock_stale_secs: 600,
        retry_attempts: 3,
        retry_base_delay_secs: 1,
    }
}

// ---------------------------------------------------------------------------
// Collection orchestration
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn collection_isolates_slow_and_failing_sources() {
    let now = Utc::now();
    let fast_records: Vec<FundingRateRecord> = (0..100)
        .map(|i| record("alpha", &format!("SYM{i}USDT"), now))
        .collect();

    let connectors: Vec<Arc<dyn Connector>> = vec![
        MockConnector::responding("alpha", fast_records),
        MockConnector::hanging("beta"),
        MockConnector::failing("gamma"),
    ];

    let store = Arc::new(MemoryStore::default());
    let config = CollectionConfig {
        per_source_timeout_secs: 60,
        global_deadline_secs: 300,
        ..CollectionConfig::default()
    };
    let orchestrator = CollectionOrchestrator::new(connectors, store.clone(), config);

    let batch = orchestrator.collect_once().await;

    assert_eq!(batch.records.len(), 100);
    assert_eq!(batch.per_source["alpha"].status, SourceStatus::Success);
    assert_eq!(batch.per_source["alpha"].record_count, 100);
    assert_eq!(batch.per_source["beta"].status, SourceStatus::Timeout);
    assert_eq!(batch.per_source["gamma"].status, SourceStatus::Error);
    assert!(batch.per_source["gamma"]
        .error
        .as_deref()
        .unwrap()
        .contains("400"));

    // The hanging source is cut off by its own deadline, not the global one.
    assert!(batch.total_duration >= StdDuration::from_secs(60));
    assert!(batch.total_duration < StdDuration::from_secs(90));
}

#[tokio::test(start_paused = true)]
async fn collection_stores_union_of_successful_sources() {
    let now = Utc::now();
    let connectors: Vec<Arc<dyn Connector>> = vec![
        MockConnector::responding("alpha", vec![record("alpha", "BTCUSDT", now)]),
        MockConnector::responding("beta", vec![record("beta", "BTCUSDT", now)]),
    ];

    let store = Arc::new(MemoryStore::default());
    let orchestrator = CollectionOrchestrator::new(
        connectors,
        store.clone(),
        CollectionConfig::default(),
    );

    let batch = orchestrator.collect_and_store().await;

    assert_eq!(batch.records.len(), 2);
    assert_eq!(store.current.lock().unwrap().len(), 2);
    assert_eq!(orchestrator.last_batch().await.unwrap().batch_id, batch.batch_id);
}

#[tokio::test(start_paused = true)]
async fn collection_respects_enabled_sources() {
    let now = Utc::now();
    let connectors: Vec<Arc<dyn Connector>> = vec![
        MockConnector::responding("alpha", vec![record("alpha", "BTCUSDT", now)]),
        MockConnector::responding("beta", vec![record("beta", "BTCUSDT", now)]),
    ];

    let config = CollectionConfig {
        enabled_sources: vec!["beta".to_string()],
        ..CollectionConfig::default()
    };
    let orchestrator =
        CollectionOrchestrator::new(connectors, Arc::new(MemoryStore::default()), config);

    let batch = orchestrator.collect_once().await;
    assert_eq!(batch.per_source.len(), 1);
    assert!(batch.per_source.contains_key("beta"));
}

// ---------------------------------------------------------------------------
// Completeness validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn validation_reports_partial_series_with_one_gap() {
    let store = Arc::new(MemoryStore::default());
    let now = Utc::now();
    let window_start = now - Duration::days(30);

    // 85 of 90 expected points for an 8h contract: regular 8h spacing with
    // one 32h hole (3 missing points), first point 12h after the window
    // start and last point 12h before its end, both inside tolerance.
    let mut observed = Vec::new();
    let mut t = window_start + Duration::hours(12);
    for i in 0..85 {
        observed.push(record("alpha", "BTCUSDT", t));
        t += if i == 39 {
            Duration::hours(32)
        } else {
            Duration::hours(8)
        };
    }
    store.seed_historical(&observed);

    let validator = CompletenessValidator::new(store, ValidationConfig::default());
    let report = validator.validate("alpha", "BTCUSDT", 30).await;

    assert_eq!(report.funding_interval_hours, Some(8));
    assert_eq!(report.actual_points, 85);
    assert_eq!(report.expected_points, 90);
    assert!((report.completeness_pct - 94.44).abs() < 0.1);
    assert_eq!(report.status, CompletenessStatus::PartialHigh);
    assert!(report.needs_retry);
    assert_eq!(report.gaps.len(), 1);
    assert_eq!(report.gaps[0].kind, GapKind::Interior);
    assert_eq!(report.gaps[0].missing_points, Some(3));
}

#[tokio::test]
async fn validation_complete_series_hits_threshold_exactly() {
    let store = Arc::new(MemoryStore::default());
    let now = Utc::now();

    // 90 of 90 points ending just now.
    let full = series("alpha", "BTCUSDT", now - Duration::hours(1), 8, 90);
    store.seed_historical(&full);

    let validator = CompletenessValidator::new(store.clone(), ValidationConfig::default());
    let report = validator.validate("alpha", "BTCUSDT", 30).await;
    assert_eq!(report.status, CompletenessStatus::Complete);
    assert!(!report.needs_retry);

    // 86/90 = 95.55% stays complete; 85/90 = 94.44% does not. The boundary
    // is exact: 95.0 is complete, anything below is not.
    assert!(report.completeness_pct >= 95.0);
}

#[tokio::test]
async fn completeness_threshold_boundary_is_exact() {
    let now = Utc::now();
    let window_start = now - Duration::days(20);

    // 57 of 60 expected points is exactly 95.0%: complete, no retry.
    let store = Arc::new(MemoryStore::default());
    let mut t = window_start + Duration::hours(12);
    let mut points = Vec::new();
    for i in 0..57 {
        points.push(record("alpha", "BTCUSDT", t));
        t += if i == 30 {
            Duration::hours(16)
        } else {
            Duration::hours(8)
        };
    }
    store.seed_historical(&points);

    let validator = CompletenessValidator::new(store, ValidationConfig::default());
    let report = validator.validate("alpha", "BTCUSDT", 20).await;
    assert_eq!(report.expected_points, 60);
    assert_eq!(report.actual_points, 57);
    assert!((report.completeness_pct - 95.0).abs() < 1e-9);
    assert_eq!(report.status, CompletenessStatus::Complete);
    assert!(!report.needs_retry);

    // One point fewer (93.3%) drops below the threshold.
    let store = Arc::new(MemoryStore::default());
    let mut t = window_start + Duration::hours(12);
    let mut points = Vec::new();
    for i in 0..56 {
        points.push(record("alpha", "BTCUSDT", t));
        t += if i == 20 || i == 40 {
            Duration::hours(16)
        } else {
            Duration::hours(8)
        };
    }
    store.seed_historical(&points);

    let validator = CompletenessValidator::new(store, ValidationConfig::default());
    let report = validator.validate("alpha", "BTCUSDT", 20).await;
    assert_eq!(report.actual_points, 56);
    assert!(report.completeness_pct < 95.0);
    assert_eq!(report.status, CompletenessStatus::PartialHigh);
    assert!(report.needs_retry);
}

#[tokio::test]
async fn validation_no_data_takes_initial_backfill_path() {
    let store = Arc::new(MemoryStore::default());
    let validator = CompletenessValidator::new(store, ValidationConfig::default());

    let report = validator.validate("alpha", "NEWUSDT", 30).await;
    assert_eq!(report.status, CompletenessStatus::NoData);
    assert!(!report.needs_retry);
    assert_eq!(report.actual_points, 0);
    assert_eq!(report.gaps.len(), 1);
    assert_eq!(report.gaps[0].kind, GapKind::CompleteMissing);
}

#[tokio::test]
async fn validation_unknown_interval_requests_retry() {
    let store = Arc::new(MemoryStore::default());
    let now = Utc::now();

    // 5-hour spacing is not a known funding interval.
    let odd = series("alpha", "ODDUSDT", now - Duration::hours(1), 5, 20);
    store.seed_historical(&odd);

    let validator = CompletenessValidator::new(store, ValidationConfig::default());
    let report = validator.validate("alpha", "ODDUSDT", 30).await;

    assert_eq!(report.status, CompletenessStatus::IntervalUnknown);
    assert!(report.needs_retry);
    assert_eq!(report.funding_interval_hours, None);
}

#[tokio::test]
async fn validation_all_ranks_retry_queue_by_priority() {
    let store = Arc::new(MemoryStore::default());
    let now = Utc::now();

    // Complete contract, a slightly gappy one, and a sparse one.
    store.seed_historical(&series("alpha", "FULLUSDT", now - Duration::hours(1), 8, 90));
    store.seed_historical(&series("alpha", "GAPUSDT", now - Duration::hours(1), 8, 80));
    store.seed_historical(&series("alpha", "THINUSDT", now - Duration::hours(1), 8, 30));

    let validator = CompletenessValidator::new(store, ValidationConfig::default());
    let report = validator.validate_all(30).await.unwrap();

    assert_eq!(report.contracts.len(), 3);
    assert_eq!(report.count(CompletenessStatus::Complete), 1);

    let queue = report.retry_queue();
    assert_eq!(queue.len(), 2);
    // The sparser contract is the more urgent one.
    assert_eq!(queue[0].symbol, "THINUSDT");
    assert_eq!(queue[1].symbol, "GAPUSDT");
    assert!(queue[0].priority > queue[1].priority);
}

#[tokio::test]
async fn completeness_is_monotonic_in_actual_points() {
    let now = Utc::now();
    let mut previous_pct = -1.0f64;

    for count in [10, 30, 60, 80, 90] {
        let store = Arc::new(MemoryStore::default());
        store.seed_historical(&series("alpha", "BTCUSDT", now - Duration::hours(1), 8, count));
        let validator = CompletenessValidator::new(store, ValidationConfig::default());
        let report = validator.validate("alpha", "BTCUSDT", 30).await;

        assert!(
            report.completeness_pct >= previous_pct,
            "{count} points regressed to {}%",
            report.completeness_pct
        );
        previous_pct = report.completeness_pct;
    }
}

// ---------------------------------------------------------------------------
// Historical insert idempotence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn historical_insert_is_idempotent_per_key() {
    let store = MemoryStore::default();
    let now = Utc::now();
    let rows = vec![record("alpha", "BTCUSDT", now)];

    store.insert_historical(&rows).await.unwrap();
    store.insert_historical(&rows).await.unwrap();

    assert_eq!(store.historical_rows(), 1);
}

// ---------------------------------------------------------------------------
// Backfill coordination
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn backfill_happy_path_stores_and_releases_lock() {
    let lock_path = unique_path("happy.lock");
    let status_path = unique_path("happy-status.json");
    let store = Arc::new(MemoryStore::default());
    let now = Utc::now();

    let connectors: Vec<Arc<dyn Connector>> = vec![
        MockConnector::responding(
            "alpha",
            series("alpha", "BTCUSDT", now - Duration::hours(1), 8, 90),
        ),
        MockConnector::responding(
            "beta",
            series("beta", "ETHUSDT", now - Duration::hours(1), 8, 90),
        ),
    ];

    let coordinator = BackfillCoordinator::new(
        connectors,
        store.clone(),
        backfill_config(&lock_path, &status_path),
        ValidationConfig::default(),
    );

    let outcome = coordinator.run_once().await.unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.total_records, 180);
    assert_eq!(outcome.succeeded.len(), 2);
    assert_eq!(store.historical_rows(), 180);
    assert_eq!(outcome.unified_end - outcome.unified_start, Duration::days(30));

    let status = StatusFile::new(&status_path).read();
    assert!(status.completed);
    assert!(!status.running);
    assert!((status.overall_progress - 100.0).abs() < f64::EPSILON);
    assert_eq!(status.total_records, 180);
    assert_eq!(status.exchanges["alpha"].status, "completed");
    assert_eq!(status.completeness["alpha"].complete, 1);

    // Lock released: an immediate second run acquires it again.
    assert!(!RunLock::new(&lock_path).is_held());
    let second = coordinator.run_once().await.unwrap();
    assert!(second.is_success());

    let _ = std::fs::remove_file(&lock_path);
    let _ = std::fs::remove_file(&status_path);
}

#[tokio::test(start_paused = true)]
async fn backfill_second_instance_exits_without_side_effects() {
    let lock_path = unique_path("contended.lock");
    let status_path = unique_path("contended-status.json");
    let store = Arc::new(MemoryStore::default());
    let now = Utc::now();

    let connectors: Vec<Arc<dyn Connector>> = vec![MockConnector::responding(
        "alpha",
        series("alpha", "BTCUSDT", now - Duration::hours(1), 8, 90),
    )];

    let coordinator = BackfillCoordinator::new(
        connectors,
        store.clone(),
        backfill_config(&lock_path, &status_path),
        ValidationConfig::default(),
    );

    // Another live instance holds the lock.
    let holder = RunLock::new(&lock_path).acquire().unwrap();

    let err = coordinator.run_once().await.expect_err("must not run");
    assert!(matches!(err, BackfillError::AlreadyRunning(_)));
    assert_eq!(store.write_calls.load(Ordering::SeqCst), 0);
    assert!(!status_path.exists(), "no status writes before the lock");

    // Once the holder finishes, the run proceeds normally.
    holder.release().unwrap();
    let outcome = coordinator.run_once().await.unwrap();
    assert!(outcome.is_success());

    let _ = std::fs::remove_file(&lock_path);
    let _ = std::fs::remove_file(&status_path);
}

#[tokio::test(start_paused = true)]
async fn backfill_retries_transient_failures_and_isolates_permanent_ones() {
    let lock_path = unique_path("retry.lock");
    let status_path = unique_path("retry-status.json");
    let store = Arc::new(MemoryStore::default());
    let now = Utc::now();

    let connectors: Vec<Arc<dyn Connector>> = vec![
        // Two transient failures, then success on the third attempt.
        MockConnector::flaky(
            "flaky",
            2,
            series("flaky", "BTCUSDT", now - Duration::hours(1), 8, 90),
        ),
        // Permanent failure: fails fast, no retries.
        MockConnector::failing("broken"),
        MockConnector::responding(
            "steady",
            series("steady", "ETHUSDT", now - Duration::hours(1), 8, 90),
        ),
    ];

    let coordinator = BackfillCoordinator::new(
        connectors,
        store.clone(),
        backfill_config(&lock_path, &status_path),
        ValidationConfig::default(),
    );

    let outcome = coordinator.run_once().await.unwrap();

    assert_eq!(outcome.succeeded.len(), 2);
    assert!(outcome.succeeded.contains(&"flaky".to_string()));
    assert!(outcome.succeeded.contains(&"steady".to_string()));
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].0, "broken");
    assert_eq!(outcome.total_records, 180);

    let status = StatusFile::new(&status_path).read();
    assert!(status.exchanges["broken"].status.starts_with("failed"));
    assert_eq!(status.exchanges["flaky"].status, "completed");

    let _ = std::fs::remove_file(&lock_path);
    let _ = std::fs::remove_file(&status_path);
}

#[tokio::test(start_paused = true)]
async fn backfill_dry_run_fetches_but_never_writes() {
    let lock_path = unique_path("dry.lock");
    let status_path = unique_path("dry-status.json");
    let store = Arc::new(MemoryStore::default());
    let now = Utc::now();

    let connectors: Vec<Arc<dyn Connector>> = vec![MockConnector::responding(
        "alpha",
        series("alpha", "BTCUSDT", now - Duration::hours(1), 8, 90),
    )];

    let coordinator = BackfillCoordinator::new(
        connectors,
        store.clone(),
        backfill_config(&lock_path, &status_path),
        ValidationConfig::default(),
    )
    .dry_run(true);

    let outcome = coordinator.run_once().await.unwrap();

    assert!(outcome.is_success());
    assert!(outcome.dry_run);
    assert_eq!(outcome.total_records, 90);
    assert_eq!(store.write_calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.historical_rows(), 0);

    let _ = std::fs::remove_file(&lock_path);
    let _ = std::fs::remove_file(&status_path);
}

#[tokio::test(start_paused = true)]
async fn backfill_parallel_matches_sequential_results() {
    let lock_path = unique_path("parallel.lock");
    let status_path = unique_path("parallel-status.json");
    let store = Arc::new(MemoryStore::default());
    let now = Utc::now();

    let connectors: Vec<Arc<dyn Connector>> = (0..4)
        .map(|i| {
            let name = format!("source{i}");
            let symbol = format!("SYM{i}USDT");
            MockConnector::responding(
                &name,
                series(&name, &symbol, now - Duration::hours(1), 8, 90),
            ) as Arc<dyn Connector>
        })
        .collect();

    let mut config = backfill_config(&lock_path, &status_path);
    config.parallel = true;
    config.max_workers = 2;

    let coordinator = BackfillCoordinator::new(
        connectors,
        store.clone(),
        config,
        ValidationConfig::default(),
    );

    let outcome = coordinator.run_once().await.unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.succeeded.len(), 4);
    assert_eq!(outcome.total_records, 360);
    assert_eq!(store.historical_rows(), 360);

    let _ = std::fs::remove_file(&lock_path);
    let _ = std::fs::remove_file(&status_path);
}
