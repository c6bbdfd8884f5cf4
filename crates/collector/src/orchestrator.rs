//! Collection orchestration: one bounded, failure-isolated snapshot cycle
//! across every enabled source.
//!
//! A slow or failing source never blocks or corrupts the others; the batch
//! always seals by the global deadline even with sources still outstanding.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use funding_connectors::Connector;
use funding_core::config::CollectionConfig;
use funding_data::{FundingRateRecord, FundingStore};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use uuid::Uuid;

/// Terminal state of one source within a collection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Success,
    Timeout,
    Error,
}

impl SourceStatus {
    /// Returns the status name as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }
}

/// Timing and outcome bookkeeping for one source in one cycle.
#[derive(Debug, Clone)]
pub struct SourceOutcome {
    pub duration: Duration,
    pub record_count: usize,
    pub status: SourceStatus,
    pub error: Option<String>,
}

/// One sealed orchestration cycle.
///
/// Immutable once sealed; kept only as the last-cycle snapshot for
/// observability, never persisted as domain data.
#[derive(Debug, Clone)]
pub struct CollectionBatch {
    pub batch_id: String,
    pub started_at: DateTime<Utc>,
    pub per_source: HashMap<String, SourceOutcome>,
    pub total_duration: Duration,
    pub records: Vec<FundingRateRecord>,
}

impl CollectionBatch {
    /// Number of sources that completed successfully.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.per_source
            .values()
            .filter(|o| o.status == SourceStatus::Success)
            .count()
    }

    /// Sources that timed out or errored, with their status.
    #[must_use]
    pub fn failed_sources(&self) -> Vec<(&str, SourceStatus)> {
        self.per_source
            .iter()
            .filter(|(_, o)| o.status != SourceStatus::Success)
            .map(|(name, o)| (name.as_str(), o.status))
            .collect()
    }

    /// One-line cycle summary for logging.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "batch {} sealed: {} records from {}/{} sources in {:.1}s",
            self.batch_id,
            self.records.len(),
            self.success_count(),
            self.per_source.len(),
            self.total_duration.as_secs_f64()
        )
    }
}

/// Fans "fetch current snapshot" out across all enabled connectors.
pub struct CollectionOrchestrator {
    connectors: Vec<Arc<dyn Connector>>,
    store: Arc<dyn FundingStore>,
    config: CollectionConfig,
    last_batch: tokio::sync::RwLock<Option<CollectionBatch>>,
}

impl CollectionOrchestrator {
    /// Creates an orchestrator over the given connectors and store.
    ///
    /// Connectors listed in `config.enabled_sources` are kept; an empty list
    /// enables everything.
    #[must_use]
    pub fn new(
        connectors: Vec<Arc<dyn Connector>>,
        store: Arc<dyn FundingStore>,
        config: CollectionConfig,
    ) -> Self {
        let connectors = if config.enabled_sources.is_empty() {
            connectors
        } else {
            connectors
                .into_iter()
                .filter(|c| config.enabled_sources.iter().any(|s| s == c.name()))
                .collect()
        };

        Self {
            connectors,
            store,
            config,
            last_batch: tokio::sync::RwLock::new(None),
        }
    }

    /// Runs one collection cycle and seals the batch.
    ///
    /// Each source runs on the worker pool under its own deadline; a task
    /// still pending when the global deadline elapses is marked `Timeout` and
    /// its result discarded. Cancellation is best-effort: the underlying
    /// request cannot be force-aborted, so an abandoned fetch may still
    /// complete and is simply dropped.
    pub async fn collect_once(&self) -> CollectionBatch {
        let batch_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let cycle_start = Instant::now();
        let per_task_deadline = Duration::from_secs(self.config.per_source_timeout_secs);
        let global_deadline = Duration::from_secs(self.config.global_deadline_secs);

        tracing::info!(
            "Starting collection batch {} across {} sources",
            batch_id,
            self.connectors.len()
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_workers));
        let mut tasks: JoinSet<(String, SourceOutcome, Vec<FundingRateRecord>)> = JoinSet::new();

        for connector in &self.connectors {
            let connector = connector.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                // Closed only when the whole JoinSet is dropped.
                let _permit = semaphore.acquire_owned().await;
                let task_start = Instant::now();
                let name = connector.name().to_string();

                match tokio::time::timeout(per_task_deadline, connector.fetch_current()).await {
                    Ok(Ok(records)) => {
                        let outcome = SourceOutcome {
                            duration: task_start.elapsed(),
                            record_count: records.len(),
                            status: SourceStatus::Success,
                            error: None,
                        };
                        (name, outcome, records)
                    }
                    Ok(Err(e)) => {
                        let outcome = SourceOutcome {
                            duration: task_start.elapsed(),
                            record_count: 0,
                            status: SourceStatus::Error,
                            error: Some(e.to_string()),
                        };
                        (name, outcome, Vec::new())
                    }
                    Err(_) => {
                        let outcome = SourceOutcome {
                            duration: task_start.elapsed(),
                            record_count: 0,
                            status: SourceStatus::Timeout,
                            error: Some(format!(
                                "no response within {}s",
                                per_task_deadline.as_secs()
                            )),
                        };
                        (name, outcome, Vec::new())
                    }
                }
            });
        }

        let mut per_source: HashMap<String, SourceOutcome> = HashMap::new();
        let mut records: Vec<FundingRateRecord> = Vec::new();

        let collection = async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((name, outcome, mut source_records)) => {
                        match outcome.status {
                            SourceStatus::Success => {
                                tracing::info!(
                                    "Source {} returned {} records in {:.2}s",
                                    name,
                                    outcome.record_count,
                                    outcome.duration.as_secs_f64()
                                );
                                records.append(&mut source_records);
                            }
                            SourceStatus::Timeout => {
                                tracing::warn!(
                                    "Source {} timed out after {:.1}s",
                                    name,
                                    outcome.duration.as_secs_f64()
                                );
                            }
                            SourceStatus::Error => {
                                tracing::warn!(
                                    "Source {} failed: {}",
                                    name,
                                    outcome.error.as_deref().unwrap_or("unknown")
                                );
                            }
                        }
                        per_source.insert(name, outcome);
                    }
                    Err(e) => {
                        // A panicked worker loses its source attribution; the
                        // source shows up as timed out in the sweep below.
                        tracing::error!("Collection worker panicked: {}", e);
                    }
                }
            }
        };

        if tokio::time::timeout(global_deadline, collection).await.is_err() {
            tracing::warn!(
                "Global collection deadline of {}s reached, abandoning outstanding sources",
                global_deadline.as_secs()
            );
            tasks.abort_all();
        }

        // Sources with no recorded outcome were still pending at the deadline.
        for connector in &self.connectors {
            let name = connector.name();
            if !per_source.contains_key(name) {
                per_source.insert(
                    name.to_string(),
                    SourceOutcome {
                        duration: cycle_start.elapsed(),
                        record_count: 0,
                        status: SourceStatus::Timeout,
                        error: Some("still pending at global deadline".to_string()),
                    },
                );
            }
        }

        let batch = CollectionBatch {
            batch_id,
            started_at,
            per_source,
            total_duration: cycle_start.elapsed(),
            records,
        };

        tracing::info!("{}", batch.summary());
        *self.last_batch.write().await = Some(batch.clone());
        batch
    }

    /// Runs one cycle and upserts the unified snapshot.
    ///
    /// The sealed batch is returned even when the storage write fails; the
    /// failure is logged and the next cycle proceeds normally.
    pub async fn collect_and_store(&self) -> CollectionBatch {
        let batch = self.collect_once().await;

        if batch.records.is_empty() {
            tracing::warn!("Batch {} produced no records, skipping write", batch.batch_id);
            return batch;
        }

        if let Err(e) = self.store.upsert_current(&batch.records).await {
            tracing::error!(
                "Failed to store {} current records from batch {}: {}",
                batch.records.len(),
                batch.batch_id,
                e
            );
        }

        batch
    }

    /// Runs collection cycles forever at the configured interval.
    pub async fn run(&self) {
        let interval = Duration::from_secs(self.config.interval_secs);
        loop {
            self.collect_and_store().await;
            tokio::time::sleep(interval).await;
        }
    }

    /// The most recently sealed batch, if any.
    pub async fn last_batch(&self) -> Option<CollectionBatch> {
        self.last_batch.read().await.clone()
    }
}
