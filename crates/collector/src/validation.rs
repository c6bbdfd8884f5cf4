//! Historical series completeness validation.
//!
//! Answers "how complete is this contract's history, and how urgently should
//! it be retried?" by inferring the funding interval from observed spacing,
//! comparing expected against actual point counts, and scanning for gaps.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use funding_core::config::ValidationConfig;
use funding_data::{ContractRef, FundingStore};

/// Funding intervals that exist in the wild, in hours.
///
/// A detected mode outside this set means the contract's spacing is
/// pathological and the interval stays unknown.
const KNOWN_INTERVALS: [i64; 4] = [1, 2, 4, 8];

/// Completeness classification for one contract and window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletenessStatus {
    Complete,
    PartialHigh,
    PartialMedium,
    Incomplete,
    NoData,
    IntervalUnknown,
    Error,
}

impl CompletenessStatus {
    /// Returns the status name as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::PartialHigh => "partial_high",
            Self::PartialMedium => "partial_medium",
            Self::Incomplete => "incomplete",
            Self::NoData => "no_data",
            Self::IntervalUnknown => "interval_unknown",
            Self::Error => "error",
        }
    }
}

/// Where in the window a gap sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapKind {
    /// Between two observed points.
    Interior,
    /// Between the window start and the first point.
    StartGap,
    /// Between the last point and the window end.
    EndGap,
    /// The whole window, when fewer than two points exist.
    CompleteMissing,
}

/// A span where observed spacing exceeds the expected interval beyond tolerance.
#[derive(Debug, Clone)]
pub struct Gap {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub kind: GapKind,
    /// Points that should have landed inside the gap, when the interval is known.
    pub missing_points: Option<i64>,
}

impl Gap {
    /// Gap length.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// Validation result for one (source, symbol, window).
///
/// A computed view over storage, recomputed each pass; never persisted as
/// authoritative state.
#[derive(Debug, Clone)]
pub struct ContractCompleteness {
    pub source: String,
    pub symbol: String,
    pub window_days: i64,
    pub funding_interval_hours: Option<i64>,
    pub actual_points: i64,
    pub expected_points: i64,
    pub completeness_pct: f64,
    pub gaps: Vec<Gap>,
    pub status: CompletenessStatus,
    pub needs_retry: bool,
    pub priority: f64,
    pub error: Option<String>,
}

/// Aggregate of one `validate_all` pass.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub window_days: i64,
    pub generated_at: DateTime<Utc>,
    pub contracts: Vec<ContractCompleteness>,
    pub status_counts: HashMap<CompletenessStatus, usize>,
}

impl ValidationReport {
    /// Contracts needing retry, most urgent first.
    #[must_use]
    pub fn retry_queue(&self) -> Vec<&ContractCompleteness> {
        let mut queue: Vec<&ContractCompleteness> = self
            .contracts
            .iter()
            .filter(|c| c.needs_retry)
            .collect();
        queue.sort_by(|a, b| {
            b.priority
                .partial_cmp(&a.priority)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        queue
    }

    /// Count for one status bucket.
    #[must_use]
    pub fn count(&self, status: CompletenessStatus) -> usize {
        self.status_counts.get(&status).copied().unwrap_or(0)
    }
}

/// Validates historical series completeness through the storage capability.
pub struct CompletenessValidator {
    store: Arc<dyn FundingStore>,
    config: ValidationConfig,
}

impl CompletenessValidator {
    /// Creates a validator over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn FundingStore>, config: ValidationConfig) -> Self {
        Self { store, config }
    }

    /// Infers the funding interval from recent observation spacing.
    ///
    /// Takes the statistical mode of consecutive deltas rounded to whole
    /// hours; the mode is robust to the irregular spacing sources emit near
    /// listing and delisting. Only intervals in the known set are accepted.
    ///
    /// # Errors
    /// Returns an error if the storage query fails.
    pub async fn detect_interval(&self, source: &str, symbol: &str) -> anyhow::Result<Option<i64>> {
        let timestamps = self
            .store
            .recent_timestamps(source, symbol, self.config.interval_sample_size)
            .await?;

        Ok(Self::interval_mode(&timestamps))
    }

    /// Mode of consecutive deltas over descending timestamps.
    fn interval_mode(timestamps_desc: &[DateTime<Utc>]) -> Option<i64> {
        if timestamps_desc.len() < 2 {
            return None;
        }

        let mut counts: HashMap<i64, usize> = HashMap::new();
        for pair in timestamps_desc.windows(2) {
            let delta_hours =
                (pair[0] - pair[1]).num_minutes() as f64 / 60.0;
            let rounded = delta_hours.round() as i64;
            if rounded > 0 {
                *counts.entry(rounded).or_insert(0) += 1;
            }
        }

        let mode = counts
            .into_iter()
            .max_by_key(|(interval, count)| (*count, -interval))
            .map(|(interval, _)| interval)?;

        KNOWN_INTERVALS.contains(&mode).then_some(mode)
    }

    /// Points expected in a window at the given interval.
    #[must_use]
    pub fn expected_points(interval_hours: i64, days: i64) -> i64 {
        if interval_hours <= 0 {
            return 0;
        }
        24 * days / interval_hours
    }

    /// Scans ascending points for spans exceeding `interval` beyond tolerance.
    ///
    /// With fewer than two points the whole window is one gap. Boundary gaps
    /// between the window edges and the outermost points are reported too.
    #[must_use]
    pub fn find_gaps(
        &self,
        points_asc: &[DateTime<Utc>],
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        interval_hours: i64,
    ) -> Vec<Gap> {
        let tolerance_limit_hours =
            interval_hours as f64 * (1.0 + self.config.gap_tolerance);

        if points_asc.len() < 2 {
            return vec![Gap {
                start: window_start,
                end: window_end,
                kind: GapKind::CompleteMissing,
                missing_points: Some(Self::expected_points(
                    interval_hours,
                    (window_end - window_start).num_days(),
                )),
            }];
        }

        let mut gaps = Vec::new();
        let missing_in = |span_hours: f64| -> i64 {
            ((span_hours / interval_hours as f64).floor() as i64 - 1).max(0)
        };

        let first = points_asc[0];
        let lead_hours = (first - window_start).num_minutes() as f64 / 60.0;
        if lead_hours > tolerance_limit_hours {
            gaps.push(Gap {
                start: window_start,
                end: first,
                kind: GapKind::StartGap,
                missing_points: Some(missing_in(lead_hours)),
            });
        }

        for pair in points_asc.windows(2) {
            let delta_hours = (pair[1] - pair[0]).num_minutes() as f64 / 60.0;
            if delta_hours > tolerance_limit_hours {
                gaps.push(Gap {
                    start: pair[0],
                    end: pair[1],
                    kind: GapKind::Interior,
                    missing_points: Some(missing_in(delta_hours)),
                });
            }
        }

        let last = points_asc[points_asc.len() - 1];
        let tail_hours = (window_end - last).num_minutes() as f64 / 60.0;
        if tail_hours > tolerance_limit_hours {
            gaps.push(Gap {
                start: last,
                end: window_end,
                kind: GapKind::EndGap,
                missing_points: Some(missing_in(tail_hours)),
            });
        }

        gaps
    }

    /// Retry priority for a report, higher first.
    ///
    /// Weighs missing completeness heaviest, then gap count (saturating at
    /// ten), then whether the contract already has meaningful history.
    #[must_use]
    pub fn priority(&self, completeness_pct: f64, gap_count: usize, actual_points: i64) -> f64 {
        let completeness_term = (1.0 - completeness_pct / 100.0).max(0.0);
        let gap_term = (gap_count as f64 / 10.0).min(1.0);
        let history_term = if actual_points > 10 { 1.0 } else { 0.5 };

        (self.config.weight_completeness * completeness_term
            + self.config.weight_gaps * gap_term
            + self.config.weight_history * history_term)
            * 100.0
    }

    /// Validates one contract over the trailing window.
    ///
    /// Storage errors degrade the result to `Error` with `needs_retry` set
    /// instead of propagating, so one bad contract never aborts a pass.
    pub async fn validate(&self, source: &str, symbol: &str, days: i64) -> ContractCompleteness {
        match self.try_validate(source, symbol, days).await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!("Validation failed for {}:{}: {}", source, symbol, e);
                let priority = self.priority(0.0, 0, 0);
                ContractCompleteness {
                    source: source.to_string(),
                    symbol: symbol.to_string(),
                    window_days: days,
                    funding_interval_hours: None,
                    actual_points: 0,
                    expected_points: 0,
                    completeness_pct: 0.0,
                    gaps: Vec::new(),
                    status: CompletenessStatus::Error,
                    needs_retry: true,
                    priority,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn try_validate(
        &self,
        source: &str,
        symbol: &str,
        days: i64,
    ) -> anyhow::Result<ContractCompleteness> {
        let window_end = Utc::now();
        let window_start = window_end - Duration::days(days);

        let points = self
            .store
            .points_in_window(source, symbol, window_start, window_end)
            .await?;
        let actual_points = points.len() as i64;

        if actual_points == 0 {
            return Ok(ContractCompleteness {
                source: source.to_string(),
                symbol: symbol.to_string(),
                window_days: days,
                funding_interval_hours: None,
                actual_points: 0,
                expected_points: 0,
                completeness_pct: 0.0,
                gaps: vec![Gap {
                    start: window_start,
                    end: window_end,
                    kind: GapKind::CompleteMissing,
                    missing_points: None,
                }],
                status: CompletenessStatus::NoData,
                // No data means initial backfill, not retry.
                needs_retry: false,
                priority: 0.0,
                error: None,
            });
        }

        let interval = self.detect_interval(source, symbol).await?;

        let Some(interval_hours) = interval else {
            // Cannot confirm completeness without a known interval.
            let priority = self.priority(0.0, 0, actual_points);
            return Ok(ContractCompleteness {
                source: source.to_string(),
                symbol: symbol.to_string(),
                window_days: days,
                funding_interval_hours: None,
                actual_points,
                expected_points: 0,
                completeness_pct: 0.0,
                gaps: Vec::new(),
                status: CompletenessStatus::IntervalUnknown,
                needs_retry: true,
                priority,
                error: None,
            });
        };

        let expected_points = Self::expected_points(interval_hours, days);
        let completeness_pct = if expected_points > 0 {
            actual_points as f64 / expected_points as f64 * 100.0
        } else {
            0.0
        };

        let gaps = self.find_gaps(&points, window_start, window_end, interval_hours);

        let threshold = self.config.completeness_threshold_pct;
        let status = if completeness_pct >= threshold {
            CompletenessStatus::Complete
        } else if completeness_pct >= 80.0 {
            CompletenessStatus::PartialHigh
        } else if completeness_pct >= 50.0 {
            CompletenessStatus::PartialMedium
        } else {
            CompletenessStatus::Incomplete
        };
        let needs_retry = completeness_pct > 0.0 && completeness_pct < threshold;
        let priority = self.priority(completeness_pct, gaps.len(), actual_points);

        Ok(ContractCompleteness {
            source: source.to_string(),
            symbol: symbol.to_string(),
            window_days: days,
            funding_interval_hours: Some(interval_hours),
            actual_points,
            expected_points,
            completeness_pct,
            gaps,
            status,
            needs_retry,
            priority,
            error: None,
        })
    }

    /// Validates every contract known to storage.
    ///
    /// # Errors
    /// Returns an error only if the contract listing itself fails; individual
    /// contract failures are folded into their reports.
    pub async fn validate_all(&self, days: i64) -> anyhow::Result<ValidationReport> {
        let contracts: Vec<ContractRef> = self.store.distinct_contracts().await?;
        tracing::info!(
            "Validating {} contracts over a {}-day window",
            contracts.len(),
            days
        );

        let mut reports = Vec::with_capacity(contracts.len());
        let mut status_counts: HashMap<CompletenessStatus, usize> = HashMap::new();

        for contract in &contracts {
            let report = self.validate(&contract.source, &contract.symbol, days).await;
            *status_counts.entry(report.status).or_insert(0) += 1;
            reports.push(report);
        }

        Ok(ValidationReport {
            window_days: days,
            generated_at: Utc::now(),
            contracts: reports,
            status_counts,
        })
    }
}
