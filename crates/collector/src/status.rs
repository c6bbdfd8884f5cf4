//! Durable backfill run status, visible to external observers.
//!
//! Writes go to a temporary path, are fsynced, then renamed over the target,
//! so a reader never sees a partially-written document. An unparseable file
//! on read is treated as "no active run" rather than crashing the reader.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Progress of one source within a backfill run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExchangeProgress {
    pub symbols_processed: u64,
    pub total_symbols: u64,
    pub records_fetched: u64,
    /// "pending", "running", "completed", or "failed: <reason>".
    pub status: String,
    /// Seconds since this source's worker started.
    pub elapsed_time: f64,
    /// Estimated seconds remaining, when progress allows an estimate.
    pub estimated_remaining: Option<f64>,
}

/// Per-source completeness rollup attached to the terminal status.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CompletenessSummary {
    pub complete: u64,
    pub total: u64,
    pub percentage: f64,
}

/// The whole run status document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunStatus {
    pub running: bool,
    /// 0-100 across all sources.
    pub overall_progress: f64,
    pub total_records: u64,
    pub exchanges: BTreeMap<String, ExchangeProgress>,
    pub completeness: BTreeMap<String, CompletenessSummary>,
    pub message: String,
    pub completed: bool,
}

impl RunStatus {
    /// Fresh status for a starting run over the given sources.
    #[must_use]
    pub fn starting(sources: &[String]) -> Self {
        let exchanges = sources
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    ExchangeProgress {
                        status: "pending".to_string(),
                        ..ExchangeProgress::default()
                    },
                )
            })
            .collect();

        Self {
            running: true,
            overall_progress: 0.0,
            total_records: 0,
            exchanges,
            completeness: BTreeMap::new(),
            message: "backfill starting".to_string(),
            completed: false,
        }
    }

    /// Recomputes overall progress from per-source terminal states.
    pub fn refresh_overall_progress(&mut self) {
        let total = self.exchanges.len();
        if total == 0 {
            self.overall_progress = 0.0;
            return;
        }
        let finished = self
            .exchanges
            .values()
            .filter(|p| p.status == "completed" || p.status.starts_with("failed"))
            .count();
        self.overall_progress = finished as f64 / total as f64 * 100.0;
    }
}

/// Atomic reader/writer for the status document at a fixed path.
#[derive(Debug, Clone)]
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    /// Creates a status file handle.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Writes the status atomically from the reader's point of view.
    ///
    /// # Errors
    /// Returns an error if the temporary file cannot be written, synced, or
    /// renamed over the target.
    pub fn write(&self, status: &RunStatus) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }

        let tmp_path = self.path.with_extension("json.tmp");
        let payload = serde_json::to_vec_pretty(status)?;

        let mut tmp = fs::File::create(&tmp_path)
            .with_context(|| format!("creating {}", tmp_path.display()))?;
        tmp.write_all(&payload)?;
        tmp.sync_all()?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("renaming into {}", self.path.display()))?;
        Ok(())
    }

    /// Reads the current status.
    ///
    /// A missing or unparseable file reads as the default "no active run"
    /// document; corruption here would be a writer bug, and the reader
    /// degrades instead of crashing.
    #[must_use]
    pub fn read(&self) -> RunStatus {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return RunStatus::default(),
            Err(e) => {
                tracing::warn!("Failed to read status file {}: {}", self.path.display(), e);
                return RunStatus::default();
            }
        };

        match serde_json::from_str(&contents) {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(
                    "Status file {} is unparseable ({}), treating as no active run",
                    self.path.display(),
                    e
                );
                RunStatus::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_status_path() -> PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!(
            "funding-status-test-{}-{}.json",
            std::process::id(),
            n
        ))
    }

    fn sample_status() -> RunStatus {
        let mut status = RunStatus::starting(&["binance".to_string(), "bybit".to_string()]);
        status.total_records = 1234;
        status.message = "backfill in progress".to_string();
        if let Some(progress) = status.exchanges.get_mut("binance") {
            progress.status = "completed".to_string();
            progress.symbols_processed = 40;
            progress.total_symbols = 40;
            progress.records_fetched = 1234;
            progress.elapsed_time = 12.5;
        }
        status.refresh_overall_progress();
        status
    }

    #[test]
    fn test_write_read_roundtrip() {
        let path = temp_status_path();
        let file = StatusFile::new(&path);

        let status = sample_status();
        file.write(&status).expect("write");

        let read = file.read();
        assert!(read.running);
        assert_eq!(read.total_records, 1234);
        assert_eq!(read.exchanges["binance"].records_fetched, 1234);
        assert_eq!(read.exchanges["bybit"].status, "pending");
        assert!((read.overall_progress - 50.0).abs() < f64::EPSILON);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file_reads_as_no_run() {
        let file = StatusFile::new(temp_status_path());
        let status = file.read();
        assert!(!status.running);
        assert!(!status.completed);
        assert!(status.exchanges.is_empty());
    }

    #[test]
    fn test_corrupt_file_reads_as_no_run() {
        let path = temp_status_path();
        fs::write(&path, "{ this is not json").unwrap();

        let status = StatusFile::new(&path).read();
        assert!(!status.running);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_interrupted_temp_write_never_corrupts_target() {
        let path = temp_status_path();
        let file = StatusFile::new(&path);
        file.write(&sample_status()).unwrap();

        // A crash mid-write leaves only a partial temp file behind; the live
        // target must stay parseable.
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, "{\"running\": tru").unwrap();

        let read = file.read();
        assert!(read.running);
        assert_eq!(read.total_records, 1234);

        fs::remove_file(&path).unwrap();
        fs::remove_file(&tmp_path).unwrap();
    }

    #[test]
    fn test_overall_progress_counts_failed_sources() {
        let mut status = RunStatus::starting(&[
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
            "d".to_string(),
        ]);
        status.exchanges.get_mut("a").unwrap().status = "completed".to_string();
        status.exchanges.get_mut("b").unwrap().status = "failed: timeout".to_string();
        status.refresh_overall_progress();
        assert!((status.overall_progress - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_json_shape_matches_consumers() {
        let status = sample_status();
        let value: serde_json::Value = serde_json::to_value(&status).unwrap();

        assert!(value.get("running").is_some());
        assert!(value.get("overall_progress").is_some());
        assert!(value.get("total_records").is_some());
        assert!(value.get("completed").is_some());
        assert!(value.get("message").is_some());
        let binance = &value["exchanges"]["binance"];
        for key in [
            "symbols_processed",
            "total_symbols",
            "records_fetched",
            "status",
            "elapsed_time",
            "estimated_remaining",
        ] {
            assert!(binance.get(key).is_some(), "missing key {key}");
        }
    }
}
