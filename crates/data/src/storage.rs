//! Storage capability consumed by the collection and backfill engine.
//!
//! The engine depends only on this trait, never on a concrete backend, so
//! tests run against in-memory implementations.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{ContractRef, FundingRateRecord};

#[async_trait]
pub trait FundingStore: Send + Sync {
    /// Replaces the current snapshot rows, keyed by (source, symbol). Latest wins.
    async fn upsert_current(&self, records: &[FundingRateRecord]) -> Result<()>;

    /// Inserts historical rows keyed by (source, symbol, observed_at).
    ///
    /// Replaying a fetch must not duplicate rows; a conflicting insert
    /// refreshes mutable fields only.
    async fn insert_historical(&self, records: &[FundingRateRecord]) -> Result<()>;

    /// Most recent historical timestamp for a contract, if any.
    async fn latest_timestamp(
        &self,
        source: &str,
        symbol: &str,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Every (source, symbol) pair known to the historical table.
    async fn distinct_contracts(&self) -> Result<Vec<ContractRef>>;

    /// Observation timestamps within `[start, end)`, ascending.
    async fn points_in_window(
        &self,
        source: &str,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>>;

    /// The most recent `limit` observation timestamps, descending.
    ///
    /// Used for funding interval inference.
    async fn recent_timestamps(
        &self,
        source: &str,
        symbol: &str,
        limit: i64,
    ) -> Result<Vec<DateTime<Utc>>>;
}
