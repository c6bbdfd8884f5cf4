//! The source connector capability.
//!
//! The collection and backfill engine depends only on this trait; each
//! exchange adapter implements it once and stays otherwise invisible.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use funding_data::FundingRateRecord;

use crate::error::Result;

#[async_trait]
pub trait Connector: Send + Sync {
    /// Stable source id (e.g., "binance"), used as the rate-limiter key and
    /// the `source` column value.
    fn name(&self) -> &str;

    /// Fetches the current funding snapshot for every active contract.
    ///
    /// Implementations must acquire from the shared rate limiter before
    /// every outbound request.
    async fn fetch_current(&self) -> Result<Vec<FundingRateRecord>>;

    /// Fetches historical funding records within the explicit `[start, end)`
    /// window. The window comes from the coordinator so every source covers
    /// the same synchronized range.
    async fn fetch_historical(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<FundingRateRecord>>;

    /// Lists symbols currently tradable on this source.
    async fn list_active_symbols(&self) -> Result<Vec<String>>;
}
