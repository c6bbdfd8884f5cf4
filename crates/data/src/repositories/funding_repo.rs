//! Funding rate repository.
//!
//! Typed access to the `funding_rates_current` and `funding_rates_historical`
//! tables with batch insert and time-range query operations.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::{ContractRef, FundingRateRecord};
use crate::storage::FundingStore;

/// Repository for funding rate operations.
///
/// Current snapshots are upserted by (source, symbol); historical rows are
/// insert-idempotent by (source, symbol, observed_at), refreshing only
/// mutable fields on conflict.
#[derive(Debug, Clone)]
pub struct FundingRateRepository {
    pool: PgPool,
}

impl FundingRateRepository {
    /// Creates a new repository instance.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upserts a batch of current snapshot records.
    ///
    /// # Errors
    /// Returns an error if the database transaction fails.
    pub async fn upsert_current_batch(&self, records: &[FundingRateRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for chunk in records.chunks(100) {
            for record in chunk {
                sqlx::query(
                    r#"
                    INSERT INTO funding_rates_current
                        (source, symbol, base_asset, quote_asset, funding_rate,
                         funding_interval_hours, apr, mark_price, index_price,
                         open_interest, observed_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                    ON CONFLICT (source, symbol) DO UPDATE
                    SET base_asset = EXCLUDED.base_asset,
                        quote_asset = EXCLUDED.quote_asset,
                        funding_rate = EXCLUDED.funding_rate,
                        funding_interval_hours = EXCLUDED.funding_interval_hours,
                        apr = EXCLUDED.apr,
                        mark_price = EXCLUDED.mark_price,
                        index_price = EXCLUDED.index_price,
                        open_interest = EXCLUDED.open_interest,
                        observed_at = EXCLUDED.observed_at
                    "#,
                )
                .bind(&record.source)
                .bind(&record.symbol)
                .bind(&record.base_asset)
                .bind(&record.quote_asset)
                .bind(record.funding_rate)
                .bind(record.funding_interval_hours)
                .bind(record.apr)
                .bind(record.mark_price)
                .bind(record.index_price)
                .bind(record.open_interest)
                .bind(record.observed_at)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Inserts a batch of historical records, idempotent on replay.
    ///
    /// The key (source, symbol, observed_at) never duplicates; a conflicting
    /// insert refreshes mutable fields only.
    ///
    /// # Errors
    /// Returns an error if the database transaction fails.
    pub async fn insert_historical_batch(&self, records: &[FundingRateRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for chunk in records.chunks(100) {
            for record in chunk {
                sqlx::query(
                    r#"
                    INSERT INTO funding_rates_historical
                        (source, symbol, base_asset, quote_asset, funding_rate,
                         funding_interval_hours, apr, mark_price, index_price,
                         open_interest, observed_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                    ON CONFLICT (source, symbol, observed_at) DO UPDATE
                    SET funding_rate = EXCLUDED.funding_rate,
                        funding_interval_hours = EXCLUDED.funding_interval_hours,
                        apr = EXCLUDED.apr,
                        mark_price = EXCLUDED.mark_price,
                        index_price = EXCLUDED.index_price,
                        open_interest = EXCLUDED.open_interest
                    "#,
                )
                .bind(&record.source)
                .bind(&record.symbol)
                .bind(&record.base_asset)
                .bind(&record.quote_asset)
                .bind(record.funding_rate)
                .bind(record.funding_interval_hours)
                .bind(record.apr)
                .bind(record.mark_price)
                .bind(record.index_price)
                .bind(record.open_interest)
                .bind(record.observed_at)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Gets the most recent historical timestamp for a contract.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn latest_timestamp(
        &self,
        source: &str,
        symbol: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
            r#"
            SELECT observed_at
            FROM funding_rates_historical
            WHERE source = $1 AND symbol = $2
            ORDER BY observed_at DESC
            LIMIT 1
            "#,
        )
        .bind(source)
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.0))
    }

    /// Lists every distinct (source, symbol) pair in the historical table.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn distinct_contracts(&self) -> Result<Vec<ContractRef>> {
        let contracts = sqlx::query_as::<_, ContractRef>(
            r#"
            SELECT DISTINCT source, symbol
            FROM funding_rates_historical
            ORDER BY source, symbol
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(contracts)
    }

    /// Queries observation timestamps within `[start, end)`, ascending.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn points_in_window(
        &self,
        source: &str,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>> {
        let rows: Vec<(DateTime<Utc>,)> = sqlx::query_as(
            r#"
            SELECT observed_at
            FROM funding_rates_historical
            WHERE source = $1 AND symbol = $2
              AND observed_at >= $3 AND observed_at < $4
            ORDER BY observed_at ASC
            "#,
        )
        .bind(source)
        .bind(symbol)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    /// Queries the most recent `limit` observation timestamps, descending.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn recent_timestamps(
        &self,
        source: &str,
        symbol: &str,
        limit: i64,
    ) -> Result<Vec<DateTime<Utc>>> {
        let rows: Vec<(DateTime<Utc>,)> = sqlx::query_as(
            r#"
            SELECT observed_at
            FROM funding_rates_historical
            WHERE source = $1 AND symbol = $2
            ORDER BY observed_at DESC
            LIMIT $3
            "#,
        )
        .bind(source)
        .bind(symbol)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    /// Queries full historical records for a contract within `[start, end)`.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn query_by_time_range(
        &self,
        source: &str,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<FundingRateRecord>> {
        let records = sqlx::query_as::<_, FundingRateRecord>(
            r#"
            SELECT source, symbol, base_asset, quote_asset, funding_rate,
                   funding_interval_hours, apr, mark_price, index_price,
                   open_interest, observed_at
            FROM funding_rates_historical
            WHERE source = $1 AND symbol = $2
              AND observed_at >= $3 AND observed_at < $4
            ORDER BY observed_at ASC
            "#,
        )
        .bind(source)
        .bind(symbol)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Deletes historical records before a given timestamp.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn delete_before(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM funding_rates_historical
            WHERE observed_at < $1
            "#,
        )
        .bind(before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl FundingStore for FundingRateRepository {
    async fn upsert_current(&self, records: &[FundingRateRecord]) -> Result<()> {
        self.upsert_current_batch(records).await
    }

    async fn insert_historical(&self, records: &[FundingRateRecord]) -> Result<()> {
        self.insert_historical_batch(records).await
    }

    async fn latest_timestamp(
        &self,
        source: &str,
        symbol: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        Self::latest_timestamp(self, source, symbol).await
    }

    async fn distinct_contracts(&self) -> Result<Vec<ContractRef>> {
        Self::distinct_contracts(self).await
    }

    async fn points_in_window(
        &self,
        source: &str,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>> {
        Self::points_in_window(self, source, symbol, start, end).await
    }

    async fn recent_timestamps(
        &self,
        source: &str,
        symbol: &str,
        limit: i64,
    ) -> Result<Vec<DateTime<Utc>>> {
        Self::recent_timestamps(self, source, symbol, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_repository_is_cloneable() {
        // Repositories are cloned into per-source workers; the pool handle
        // inside is itself a cheap clone.
        fn assert_clone<T: Clone>() {}
        assert_clone::<FundingRateRepository>();
    }

    #[test]
    fn test_record_maps_to_row_shape() {
        let timestamp = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
        let record = FundingRateRecord::new(
            "binance",
            "BTCUSDT",
            "BTC",
            "USDT",
            dec!(0.0001),
            8,
            timestamp,
        );

        let json = serde_json::to_string(&record);
        assert!(json.is_ok());
    }
}
