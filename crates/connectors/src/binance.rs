//! Binance USD-M futures connector.
//!
//! Reference implementation of the [`Connector`] capability: paginated
//! historical funding fetches and a premium-index snapshot for current
//! rates, every request gated by the shared rate limiter.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use funding_data::{split_symbol, FundingRateRecord};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::connector::Connector;
use crate::error::{ConnectorError, Result};
use crate::rate_limit::SourceRateLimiter;

const SOURCE_NAME: &str = "binance";
/// Binance settles funding every 8 hours on almost all USD-M perpetuals.
const FUNDING_INTERVAL_HOURS: i32 = 8;
/// Binance caps fundingRate pagination at 1000 rows per request.
const PAGE_LIMIT: usize = 1000;

pub struct BinanceConnector {
    http_client: Client,
    base_url: String,
    limiter: Arc<SourceRateLimiter>,
}

/// One row of `/fapi/v1/fundingRate`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceFundingRate {
    symbol: String,
    funding_rate: String,
    funding_time: i64,
}

/// One row of `/fapi/v1/premiumIndex`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinancePremiumIndex {
    symbol: String,
    mark_price: String,
    index_price: String,
    last_funding_rate: String,
    time: i64,
}

#[derive(Debug, Deserialize)]
struct BinanceExchangeInfo {
    symbols: Vec<BinanceSymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceSymbolInfo {
    symbol: String,
    status: String,
    contract_type: String,
}

impl BinanceConnector {
    /// Creates a connector against the production API.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(limiter: Arc<SourceRateLimiter>) -> Result<Self> {
        Self::with_base_url("https://fapi.binance.com".to_string(), limiter)
    }

    /// Creates a connector against a custom base URL (tests, mirrors).
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_base_url(base_url: String, limiter: Arc<SourceRateLimiter>) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(ConnectorError::from)?;

        Ok(Self {
            http_client,
            base_url,
            limiter,
        })
    }

    /// Issues one rate-limited GET and decodes the JSON body.
    ///
    /// A 429 empties this source's bucket via `report_throttled` before the
    /// error is returned, so the next acquire waits the advertised interval.
    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.limiter.acquire(SOURCE_NAME).await;

        let response = self.http_client.get(url).send().await?;
        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            self.limiter
                .report_throttled(SOURCE_NAME, retry_after.map(Duration::from_secs))
                .await;
            return Err(ConnectorError::rate_limited(retry_after));
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ConnectorError::api(status.as_u16(), message));
        }

        Ok(response.json::<T>().await?)
    }

    fn parse_decimal(value: &str, field: &str) -> Result<Decimal> {
        Decimal::from_str(value)
            .map_err(|e| ConnectorError::Parse(format!("invalid {field} '{value}': {e}")))
    }

    fn parse_timestamp(millis: i64) -> Result<DateTime<Utc>> {
        DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| ConnectorError::Parse(format!("invalid timestamp: {millis}")))
    }

    /// Fetches one symbol's funding history with forward pagination.
    async fn fetch_symbol_history(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<FundingRateRecord>> {
        let mut records = Vec::new();
        let mut current_start = start.timestamp_millis();
        let end_ms = end.timestamp_millis();

        loop {
            let url = format!(
                "{}/fapi/v1/fundingRate?symbol={}&startTime={}&endTime={}&limit={}",
                self.base_url, symbol, current_start, end_ms, PAGE_LIMIT
            );

            let page: Vec<BinanceFundingRate> = self.get_json(&url).await?;
            if page.is_empty() {
                break;
            }

            let page_len = page.len();
            let last_time = page.last().map_or(end_ms, |r| r.funding_time);

            for row in page {
                let observed_at = Self::parse_timestamp(row.funding_time)?;
                // Binance reports the window end-inclusive; keep [start, end).
                if observed_at >= end {
                    continue;
                }
                let funding_rate = Self::parse_decimal(&row.funding_rate, "fundingRate")?;
                let (base_asset, quote_asset) = split_symbol(&row.symbol);

                records.push(FundingRateRecord::new(
                    SOURCE_NAME,
                    row.symbol,
                    base_asset,
                    quote_asset,
                    funding_rate,
                    FUNDING_INTERVAL_HOURS,
                    observed_at,
                ));
            }

            // Move past the last row we received.
            current_start = last_time + 1;
            if current_start >= end_ms || page_len < PAGE_LIMIT {
                break;
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl Connector for BinanceConnector {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch_current(&self) -> Result<Vec<FundingRateRecord>> {
        let url = format!("{}/fapi/v1/premiumIndex", self.base_url);
        let rows: Vec<BinancePremiumIndex> = self.get_json(&url).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let funding_rate = Self::parse_decimal(&row.last_funding_rate, "lastFundingRate")?;
            let mark_price = Self::parse_decimal(&row.mark_price, "markPrice")?;
            let index_price = Self::parse_decimal(&row.index_price, "indexPrice")?;
            let observed_at = Self::parse_timestamp(row.time)?;
            let (base_asset, quote_asset) = split_symbol(&row.symbol);

            records.push(
                FundingRateRecord::new(
                    SOURCE_NAME,
                    row.symbol,
                    base_asset,
                    quote_asset,
                    funding_rate,
                    FUNDING_INTERVAL_HOURS,
                    observed_at,
                )
                .with_prices(mark_price, index_price),
            );
        }

        Ok(records)
    }

    async fn fetch_historical(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<FundingRateRecord>> {
        let symbols = self.list_active_symbols().await?;
        let mut records = Vec::new();

        for symbol in &symbols {
            let symbol_records = self.fetch_symbol_history(symbol, start, end).await?;
            tracing::debug!(
                "Fetched {} historical funding records for {}:{}",
                symbol_records.len(),
                SOURCE_NAME,
                symbol
            );
            records.extend(symbol_records);
        }

        Ok(records)
    }

    async fn list_active_symbols(&self) -> Result<Vec<String>> {
        let url = format!("{}/fapi/v1/exchangeInfo", self.base_url);
        let info: BinanceExchangeInfo = self.get_json(&url).await?;

        Ok(info
            .symbols
            .into_iter()
            .filter(|s| s.status == "TRADING" && s.contract_type == "PERPETUAL")
            .map(|s| s.symbol)
            .collect())
    }
}
