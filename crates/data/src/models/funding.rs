//! Funding rate data model.
//!
//! One observation of a perpetual futures funding rate, normalized across
//! exchanges with different settlement intervals.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Hours in a (non-leap) year, used to annualize per-interval rates.
const HOURS_PER_YEAR: i64 = 8760;

/// A normalized funding rate observation.
///
/// `apr` is always derived from `funding_rate` and `funding_interval_hours`
/// via [`FundingRateRecord::annualize`]; the constructor computes it so the
/// three fields cannot be persisted inconsistently.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FundingRateRecord {
    /// Source exchange id (e.g., "binance")
    pub source: String,
    /// Contract symbol as listed by the source (e.g., "BTCUSDT")
    pub symbol: String,
    /// Base asset (e.g., "BTC")
    pub base_asset: String,
    /// Quote asset (e.g., "USDT")
    pub quote_asset: String,
    /// Per-interval funding rate (e.g., 0.0001 = 0.01% per settlement)
    pub funding_rate: Decimal,
    /// Settlement interval in hours; 1, 2, 4 or 8 in practice
    pub funding_interval_hours: i32,
    /// Annualized rate in percent: `funding_rate * (8760 / interval) * 100`
    pub apr: Decimal,
    /// Mark price at observation time
    pub mark_price: Option<Decimal>,
    /// Index price at observation time
    pub index_price: Option<Decimal>,
    /// Open interest in USD
    pub open_interest: Option<Decimal>,
    /// Observation instant (UTC)
    pub observed_at: DateTime<Utc>,
}

impl FundingRateRecord {
    /// Creates a record with the APR derived from rate and interval.
    ///
    /// `funding_interval_hours` must be positive; the known settlement
    /// intervals are 1, 2, 4 and 8 hours.
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        symbol: impl Into<String>,
        base_asset: impl Into<String>,
        quote_asset: impl Into<String>,
        funding_rate: Decimal,
        funding_interval_hours: i32,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source: source.into(),
            symbol: symbol.into(),
            base_asset: base_asset.into(),
            quote_asset: quote_asset.into(),
            funding_rate,
            funding_interval_hours,
            apr: Self::annualize(funding_rate, funding_interval_hours),
            mark_price: None,
            index_price: None,
            open_interest: None,
            observed_at,
        }
    }

    /// Attaches mark and index prices.
    #[must_use]
    pub fn with_prices(mut self, mark_price: Decimal, index_price: Decimal) -> Self {
        self.mark_price = Some(mark_price);
        self.index_price = Some(index_price);
        self
    }

    /// Attaches USD open interest.
    #[must_use]
    pub fn with_open_interest(mut self, open_interest: Decimal) -> Self {
        self.open_interest = Some(open_interest);
        self
    }

    /// Annualizes a per-interval rate as a percentage.
    ///
    /// Returns zero for a non-positive interval rather than dividing by it.
    #[must_use]
    pub fn annualize(funding_rate: Decimal, funding_interval_hours: i32) -> Decimal {
        if funding_interval_hours <= 0 {
            return Decimal::ZERO;
        }
        funding_rate * Decimal::from(HOURS_PER_YEAR) / Decimal::from(funding_interval_hours)
            * Decimal::from(100)
    }

    /// True when the stored APR matches the rate and interval it was derived from.
    #[must_use]
    pub fn apr_is_consistent(&self) -> bool {
        self.apr == Self::annualize(self.funding_rate, self.funding_interval_hours)
    }
}

/// Splits a symbol like "BTCUSDT" into base and quote assets.
///
/// Recognizes the common stablecoin quotes; falls back to treating the whole
/// symbol as the base with an empty quote when none match.
#[must_use]
pub fn split_symbol(symbol: &str) -> (String, String) {
    const QUOTES: [&str; 5] = ["USDT", "USDC", "USD", "BUSD", "DAI"];
    for quote in QUOTES {
        if let Some(base) = symbol.strip_suffix(quote) {
            if !base.is_empty() {
                return (base.to_string(), quote.to_string());
            }
        }
    }
    (symbol.to_string(), String::new())
}
