//! Exchange connector capability and rate limiting.
//!
//! This crate provides:
//! - The [`Connector`] trait every source adapter implements
//! - The [`ConnectorError`] taxonomy separating transient from permanent failures
//! - The shared per-source token-bucket [`SourceRateLimiter`]
//! - A reference connector for Binance USD-M futures

pub mod binance;
pub mod connector;
pub mod error;
pub mod rate_limit;

pub use binance::BinanceConnector;
pub use connector::Connector;
pub use error::{is_transient_message, ConnectorError};
pub use rate_limit::{SourceLimiterStatus, SourceRateLimiter};
