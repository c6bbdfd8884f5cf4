//! Error types for exchange connectors.
//!
//! Distinguishes transient failures (retried with backoff by the backfill
//! coordinator) from permanent ones (surfaced immediately).

use thiserror::Error;

/// Errors that can occur when fetching from a source exchange.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// Request timeout.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Rate limit exceeded (HTTP 429 or a source-specific signal).
    #[error("rate limit exceeded{}", retry_after_secs.map(|s| format!(", retry after {s}s")).unwrap_or_default())]
    RateLimited {
        /// Seconds to wait before retry, when the source says so.
        retry_after_secs: Option<u64>,
    },

    /// API request failed.
    #[error("API error: {status_code} - {message}")]
    Api {
        /// HTTP status code.
        status_code: u16,
        /// Error message from the API.
        message: String,
    },

    /// Response could not be parsed into the normalized shape.
    #[error("malformed response: {0}")]
    Parse(String),

    /// Symbol is not listed on this source.
    #[error("unsupported symbol: {0}")]
    UnsupportedSymbol(String),
}

impl ConnectorError {
    /// Creates an API error from status code and message.
    pub fn api(status_code: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status_code,
            message: message.into(),
        }
    }

    /// Creates a rate limit error.
    #[must_use]
    pub fn rate_limited(retry_after_secs: Option<u64>) -> Self {
        Self::RateLimited { retry_after_secs }
    }

    /// Returns true if the error is worth retrying with backoff.
    ///
    /// Transient: network, timeout, rate limit, and 5xx responses.
    /// Everything else (malformed data, other 4xx) is permanent.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::RateLimited { .. } => true,
            Self::Api { status_code, .. } => *status_code >= 500,
            Self::Parse(_) | Self::UnsupportedSymbol(_) => false,
        }
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(retry_after_secs.unwrap_or(60)),
            Self::Network(_) | Self::Timeout(_) => Some(1),
            Self::Api { status_code, .. } if *status_code >= 500 => Some(2),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Network(format!("connection failed: {err}"))
        } else if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Heuristic transient classifier for errors that lost their type.
///
/// The backfill retry loop sees `anyhow::Error`; when downcasting to
/// [`ConnectorError`] fails, it falls back to matching the message.
#[must_use]
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["timeout", "timed out", "connection reset", "rate limit", "temporarily unavailable", "429"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Result type alias for connector operations.
pub type Result<T> = std::result::Result<T, ConnectorError>;
