//! Retry with exponential backoff for transient source failures.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use funding_connectors::{is_transient_message, ConnectorError};

/// Retry policy: fixed attempt cap, exponential delay (1s, 2s, 4s, ...).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given attempt cap and base delay.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay before the retry following `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * 2_u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// Runs `operation` until it succeeds, fails permanently, or exhausts
    /// the attempt cap.
    ///
    /// Only transient errors are retried; permanent ones surface immediately.
    ///
    /// # Errors
    /// Returns the last error observed.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if !is_transient(&error) {
                        tracing::warn!("{}: permanent error, not retrying: {}", label, error);
                        return Err(error);
                    }
                    if attempt >= self.max_attempts {
                        tracing::warn!(
                            "{}: transient error persisted through {} attempts: {}",
                            label,
                            attempt,
                            error
                        );
                        return Err(error);
                    }

                    let delay = self.delay_after(attempt);
                    tracing::warn!(
                        "{}: transient error on attempt {}/{}, retrying in {:?}: {}",
                        label,
                        attempt,
                        self.max_attempts,
                        delay,
                        error
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Classifies an error as transient.
///
/// Typed connector errors carry their own classification; anything else
/// falls back to the message heuristics (timeout, connection reset, rate
/// limit, temporarily unavailable).
#[must_use]
pub fn is_transient(error: &anyhow::Error) -> bool {
    if let Some(connector_error) = error.downcast_ref::<ConnectorError>() {
        return connector_error.is_transient();
    }
    is_transient_message(&format!("{error:#}"))
}
