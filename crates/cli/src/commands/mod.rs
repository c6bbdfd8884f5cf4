//! CLI command implementations.

pub mod backfill;
pub mod collect;
pub mod data_status;
pub mod validate;

pub use backfill::{run_backfill, BackfillArgs};
pub use collect::{run_collect, CollectArgs};
pub use data_status::{run_data_status, DataStatusArgs};
pub use validate::{run_validate, ValidateArgs};

use std::sync::Arc;

use anyhow::{anyhow, Result};
use funding_connectors::{BinanceConnector, Connector, SourceRateLimiter};

/// Source names with an in-tree connector.
pub const KNOWN_SOURCES: [&str; 1] = ["binance"];

/// Builds connectors for the requested sources; `None` means all known.
///
/// # Errors
/// Returns an error for a source name with no registered connector.
pub fn build_connectors(
    sources: Option<&[String]>,
    limiter: &Arc<SourceRateLimiter>,
) -> Result<Vec<Arc<dyn Connector>>> {
    let requested: Vec<String> = match sources {
        Some(names) => names.to_vec(),
        None => KNOWN_SOURCES.iter().map(|s| (*s).to_string()).collect(),
    };

    let mut connectors: Vec<Arc<dyn Connector>> = Vec::with_capacity(requested.len());
    for name in &requested {
        match name.as_str() {
            "binance" => connectors.push(Arc::new(BinanceConnector::new(limiter.clone())?)),
            other => {
                return Err(anyhow!(
                    "Unknown source: '{}'. Known sources: {}",
                    other,
                    KNOWN_SOURCES.join(", ")
                ))
            }
        }
    }

    Ok(connectors)
}

/// Parses a comma-separated source list, lowercased and deduplicated.
///
/// Empty input and the literal "all" mean every known source.
#[must_use]
pub fn parse_source_list(s: &str) -> Option<Vec<String>> {
    let s = s.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("all") {
        return None;
    }

    let mut seen = std::collections::HashSet::new();
    let mut sources = Vec::new();
    for part in s.split(',') {
        let name = part.trim().to_lowercase();
        if !name.is_empty() && seen.insert(name.clone()) {
            sources.push(name);
        }
    }

    if sources.is_empty() {
        None
    } else {
        Some(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_source_list_empty_means_all() {
        assert_eq!(parse_source_list(""), None);
        assert_eq!(parse_source_list("all"), None);
        assert_eq!(parse_source_list("  ALL "), None);
    }

    #[test]
    fn test_parse_source_list_dedupes_and_lowercases() {
        let sources = parse_source_list("Binance,bybit,BINANCE").unwrap();
        assert_eq!(sources, vec!["binance".to_string(), "bybit".to_string()]);
    }

    #[test]
    fn test_parse_source_list_only_commas_means_all() {
        assert_eq!(parse_source_list(",,,"), None);
    }

    #[test]
    fn test_build_connectors_rejects_unknown() {
        let limiter = Arc::new(SourceRateLimiter::with_rate(5.0));
        let err = match build_connectors(Some(&["nope".to_string()]), &limiter) {
            Ok(_) => panic!("expected an error for an unknown source"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_build_connectors_default_set() {
        let limiter = Arc::new(SourceRateLimiter::with_rate(5.0));
        let connectors = build_connectors(None, &limiter).unwrap();
        assert_eq!(connectors.len(), KNOWN_SOURCES.len());
        assert_eq!(connectors[0].name(), "binance");
    }

}
