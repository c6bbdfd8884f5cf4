//! Database repositories for the funding rate collection engine.

pub mod funding_repo;

pub use funding_repo::FundingRateRepository;
