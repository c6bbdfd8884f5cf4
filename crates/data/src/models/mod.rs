//! Data models for the funding rate collection engine.
//!
//! All models use `rust_decimal::Decimal` for financial precision and derive
//! `sqlx::FromRow` for database compatibility.

pub mod contract;
pub mod funding;

pub use contract::ContractRef;
pub use funding::{split_symbol, FundingRateRecord};
