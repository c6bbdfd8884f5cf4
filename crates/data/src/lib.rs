//! Data storage and management for the funding rate collection engine.
//!
//! This crate provides:
//! - Database pool setup for `PostgreSQL`/TimescaleDB
//! - Normalized funding rate models
//! - The [`FundingStore`] capability trait the engine depends on
//! - The sqlx repository implementing it

pub mod database;
pub mod models;
pub mod repositories;
pub mod storage;

pub use database::connect;
pub use models::{split_symbol, ContractRef, FundingRateRecord};
pub use repositories::FundingRateRepository;
pub use storage::FundingStore;
