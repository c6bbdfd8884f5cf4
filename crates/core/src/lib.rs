pub mod config;
pub mod config_loader;

pub use config::{
    AppConfig, BackfillConfig, CollectionConfig, DatabaseConfig, RateLimitConfig, ValidationConfig,
};
pub use config_loader::ConfigLoader;
