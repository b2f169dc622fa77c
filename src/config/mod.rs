//! Configuration loading and management.
//!
//! - [`types`]: Config struct definitions and TOML loading
//! - [`validation`]: Startup checks that report every problem at once

mod types;
pub mod validation;

pub use types::{
    BotConfig, BridgeConfig, Config, ConfigError, DatabaseConfig, HttpConfig, NamingConfig,
    ReconcileConfig,
};
