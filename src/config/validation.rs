//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::Config;
use crate::state::{TemplateError, naming};
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("bot.name is required")]
    MissingBotName,
    #[error("bridge.base_url must be an http(s) URL, got '{0}'")]
    InvalidBridgeUrl(String),
    #[error("bridge.timeout_secs must be greater than zero")]
    ZeroTimeout,
    #[error("reconcile.interval_secs must be greater than zero")]
    ZeroInterval,
    #[error("naming.default_template is invalid: {0}")]
    InvalidTemplate(TemplateError),
    #[error("naming.spawner_name is required")]
    MissingSpawnerName,
    #[error("database.path is required")]
    MissingDatabasePath,
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.bot.name.trim().is_empty() {
        errors.push(ValidationError::MissingBotName);
    }

    let url = &config.bridge.base_url;
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        errors.push(ValidationError::InvalidBridgeUrl(url.clone()));
    }
    if config.bridge.timeout_secs == 0 {
        errors.push(ValidationError::ZeroTimeout);
    }

    if config.reconcile.interval_secs == 0 {
        errors.push(ValidationError::ZeroInterval);
    }

    if let Err(e) = naming::validate_template(&config.naming.default_template) {
        errors.push(ValidationError::InvalidTemplate(e));
    }
    if config.naming.spawner_name.trim().is_empty() {
        errors.push(ValidationError::MissingSpawnerName);
    }

    if config.database.path.is_empty() {
        errors.push(ValidationError::MissingDatabasePath);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
