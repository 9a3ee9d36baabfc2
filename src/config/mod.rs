//! Configuration management for reelbox
//!
//! Settings are layered, later sources winning:
//! 1. struct defaults
//! 2. the TOML file
//! 3. `.env` and process environment
//!
//! The result is validated once and then shared read-only by every component.
//!
//! # Usage
//!
//! ```no_run
//! use reelbox::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Serving files on: {}", config.retrieval.bind_addr);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `REELBOX__<section>__<key>`
//!
//! Examples:
//! - `REELBOX__RETRIEVAL__BIND_ADDR=0.0.0.0:9000`
//! - `REELBOX__FORMATS__MAX_HEIGHT=1080`
//! - `REELBOX__STAGING__MAX_TOTAL_BYTES=20GB`
//!
//! The bot token is read from `REELBOX_BOT_TOKEN` (or `BOT_TOKEN`) only.
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/reelbox.toml`.
//! This can be overridden using the `REELBOX_CONFIG` environment variable
//! or the `--config` flag.

mod models;
mod sources;
mod validation;

// Re-export public types
pub use crate::humanize::ByteSize;
pub use models::{
    Config, ExtractionConfig, FormatsConfig, LimitsConfig, RetrievalConfig, StagingConfig,
    StrategyProfile, TransportConfig,
};
pub use validation::ValidationError;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),

    #[error("Bot token missing: set REELBOX_BOT_TOKEN or BOT_TOKEN")]
    MissingToken,
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`REELBOX__*`)
    /// 2. TOML file (default: `config/reelbox.toml`)
    /// 3. Legacy `BASE_URL` / `PORT` variables
    /// 4. Default values
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file is malformed
    /// - Validation fails (no strategies, bad base URL, zero bounds)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(None)
    }

    /// Same as [`Config::load`] with an explicit file location taking precedence
    /// over `REELBOX_CONFIG`.
    pub fn load_with(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = sources::load(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files. Secrets are not read.
    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// The transport credential, required only when talking to the chat platform
    pub fn bot_token(&self) -> Result<&str, ConfigError> {
        self.transport
            .token
            .as_deref()
            .ok_or(ConfigError::MissingToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[formats]
max_choices = 5

[[extraction.strategies]]
name = "default"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.formats.max_choices, 5);
        assert_eq!(config.extraction.strategies.len(), 1);
    }

    #[test]
    fn test_validation_catches_duplicate_strategy() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[[extraction.strategies]]
name = "web"

[[extraction.strategies]]
name = "web"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::DuplicateStrategy { .. })
        ));
    }

    #[test]
    fn test_malformed_file_is_load_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");
        fs::write(&config_path, "[formats]\nmax_choices = \"many\"\n").unwrap();

        assert!(matches!(
            Config::load_from_path(config_path),
            Err(ConfigError::LoadError(_))
        ));
    }

    #[test]
    fn test_token_required_only_on_demand() {
        let mut config = Config::default();
        assert!(matches!(config.bot_token(), Err(ConfigError::MissingToken)));

        config.transport.token = Some("123:abc".to_string());
        assert_eq!(config.bot_token().unwrap(), "123:abc");
    }
}
