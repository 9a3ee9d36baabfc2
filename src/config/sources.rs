use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "REELBOX_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/reelbox.toml";
const ENV_PREFIX: &str = "REELBOX";
const ENV_SEPARATOR: &str = "__";

const TOKEN_ENV_VARS: &[&str] = &["REELBOX_BOT_TOKEN", "BOT_TOKEN"];

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs, then legacy `BASE_URL` / `PORT`)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load(path_override: Option<PathBuf>) -> Result<Config, ConfigError> {
    // Load .env file if it exists (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    let config_path = path_override.unwrap_or_else(|| {
        env::var(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    });

    let mut config = build(config_path, &legacy_defaults())?;

    load_secrets(&mut config);

    Ok(config)
}

/// Secrets are never stored in TOML files, only in environment
fn load_secrets(config: &mut Config) {
    config.transport.token = TOKEN_ENV_VARS
        .iter()
        .filter_map(|name| env::var(name).ok())
        .find(|value| !value.trim().is_empty());
}

/// Variables understood by legacy deployments.
/// They act as defaults, so the TOML file and `REELBOX__*` still win.
fn legacy_defaults() -> Vec<(&'static str, String)> {
    let mut defaults = Vec::new();

    if let Ok(base_url) = env::var("BASE_URL") {
        defaults.push(("retrieval.public_base_url", base_url));
    }
    if let Ok(port) = env::var("PORT") {
        defaults.push(("retrieval.bind_addr", format!("0.0.0.0:{}", port.trim())));
    }

    defaults
}

/// Load configuration from a specific path and environment
/// Useful for testing with custom config files
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    build(config_path, &[])
}

fn build(config_path: PathBuf, defaults: &[(&str, String)]) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    for (key, value) in defaults {
        builder = builder.set_default(*key, value.as_str())?;
    }

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // REELBOX__RETRIEVAL__BIND_ADDR -> retrieval.bind_addr
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}
