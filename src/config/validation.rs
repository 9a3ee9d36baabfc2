use super::models::Config;
use crate::download::MAX_FETCH_ATTEMPTS;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("No extraction strategies configured (at least one is required)")]
    NoStrategies,

    #[error("Extraction strategy #{index} has an empty name")]
    EmptyStrategyName { index: usize },

    #[error("Extraction strategy '{name}' is configured more than once")]
    DuplicateStrategy { name: String },

    #[error("formats.max_choices must be at least 1")]
    InvalidMaxChoices,

    #[error("formats.max_height must be positive when set")]
    InvalidMaxHeight,

    #[error("Invalid public base URL '{url}': {reason}")]
    InvalidPublicBaseUrl { url: String, reason: String },

    #[error("Value must be positive: {field}")]
    NotPositive { field: &'static str },

    #[error(
        "limits.job_timeout_secs ({job_timeout_secs}) must be at least {required_secs} \
         to fit every fetch attempt of a download"
    )]
    JobTimeoutTooShort {
        job_timeout_secs: u64,
        required_secs: u64,
    },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_strategies(config)?;
    validate_formats(config)?;
    validate_retrieval(config)?;
    validate_bounds(config)?;
    Ok(())
}

/// Strategy names show up in logs and attempt histories, so they must be distinct
fn validate_strategies(config: &Config) -> Result<(), ValidationError> {
    let strategies = &config.extraction.strategies;
    if strategies.is_empty() {
        return Err(ValidationError::NoStrategies);
    }

    let mut seen = HashSet::new();
    for (index, strategy) in strategies.iter().enumerate() {
        let name = strategy.name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyStrategyName { index });
        }
        if !seen.insert(name) {
            return Err(ValidationError::DuplicateStrategy {
                name: name.to_string(),
            });
        }
    }

    Ok(())
}

fn validate_formats(config: &Config) -> Result<(), ValidationError> {
    if config.formats.max_choices == 0 {
        return Err(ValidationError::InvalidMaxChoices);
    }
    if config.formats.max_height == Some(0) {
        return Err(ValidationError::InvalidMaxHeight);
    }
    Ok(())
}

fn validate_retrieval(config: &Config) -> Result<(), ValidationError> {
    let raw = &config.retrieval.public_base_url;
    let invalid = |reason: &str| ValidationError::InvalidPublicBaseUrl {
        url: raw.clone(),
        reason: reason.to_string(),
    };

    let parsed = url::Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if parsed.host_str().is_none() {
        return Err(invalid("missing host"));
    }

    Ok(())
}

/// Timeouts, retention and concurrency limits of zero would disable the bound entirely
fn validate_bounds(config: &Config) -> Result<(), ValidationError> {
    let checks: [(&'static str, u64); 9] = [
        ("transport.poll_timeout_secs", config.transport.poll_timeout_secs),
        ("extraction.socket_timeout_secs", config.extraction.socket_timeout_secs),
        ("extraction.probe_timeout_secs", config.extraction.probe_timeout_secs),
        ("extraction.fetch_timeout_secs", config.extraction.fetch_timeout_secs),
        ("staging.max_age_secs", config.staging.max_age_secs),
        ("staging.max_total_bytes", config.staging.max_total_bytes.as_u64()),
        ("staging.sweep_interval_secs", config.staging.sweep_interval_secs),
        ("limits.max_concurrent_jobs", config.limits.max_concurrent_jobs as u64),
        ("limits.job_timeout_secs", config.limits.job_timeout_secs),
    ];

    for (field, value) in checks {
        if value == 0 {
            return Err(ValidationError::NotPositive { field });
        }
    }

    if config.staging.max_file_bytes.map(|b| b.as_u64()) == Some(0) {
        return Err(ValidationError::NotPositive {
            field: "staging.max_file_bytes",
        });
    }

    // A job that times out mid-fetch never gets to its retry
    let required_secs = config
        .extraction
        .fetch_timeout_secs
        .saturating_mul(MAX_FETCH_ATTEMPTS as u64);
    if config.limits.job_timeout_secs < required_secs {
        return Err(ValidationError::JobTimeoutTooShort {
            job_timeout_secs: config.limits.job_timeout_secs,
            required_secs,
        });
    }

    Ok(())
}
