use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::diagnostics::FailureClass;
use super::traits::{BackendError, ExtractionBackend};
use super::types::VariantSet;
use crate::config::StrategyProfile;

/// One failed strategy attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub index: usize,
    pub strategy: String,
    pub class: FailureClass,
    pub detail: String,
}

/// Outcome of a chain that ran out of strategies or hit a fatal error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionFailureKind {
    /// Not a fetchable URL at all
    MalformedInput,
    /// No extractor for this source
    UnsupportedSource,
    /// The extraction tool could not be run
    BackendUnavailable,
    /// At least one strategy hit an authentication or verification challenge
    AccessRestricted,
    /// Backend responded but nothing usable came back
    NoViableFormat,
}

impl ExtractionFailureKind {
    /// Aggregate an attempt history into a single kind.
    ///
    /// Fatal classes win, then any access restriction, since that is the one
    /// outcome an operator can act on (refresh cookies).
    pub fn from_attempts(attempts: &[AttemptRecord]) -> Self {
        let has = |class| attempts.iter().any(|a| a.class == class);

        if has(FailureClass::MalformedInput) {
            Self::MalformedInput
        } else if has(FailureClass::Unsupported) {
            Self::UnsupportedSource
        } else if has(FailureClass::BackendMissing) || has(FailureClass::StorageFailure) {
            Self::BackendUnavailable
        } else if has(FailureClass::AccessRestricted) {
            Self::AccessRestricted
        } else {
            Self::NoViableFormat
        }
    }
}

impl fmt::Display for ExtractionFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MalformedInput => "malformed input",
            Self::UnsupportedSource => "unsupported source",
            Self::BackendUnavailable => "backend unavailable",
            Self::AccessRestricted => "access restricted",
            Self::NoViableFormat => "no viable format",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("extraction failed ({kind}) after {} attempt(s)", .attempts.len())]
    Failed {
        kind: ExtractionFailureKind,
        attempts: Vec<AttemptRecord>,
    },

    #[error("extraction cancelled")]
    Cancelled,
}

impl ExtractionError {
    fn failed(attempts: Vec<AttemptRecord>) -> Self {
        Self::Failed {
            kind: ExtractionFailureKind::from_attempts(&attempts),
            attempts,
        }
    }
}

/// Successful resolution of a URL
#[derive(Debug, Clone)]
pub struct Resolution {
    pub variants: VariantSet,
    /// Index into the chain of the strategy that produced `variants`
    pub strategy_index: usize,
    /// Strategies that failed before the successful one
    pub attempts: Vec<AttemptRecord>,
}

/// Ordered list of identities presented to the extraction backend
pub struct ExtractionStrategyChain {
    backend: Arc<dyn ExtractionBackend>,
    strategies: Vec<StrategyProfile>,
}

impl ExtractionStrategyChain {
    pub fn new(backend: Arc<dyn ExtractionBackend>, strategies: Vec<StrategyProfile>) -> Self {
        Self {
            backend,
            strategies,
        }
    }

    pub fn backend(&self) -> &Arc<dyn ExtractionBackend> {
        &self.backend
    }

    pub fn strategies(&self) -> &[StrategyProfile] {
        &self.strategies
    }

    pub fn strategy(&self, index: usize) -> Option<&StrategyProfile> {
        self.strategies.get(index)
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Try each strategy in order until one returns a non-empty format list.
    ///
    /// Stops at the first success. Recoverable failures advance to the next
    /// strategy; fatal ones abort with the history collected so far.
    pub async fn resolve(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Resolution, ExtractionError> {
        if let Err(reason) = check_url(url) {
            debug!(url, reason, "Rejected URL before probing");
            return Err(ExtractionError::failed(vec![AttemptRecord {
                index: 0,
                strategy: "precheck".to_string(),
                class: FailureClass::MalformedInput,
                detail: reason.to_string(),
            }]));
        }

        let mut attempts = Vec::new();

        for (index, strategy) in self.strategies.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ExtractionError::Cancelled);
            }

            debug!(url, strategy = %strategy.name, attempt = index + 1, "Probing");

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ExtractionError::Cancelled),
                outcome = self.backend.probe(url, strategy) => outcome,
            };

            let error = match outcome {
                Ok(set) if !set.variants.is_empty() => {
                    info!(
                        url,
                        strategy = %strategy.name,
                        attempt = index + 1,
                        variants = set.variants.len(),
                        "Extraction succeeded"
                    );
                    return Ok(Resolution {
                        variants: set,
                        strategy_index: index,
                        attempts,
                    });
                }
                Ok(_) => BackendError::new(FailureClass::Degenerate, "empty format list"),
                Err(e) => e,
            };

            warn!(
                url,
                strategy = %strategy.name,
                attempt = index + 1,
                class = %error.class,
                error = %error.detail,
                "Extraction attempt failed"
            );

            let recoverable = error.class.is_recoverable();
            attempts.push(AttemptRecord {
                index,
                strategy: strategy.name.clone(),
                class: error.class,
                detail: error.detail,
            });

            if !recoverable {
                break;
            }
        }

        let error = ExtractionError::failed(attempts);
        warn!(url, error = %error, "Extraction exhausted");
        Err(error)
    }
}

fn check_url(raw: &str) -> Result<(), &'static str> {
    let parsed = url::Url::parse(raw.trim()).map_err(|_| "not an absolute URL")?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err("only http and https URLs are supported");
    }
    if parsed.host_str().is_none() {
        return Err("URL has no host");
    }
    Ok(())
}
