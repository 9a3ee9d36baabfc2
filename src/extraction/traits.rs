use async_trait::async_trait;
use thiserror::Error;

use super::diagnostics::{self, FailureClass};
use super::types::{FetchRequest, VariantSet};
use crate::config::StrategyProfile;

/// Failure of a single backend call
#[derive(Debug, Clone, Error)]
#[error("{class}: {detail}")]
pub struct BackendError {
    pub class: FailureClass,
    pub detail: String,
}

impl BackendError {
    pub fn new(class: FailureClass, detail: impl Into<String>) -> Self {
        Self {
            class,
            detail: detail.into(),
        }
    }

    /// Classify free-form backend output
    pub fn from_output(text: &str) -> Self {
        Self::new(diagnostics::classify(text), diagnostics::summarize(text))
    }
}

/// External extraction service.
///
/// Both calls may be slow, rate limited, or fail with heterogeneous error
/// text; implementations classify failures into a [`FailureClass`].
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// List the variants available for `url` under the given identity
    async fn probe(&self, url: &str, strategy: &StrategyProfile)
    -> Result<VariantSet, BackendError>;

    /// Transfer the selected variant to `request.destination`
    async fn fetch(
        &self,
        request: &FetchRequest,
        strategy: &StrategyProfile,
    ) -> Result<(), BackendError>;
}
