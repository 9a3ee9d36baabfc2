//! Scripted backend for tests and local development

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;

use super::diagnostics::FailureClass;
use super::traits::{BackendError, ExtractionBackend};
use super::types::{FetchRequest, Variant, VariantSet};
use crate::config::StrategyProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Probe,
    Fetch,
}

/// One recorded backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub kind: CallKind,
    pub strategy: String,
    pub url: String,
    /// Format selector, for fetches
    pub selector: Option<String>,
}

/// Backend whose outcomes are scripted per strategy name.
///
/// Unscripted probes fail as [`FailureClass::Transient`]; unscripted fetches
/// succeed unless marked with [`ScriptedBackend::fetch_stall`]. A successful fetch writes `"<url>\n<selector>\n"` to the
/// destination, a failed one leaves a `.part` file behind like an
/// interrupted transfer.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    title: Option<String>,
    probes: HashMap<String, Result<Vec<Variant>, BackendError>>,
    fetch_failures: HashMap<String, BackendError>,
    stalled_fetches: HashSet<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed title for every probe (default: `"Title of <url>"`)
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn probe_ok(mut self, strategy: &str, variants: Vec<Variant>) -> Self {
        self.probes.insert(strategy.to_string(), Ok(variants));
        self
    }

    pub fn probe_err(mut self, strategy: &str, class: FailureClass, detail: &str) -> Self {
        self.probes
            .insert(strategy.to_string(), Err(BackendError::new(class, detail)));
        self
    }

    pub fn fetch_err(mut self, strategy: &str, class: FailureClass, detail: &str) -> Self {
        self.fetch_failures
            .insert(strategy.to_string(), BackendError::new(class, detail));
        self
    }

    /// Fetches with `strategy` write a partial file and then never finish
    pub fn fetch_stall(mut self, strategy: &str) -> Self {
        self.stalled_fetches.insert(strategy.to_string());
        self
    }

    /// Calls made so far, in order
    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    async fn record(&self, call: Call) {
        self.calls.lock().await.push(call);
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ExtractionBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn probe(
        &self,
        url: &str,
        strategy: &StrategyProfile,
    ) -> Result<VariantSet, BackendError> {
        self.record(Call {
            kind: CallKind::Probe,
            strategy: strategy.name.clone(),
            url: url.to_string(),
            selector: None,
        })
        .await;
        self.pause().await;

        match self.probes.get(&strategy.name) {
            Some(Ok(variants)) => Ok(VariantSet {
                url: url.to_string(),
                title: self
                    .title
                    .clone()
                    .unwrap_or_else(|| format!("Title of {url}")),
                variants: variants.clone(),
            }),
            Some(Err(e)) => Err(e.clone()),
            None => Err(BackendError::new(
                FailureClass::Transient,
                format!("no scripted probe for strategy '{}'", strategy.name),
            )),
        }
    }

    async fn fetch(
        &self,
        request: &FetchRequest,
        strategy: &StrategyProfile,
    ) -> Result<(), BackendError> {
        self.record(Call {
            kind: CallKind::Fetch,
            strategy: strategy.name.clone(),
            url: request.url.clone(),
            selector: Some(request.format_selector.clone()),
        })
        .await;
        self.pause().await;

        if self.stalled_fetches.contains(&strategy.name) {
            let _ = tokio::fs::write(partial_path(&request.destination), b"partial").await;
            return std::future::pending().await;
        }

        if let Some(error) = self.fetch_failures.get(&strategy.name) {
            let _ = tokio::fs::write(partial_path(&request.destination), b"partial").await;
            return Err(error.clone());
        }

        let body = format!("{}\n{}\n", request.url, request.format_selector);
        tokio::fs::write(&request.destination, body)
            .await
            .map_err(|e| BackendError::new(FailureClass::Transient, e.to_string()))
    }
}

fn partial_path(destination: &std::path::Path) -> PathBuf {
    let mut name = OsString::from(destination.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}
