//! URL in, link out: extraction, shortlist, selection and download
//!
//! Backend work from every conversation shares one admission semaphore and
//! runs under an end-to-end timeout distinct from the backend's own.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::download::{Delivery, DownloadError, DownloadOrchestrator};
use crate::extraction::{ExtractionError, ExtractionStrategyChain};
use crate::formats::{self, RankedShortlist, ShortlistPolicy};
use crate::observability::Metrics;
use crate::session::{ConversationId, Session, SessionError, SessionStore};
use crate::staging::{PurgePolicy, PurgeStats, StagingArea};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Selection(#[from] SessionError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("job timed out after {0:?}")]
    TimedOut(Duration),

    #[error("shutting down")]
    ShuttingDown,
}

/// Choices offered for a submitted URL. An empty shortlist is a valid offer.
#[derive(Debug, Clone, Serialize)]
pub struct Offer {
    pub url: String,
    pub title: String,
    pub generation: u64,
    pub shortlist: RankedShortlist,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub shortlist: ShortlistPolicy,
    pub max_concurrent_jobs: usize,
    pub job_timeout: Duration,
    pub public_base_url: String,
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            shortlist: ShortlistPolicy::from(&config.formats),
            max_concurrent_jobs: config.limits.max_concurrent_jobs,
            job_timeout: config.limits.job_timeout(),
            public_base_url: config.retrieval.public_base_url.clone(),
        }
    }
}

pub struct Pipeline {
    chain: Arc<ExtractionStrategyChain>,
    shortlist: ShortlistPolicy,
    sessions: SessionStore,
    staging: Arc<StagingArea>,
    downloads: DownloadOrchestrator,
    permits: Arc<Semaphore>,
    job_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl Pipeline {
    pub fn new(
        chain: Arc<ExtractionStrategyChain>,
        staging: Arc<StagingArea>,
        metrics: Arc<Metrics>,
        settings: PipelineSettings,
    ) -> Self {
        let downloads =
            DownloadOrchestrator::new(chain.clone(), staging.clone(), &settings.public_base_url);
        Self {
            chain,
            shortlist: settings.shortlist,
            sessions: SessionStore::new(),
            staging,
            downloads,
            permits: Arc::new(Semaphore::new(settings.max_concurrent_jobs.max(1))),
            job_timeout: settings.job_timeout,
            metrics,
        }
    }

    pub fn staging(&self) -> &Arc<StagingArea> {
        &self.staging
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Resolve `url`, build its shortlist and make it the conversation's session.
    ///
    /// Files previously staged for this conversation are purged first.
    pub async fn submit(
        &self,
        conversation: ConversationId,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Offer, PipelineError> {
        self.clear(conversation).await;

        let _permit = self.admit(cancel).await?;

        let resolution = tokio::time::timeout(self.job_timeout, self.chain.resolve(url, cancel))
            .await
            .map_err(|_| PipelineError::TimedOut(self.job_timeout))
            .and_then(|r| r.map_err(PipelineError::from));

        let resolution = match resolution {
            Ok(resolution) => resolution,
            Err(e) => {
                self.metrics.extraction_failed();
                return Err(e);
            }
        };
        self.metrics.extraction_succeeded();

        let shortlist = formats::reduce(&resolution.variants.variants, &self.shortlist);
        let title = resolution.variants.title;
        let session = Session::new(
            url,
            title.clone(),
            shortlist.clone(),
            resolution.strategy_index,
        );
        let generation = self.sessions.put(conversation, session).await;

        info!(
            %conversation,
            url,
            strategy_index = resolution.strategy_index,
            choices = shortlist.len(),
            generation,
            "Offer ready"
        );

        Ok(Offer {
            url: url.to_string(),
            title,
            generation,
            shortlist,
        })
    }

    /// Download the variant at `index` of the shortlist rendered as `generation`.
    pub async fn select(
        &self,
        conversation: ConversationId,
        generation: u64,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<Delivery, PipelineError> {
        let selection = match self.sessions.select(conversation, generation, index).await {
            Ok(selection) => selection,
            Err(e) => {
                self.metrics.stale_selection();
                return Err(e.into());
            }
        };

        let _permit = self.admit(cancel).await?;

        let delivery = tokio::time::timeout(
            self.job_timeout,
            self.downloads
                .download(conversation, &selection.session, selection.index, cancel),
        )
        .await
        .map_err(|_| PipelineError::TimedOut(self.job_timeout))
        .and_then(|r| r.map_err(PipelineError::from));

        match &delivery {
            Ok(_) => self.metrics.download_completed(),
            Err(PipelineError::Download(DownloadError::StaleSelection)) => {
                self.metrics.stale_selection()
            }
            Err(_) => self.metrics.download_failed(),
        }
        delivery
    }

    /// Purge everything staged for `conversation`
    pub async fn clear(&self, conversation: ConversationId) -> PurgeStats {
        let stats = self.staging.purge(PurgePolicy::Owner(conversation)).await;
        self.metrics.files_purged(stats.files_removed);
        stats
    }

    async fn admit(&self, cancel: &CancellationToken) -> Result<OwnedSemaphorePermit, PipelineError> {
        if self.permits.available_permits() == 0 {
            debug!("Waiting for a free job slot");
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::ShuttingDown),
            permit = self.permits.clone().acquire_owned() => {
                permit.map_err(|_| PipelineError::ShuttingDown)
            }
        }
    }
}
