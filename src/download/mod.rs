//! Fetch of a selected variant into the staging area

use serde::Serialize;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::extraction::{
    AttemptRecord, BackendError, ExtractionStrategyChain, FailureClass, FetchRequest,
};
use crate::session::{ConversationId, Session};
use crate::staging::{StageError, StagedFile, StagingArea, StagingError};

/// Strategies tried per download: the one that probed successfully, then its successor
pub const MAX_FETCH_ATTEMPTS: usize = 2;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("selection no longer matches the current choices")]
    StaleSelection,

    #[error("download failed after {} attempt(s): {cause}", .attempts.len())]
    Failed {
        cause: BackendError,
        attempts: Vec<AttemptRecord>,
    },

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error("download cancelled")]
    Cancelled,
}

/// A staged file and the link that retrieves it
#[derive(Debug, Clone, Serialize)]
pub struct Delivery {
    pub link: String,
    pub file: StagedFile,
    pub title: String,
    pub height: Option<u32>,
}

enum TransferError {
    Cancelled,
    Exhausted {
        cause: BackendError,
        attempts: Vec<AttemptRecord>,
    },
}

pub struct DownloadOrchestrator {
    chain: Arc<ExtractionStrategyChain>,
    staging: Arc<StagingArea>,
    public_base_url: String,
}

impl DownloadOrchestrator {
    pub fn new(
        chain: Arc<ExtractionStrategyChain>,
        staging: Arc<StagingArea>,
        public_base_url: &str,
    ) -> Self {
        Self {
            chain,
            staging,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Link under which the retrieval surface serves `identifier`
    pub fn link_for(&self, identifier: &str) -> String {
        format!("{}/files/{identifier}", self.public_base_url)
    }

    /// Fetch `session.shortlist[index]` with best companion audio and stage it.
    ///
    /// Starts with the strategy that produced the session and falls back to
    /// the next one in the chain at most once.
    pub async fn download(
        &self,
        owner: ConversationId,
        session: &Session,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<Delivery, DownloadError> {
        let variant = session
            .shortlist
            .get(index)
            .ok_or(DownloadError::StaleSelection)?;

        let plan: Vec<usize> = (session.strategy_index..self.chain.len())
            .take(MAX_FETCH_ATTEMPTS)
            .collect();
        let format_selector = format!("{}+bestaudio/best", variant.id);
        let identifier = StagingArea::new_identifier();

        info!(
            conversation = %owner,
            url = %session.url,
            format = %variant.id,
            height = ?variant.height,
            %identifier,
            "Starting download"
        );

        let plan = plan.as_slice();
        let id = identifier.as_str();
        let staged = self
            .staging
            .stage(owner, id, |destination| async move {
                let request = FetchRequest {
                    url: session.url.clone(),
                    format_selector,
                    destination,
                };
                self.transfer(&request, plan, id, cancel).await
            })
            .await;

        match staged {
            Ok(file) => {
                info!(conversation = %owner, identifier = %file.identifier, size = file.size, "Download complete");
                Ok(Delivery {
                    link: self.link_for(&file.identifier),
                    file,
                    title: session.title.clone(),
                    height: variant.height,
                })
            }
            Err(StageError::Fetch(TransferError::Cancelled)) => Err(DownloadError::Cancelled),
            Err(StageError::Fetch(TransferError::Exhausted { cause, .. }))
                if cause.class == FailureClass::StorageFailure =>
            {
                warn!(conversation = %owner, error = %cause.detail, "Staging storage failed during fetch");
                Err(DownloadError::Staging(StagingError::Unavailable(io::Error::other(
                    cause.detail,
                ))))
            }
            Err(StageError::Fetch(TransferError::Exhausted { cause, attempts })) => {
                Err(DownloadError::Failed { cause, attempts })
            }
            Err(StageError::Staging(e)) => Err(DownloadError::Staging(e)),
        }
    }

    async fn transfer(
        &self,
        request: &FetchRequest,
        plan: &[usize],
        identifier: &str,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let mut attempts = Vec::new();
        let mut last_error = BackendError::new(FailureClass::Degenerate, "no strategy available");

        for &index in plan {
            let Some(strategy) = self.chain.strategy(index) else {
                break;
            };
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                outcome = self.chain.backend().fetch(request, strategy) => outcome,
            };

            let error = match outcome {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            warn!(
                url = %request.url,
                strategy = %strategy.name,
                attempt = attempts.len() + 1,
                class = %error.class,
                error = %error.detail,
                "Fetch attempt failed"
            );
            self.staging.discard_incoming(identifier).await;

            attempts.push(AttemptRecord {
                index,
                strategy: strategy.name.clone(),
                class: error.class,
                detail: error.detail.clone(),
            });
            let recoverable = error.class.is_recoverable();
            last_error = error;
            if !recoverable {
                break;
            }
        }

        Err(TransferError::Exhausted {
            cause: last_error,
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyProfile;
    use crate::extraction::Variant;
    use crate::extraction::testing::{CallKind, ScriptedBackend};
    use crate::formats::{ShortlistPolicy, reduce};
    use tempfile::TempDir;

    const OWNER: ConversationId = ConversationId { chat: 7, user: 7 };

    struct Fixture {
        _dir: TempDir,
        backend: Arc<ScriptedBackend>,
        staging: Arc<StagingArea>,
        orchestrator: DownloadOrchestrator,
    }

    async fn fixture(backend: ScriptedBackend, names: &[&str]) -> Fixture {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(backend);
        let chain = Arc::new(ExtractionStrategyChain::new(
            backend.clone(),
            names.iter().map(|n| StrategyProfile::named(*n)).collect(),
        ));
        let staging = Arc::new(StagingArea::open(dir.path(), "mp4").await.unwrap());
        let orchestrator =
            DownloadOrchestrator::new(chain, staging.clone(), "https://files.example/");
        Fixture {
            _dir: dir,
            backend,
            staging,
            orchestrator,
        }
    }

    fn session(strategy_index: usize) -> Session {
        let raw = [
            Variant::new("137", Some(1080), "mp4"),
            Variant::new("22", Some(720), "mp4"),
        ];
        let shortlist = reduce(
            &raw,
            &ShortlistPolicy {
                max_choices: 5,
                max_height: None,
            },
        );
        Session::new("https://video.example/1", "Clip", shortlist, strategy_index)
    }

    async fn fetched_strategies(backend: &ScriptedBackend) -> Vec<String> {
        backend
            .calls()
            .await
            .into_iter()
            .filter(|c| c.kind == CallKind::Fetch)
            .map(|c| c.strategy)
            .collect()
    }

    #[tokio::test]
    async fn test_download_reuses_probe_strategy() {
        let fx = fixture(ScriptedBackend::new(), &["s1", "s2", "s3"]).await;

        let delivery = fx
            .orchestrator
            .download(OWNER, &session(1), 0, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(fetched_strategies(&fx.backend).await, ["s2"]);
        assert_eq!(delivery.height, Some(1080));
        assert_eq!(
            delivery.link,
            format!("https://files.example/files/{}", delivery.file.identifier)
        );

        let body = std::fs::read_to_string(&delivery.file.path).unwrap();
        assert_eq!(body, "https://video.example/1\n137+bestaudio/best\n");
        assert!(fx.staging.resolve(&delivery.file.identifier).await.is_ok());
    }

    #[tokio::test]
    async fn test_retries_once_on_next_strategy() {
        let backend = ScriptedBackend::new().fetch_err("s1", FailureClass::Transient, "reset");
        let fx = fixture(backend, &["s1", "s2", "s3"]).await;

        let delivery = fx
            .orchestrator
            .download(OWNER, &session(0), 1, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(fetched_strategies(&fx.backend).await, ["s1", "s2"]);
        assert_eq!(delivery.height, Some(720));
        let incoming = std::fs::read_dir(fx.staging.root().join(".incoming")).unwrap().count();
        assert_eq!(incoming, 0);
    }

    #[tokio::test]
    async fn test_retry_is_bounded() {
        let backend = ScriptedBackend::new()
            .fetch_err("s1", FailureClass::AccessRestricted, "HTTP Error 403")
            .fetch_err("s2", FailureClass::Transient, "timed out");
        let fx = fixture(backend, &["s1", "s2", "s3"]).await;

        let err = fx
            .orchestrator
            .download(OWNER, &session(0), 0, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            DownloadError::Failed { cause, attempts } => {
                assert_eq!(cause.class, FailureClass::Transient);
                assert_eq!(attempts.len(), 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(fetched_strategies(&fx.backend).await, ["s1", "s2"]);
        assert!(fx.staging.is_empty().await);
    }

    #[tokio::test]
    async fn test_fatal_fetch_failure_is_not_retried() {
        let backend = ScriptedBackend::new().fetch_err("s1", FailureClass::BackendMissing, "gone");
        let fx = fixture(backend, &["s1", "s2"]).await;

        let err = fx
            .orchestrator
            .download(OWNER, &session(0), 0, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Failed { ref attempts, .. } if attempts.len() == 1));
        assert_eq!(fetched_strategies(&fx.backend).await, ["s1"]);
    }

    #[tokio::test]
    async fn test_disk_full_is_a_staging_failure() {
        let backend = ScriptedBackend::new().fetch_err(
            "s1",
            FailureClass::StorageFailure,
            "[Errno 28] No space left on device",
        );
        let fx = fixture(backend, &["s1", "s2"]).await;

        let err = fx
            .orchestrator
            .download(OWNER, &session(0), 0, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Staging(StagingError::Unavailable(_))));
        assert_eq!(fetched_strategies(&fx.backend).await, ["s1"]);
        let incoming = std::fs::read_dir(fx.staging.root().join(".incoming")).unwrap().count();
        assert_eq!(incoming, 0);
    }

    #[tokio::test]
    async fn test_last_strategy_has_no_successor() {
        let backend = ScriptedBackend::new().fetch_err("s2", FailureClass::Transient, "reset");
        let fx = fixture(backend, &["s1", "s2"]).await;

        let err = fx
            .orchestrator
            .download(OWNER, &session(1), 0, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Failed { ref attempts, .. } if attempts.len() == 1));
    }

    #[tokio::test]
    async fn test_index_outside_shortlist_is_stale() {
        let fx = fixture(ScriptedBackend::new(), &["s1"]).await;

        let err = fx
            .orchestrator
            .download(OWNER, &session(0), 3, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::StaleSelection));
        assert!(fx.backend.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_download() {
        let fx = fixture(ScriptedBackend::new(), &["s1"]).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = fx
            .orchestrator
            .download(OWNER, &session(0), 0, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Cancelled));
        assert!(fx.staging.is_empty().await);
    }
}
