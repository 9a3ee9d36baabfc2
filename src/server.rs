use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use reelbox::api::{self, state::AppState};
use reelbox::bot::{Dispatcher, TelegramTransport};
use reelbox::config::Config;
use reelbox::extraction::{ExtractionStrategyChain, YtDlpBackend};
use reelbox::formats::{ShortlistPolicy, reduce};
use reelbox::observability::Metrics;
use reelbox::pipeline::{Pipeline, PipelineSettings};
use reelbox::staging::{StagingArea, SweepPolicy, run_sweeper};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub async fn run(config_path: Option<PathBuf>) -> Result<(), AnyError> {
    info!("Loading configuration");
    let config =
        Config::load_with(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    let token = config.bot_token()?.to_string();

    let metrics = Arc::new(Metrics::new());
    let staging = Arc::new(
        StagingArea::open(
            config.staging.dir.clone(),
            config.extraction.merge_output_format.clone(),
        )
        .await
        .map_err(|e| format!("Failed to open staging area: {e}"))?,
    );

    let chain = build_chain(&config).await;
    let pipeline = Arc::new(Pipeline::new(
        chain,
        staging.clone(),
        metrics.clone(),
        PipelineSettings::from(&config),
    ));
    let transport = Arc::new(TelegramTransport::new(&config.transport, &token)?);

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let tracker = TaskTracker::new();
    tracker.spawn(run_sweeper(
        staging.clone(),
        SweepPolicy::from(&config.staging),
        metrics.clone(),
        cancel.clone(),
    ));
    tracker.spawn(Dispatcher::new(transport, pipeline).run(cancel.clone()));
    tracker.close();

    let served = api::run(
        config.retrieval.bind_addr,
        AppState::new(staging, metrics),
        cancel.clone(),
    )
    .await;
    if let Err(e) = &served {
        error!(error = %e, "Retrieval API failed, shutting down");
    }

    cancel.cancel();
    tracker.wait().await;
    info!("Shutdown complete");

    served
}

/// One-off resolution for checking strategy configuration
pub async fn probe(config_path: Option<PathBuf>, url: String) -> Result<(), AnyError> {
    let config =
        Config::load_with(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    let chain = build_chain(&config).await;

    let resolution = chain.resolve(&url, &CancellationToken::new()).await?;
    let shortlist = reduce(
        &resolution.variants.variants,
        &ShortlistPolicy::from(&config.formats),
    );
    let strategy = chain
        .strategy(resolution.strategy_index)
        .map(|s| s.name.as_str());

    let report = json!({
        "url": resolution.variants.url,
        "title": resolution.variants.title,
        "strategy": strategy,
        "failed_attempts": resolution.attempts,
        "shortlist": shortlist,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

async fn build_chain(config: &Config) -> Arc<ExtractionStrategyChain> {
    let max_filesize = config.staging.max_file_bytes.map(|b| b.as_u64());
    let backend = YtDlpBackend::from_config(&config.extraction, max_filesize);

    match backend.version().await {
        Ok(version) => info!(%version, "yt-dlp available"),
        Err(e) => warn!(
            binary = %config.extraction.binary.display(),
            error = %e,
            "yt-dlp preflight failed"
        ),
    }

    Arc::new(ExtractionStrategyChain::new(
        Arc::new(backend),
        config.extraction.strategies.clone(),
    ))
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
    cancel.cancel();
}
