use std::net::SocketAddr;

use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::{
    services::{health, health_details, serve_file},
    state::AppState,
};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/files/{identifier}", get(serve_file))
        .route("/health", get(health))
        .route("/health/details", get(health_details))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve the retrieval surface until `cancel` fires
pub async fn run(
    address: SocketAddr,
    state: AppState,
    cancel: CancellationToken,
) -> Result<(), AnyError> {
    let listener = TcpListener::bind(address).await?;
    info!(%address, "Retrieval API listening");

    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    info!("Retrieval API stopped");
    Ok(())
}
