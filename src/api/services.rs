use std::collections::HashMap;
use std::path::Path as FsPath;

use axum::{
    Json,
    body::Body,
    extract::{Path, Request, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::debug;

use super::{error::ApiError, models::HealthDetails, state::AppState};

/// Stream a staged file (GET /files/{identifier})
///
/// Unknown, expired and purged identifiers all answer 410 Gone. Range and
/// conditional requests are handled by `ServeFile`.
pub async fn serve_file(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let staged = state.staging.resolve(&identifier).await?;
    debug!(%identifier, size = staged.size, "Serving staged file");

    let mut response = stream_staged(&staged.path, request).await?;

    if response.status().is_success() {
        let filename = staged
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(identifier.as_str());
        let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, disposition);
    }

    Ok(response)
}

/// The sweeper may purge a file between resolve and open; that is still 410.
async fn stream_staged(path: &FsPath, request: Request) -> Result<Response, ApiError> {
    let response = ServeFile::new(path)
        .oneshot(request)
        .await
        .unwrap_or_else(|never| match never {});

    if response.status() == StatusCode::NOT_FOUND {
        debug!(path = %path.display(), "Staged file vanished before streaming");
        return Err(ApiError::Gone("removed while being served".to_string()));
    }

    Ok(response.map(Body::new))
}

/// Liveness (GET /health)
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness with staging statistics (GET /health/details)
pub async fn health_details(State(state): State<AppState>) -> impl IntoResponse {
    let mut components = HashMap::new();
    components.insert("api".to_string(), "healthy".to_string());

    let staging_healthy = state.staging.is_healthy().await;
    components.insert(
        "staging".to_string(),
        if staging_healthy { "healthy" } else { "unhealthy" }.to_string(),
    );

    let status_code = if staging_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let details = HealthDetails {
        status: if staging_healthy { "healthy" } else { "unhealthy" }.to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
        staged_files: state.staging.len().await,
        staged_bytes: state.staging.total_bytes().await,
        metrics: state.metrics.snapshot(),
    };

    (status_code, Json(details))
}
