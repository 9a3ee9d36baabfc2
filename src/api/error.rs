use axum::{Json, http::StatusCode, response::IntoResponse};
use thiserror::Error;

use super::models::ErrorResponse;
use crate::staging::StagingError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("file is gone: {0}")]
    Gone(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Gone(_) => StatusCode::GONE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Gone(_) => "GONE",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

/// Never echoes filesystem details back to clients
impl From<StagingError> for ApiError {
    fn from(value: StagingError) -> Self {
        match value {
            StagingError::Gone => {
                ApiError::Gone("expired, removed or never existed".to_string())
            }
            StagingError::Unavailable(e) => {
                tracing::error!(error = %e, "Staging area unavailable");
                ApiError::Internal("staging area unavailable".to_string())
            }
        }
    }
}
