//! Error handling

use axum::{
    extract::rejection::JsonRejection,
    response::{IntoResponse, Response},
    http::StatusCode,
    Json,
};
use flowsense_core::{FormatError, PipelineError, ShapeError};
use flowsense_core::logic::stats::StatsError;
use serde_json::json;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Input errors
    #[error("{0}")]
    Shape(#[from] ShapeError),

    #[error("{0}")]
    MeterFormat(#[from] FormatError),

    #[error("{0}")]
    ValidationError(String),

    // Backend errors
    #[error("stats unavailable: {0}")]
    StatsUnavailable(String),

    #[error("{0}")]
    InternalError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, error_message) = match &self {
            AppError::Shape(_) => (StatusCode::BAD_REQUEST, message.as_str()),
            AppError::MeterFormat(_) => (StatusCode::UNPROCESSABLE_ENTITY, message.as_str()),
            AppError::ValidationError(_) => (StatusCode::BAD_REQUEST, message.as_str()),
            AppError::StatsUnavailable(msg) => {
                tracing::error!("Stats read failed: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "Stats store unavailable")
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Shape(e) => AppError::Shape(e),
            other => AppError::InternalError(other.to_string()),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        let reason = rejection.body_text();
        tracing::warn!("Rejected request body: {}", reason);
        AppError::ValidationError(reason)
    }
}

impl From<StatsError> for AppError {
    fn from(err: StatsError) -> Self {
        AppError::StatsUnavailable(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::ValidationError(err.to_string())
    }
}
