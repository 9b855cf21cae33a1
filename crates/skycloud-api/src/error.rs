//! HTTP error response conversion
//!
//! Handlers return `Result<_, HttpAppError>`; anything convertible into [`AppError`]
//! renders as a JSON body with the status taken from [`ErrorMetadata`].

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use skycloud_core::{AppError, ErrorMetadata, LogLevel};
use skycloud_processing::HeaderError;
use skycloud_storage::StorageError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Offending request header for validation failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<&'static str>,
    pub code: String,
}

/// Wrapper so `IntoResponse` can be implemented for the core error type.
#[derive(Debug)]
pub struct HttpAppError(pub AppError);

impl From<AppError> for HttpAppError {
    fn from(err: AppError) -> Self {
        HttpAppError(err)
    }
}

impl From<anyhow::Error> for HttpAppError {
    fn from(err: anyhow::Error) -> Self {
        HttpAppError(AppError::from(err))
    }
}

impl From<StorageError> for HttpAppError {
    fn from(err: StorageError) -> Self {
        HttpAppError(AppError::from(err))
    }
}

impl From<HeaderError> for HttpAppError {
    fn from(err: HeaderError) -> Self {
        HttpAppError(AppError::from(err))
    }
}

fn log_error(error: &AppError) {
    match error.log_level() {
        LogLevel::Debug => tracing::debug!(error = %error, code = error.error_code(), "Request failed"),
        LogLevel::Warn => tracing::warn!(error = %error, code = error.error_code(), "Request failed"),
        LogLevel::Error => tracing::error!(error = %error, code = error.error_code(), "Request failed"),
    }
}

impl IntoResponse for HttpAppError {
    fn into_response(self) -> Response {
        let error = &self.0;
        let status =
            StatusCode::from_u16(error.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        log_error(error);

        let body = ErrorResponse {
            error: error.client_message(),
            header: error.header(),
            code: error.error_code().to_string(),
        };

        (status, Json(body)).into_response()
    }
}
