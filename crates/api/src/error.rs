//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The entity refused the request.
    #[error("{0}")]
    BadRequest(String),

    /// Domain or runtime failure.
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Domain(err) => domain_error_status(err),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, %status, "request failed");
        }

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

fn domain_error_status(err: &DomainError) -> StatusCode {
    match err {
        DomainError::AskTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        DomainError::NoReply { .. }
        | DomainError::PersistTimeout { .. }
        | DomainError::EntityUnavailable { .. }
        | DomainError::EventStore(_) => StatusCode::SERVICE_UNAVAILABLE,
        DomainError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
