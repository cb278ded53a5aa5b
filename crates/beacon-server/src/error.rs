//! HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use beacon_store::StoreError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// An error an HTTP handler can return. Renders as `{"error": "<message>"}`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request is malformed or fails validation.
    #[error("{0}")]
    BadRequest(String),

    /// The addressed record does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The record store failed.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Any other server-side failure.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Store(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
            crate::metrics::record_error("http");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_error_body() {
        let response = ApiError::not_found("Trigger not found").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!({"error": "Trigger not found"}));
    }

    #[test]
    fn test_store_errors_are_internal() {
        let err = ApiError::from(StoreError::InvalidRecord("bad".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
