//! Error types shared across the store, the completion gateway and the HTTP API.

use std::time::Duration;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Errors raised by the conversation store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No session with this id exists.
    #[error("session not found: {0}")]
    NotFound(String),

    /// A session with this id already exists.
    #[error("session already exists: {0}")]
    AlreadyExists(String),

    /// The session has been closed and accepts no new messages.
    #[error("session is closed: {0}")]
    Closed(String),
}

/// Errors raised by a completion gateway.
///
/// Every variant is terminal for the call that produced it; gateways never
/// retry on their own.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The request could not be sent or the response body could not be read.
    #[error("failed to send request: {0}")]
    Transport(#[from] reqwest::Error),

    /// The upstream service answered with a non-success status.
    #[error("api error: status {status}, body: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },

    /// The response body was not a valid completion payload.
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The response contained no choices.
    #[error("no choices in response")]
    EmptyChoices,

    /// The caller-imposed deadline elapsed before a response arrived.
    #[error("completion timed out after {0:?}")]
    Timeout(Duration),

    /// The streaming consumer rejected a fragment.
    #[error("stream consumer aborted: {0}")]
    Aborted(anyhow::Error),
}

/// HTTP-facing error, rendered as `{"error": "..."}` with a matching status.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Malformed or incomplete client input.
    #[error("{0}")]
    BadRequest(String),

    /// The referenced entity does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The referenced session can no longer be joined.
    #[error("{0}")]
    Gone(String),

    /// The request did not complete within the configured deadline.
    #[error("Request timed out")]
    Timeout,

    /// Anything else.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Gone(_) => StatusCode::GONE,
            Self::Timeout => StatusCode::REQUEST_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => Self::NotFound(err.to_string()),
            StoreError::AlreadyExists(_) => Self::BadRequest(err.to_string()),
            StoreError::Closed(_) => Self::Gone(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(name: "api.error", status = %status, error = %self, "Request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
