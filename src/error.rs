use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::models::BackendKind;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("File has no id yet, can't calculate its correct path")]
    IdentityNotAssigned,

    #[error("File path is not set")]
    PathNotSet,

    #[error("No storage backend holds a copy of file {0}")]
    NoAvailableStorage(String),

    #[error("Size of the file is unknown, can't verify the copy at {0}")]
    SizeUnknown(String),

    #[error("Local storage was selected as the source for its own copy of file {0}")]
    CircularSelection(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Remote object is gone: {0}")]
    RemoteGone(String),

    #[error(
        "Copy of file {file_id} in {backend} at {location} did not verify (expected size {expected:?}, actual {actual:?})"
    )]
    ReconciliationFailed {
        file_id: String,
        backend: BackendKind,
        location: String,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    #[error("Backend transport error: {0}")]
    Transport(String),

    #[error("Remote rejected the request: {0}")]
    RemoteRejected(String),

    #[error("Unknown storage backend kind: {0}")]
    UnknownBackendKind(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Invalid url: {0}")]
    InvalidUrl(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    /// Whether a retry of the same operation may succeed.
    ///
    /// Only transport-level failures qualify. A remote that answered 404/410
    /// or a local file that does not exist will answer the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Transport(_) => true,
            AppError::Request(e) => !(e.is_builder() || e.is_decode() || e.is_redirect()),
            _ => false,
        }
    }

    /// Gone and not-found collapse into one "absent" answer for callers that
    /// only care whether a claim still holds.
    pub fn is_absent(&self) -> bool {
        matches!(self, AppError::NotFound(_) | AppError::RemoteGone(_))
    }
}

/// Error body returned by `IntoResponse`
#[derive(Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(msg) => {
                tracing::debug!("Not found: {}", msg);
                StatusCode::NOT_FOUND
            }
            AppError::NoAvailableStorage(_) => StatusCode::NOT_FOUND,
            AppError::RemoteGone(msg) => {
                tracing::warn!("Remote object gone: {}", msg);
                StatusCode::GONE
            }
            AppError::IdentityNotAssigned
            | AppError::PathNotSet
            | AppError::InvalidUrl(_)
            | AppError::InvalidKey(_)
            | AppError::UnknownBackendKind(_) => StatusCode::BAD_REQUEST,
            AppError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            AppError::Transport(_) | AppError::RemoteRejected(_) | AppError::Request(_) => {
                tracing::error!("Remote backend error: {}", self);
                StatusCode::BAD_GATEWAY
            }
            AppError::ReconciliationFailed { .. }
            | AppError::SizeUnknown(_)
            | AppError::CircularSelection(_) => {
                tracing::error!("Reconciliation error: {}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {:?}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Config(_) | AppError::Json(_) => {
                tracing::error!("Internal error: {}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(ErrorResponse {
            code: status.as_u16(),
            message: self.to_string(),
        });
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
