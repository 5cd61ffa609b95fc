//! Cloud client error types

use thiserror::Error;

/// Errors raised by the build service and blob storage clients
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Storage error ({status}): {message}")]
    StorageError { status: u16, message: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid build request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("SAS token expired at {0}")]
    TokenExpired(String),

    #[error("Upload not confirmed: {0}")]
    UploadNotConfirmed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Whether a retry of the same call could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            CloudError::Http(e) => {
                e.is_connect()
                    || e.is_timeout()
                    || e.status().is_some_and(|s| is_transient_status(s.as_u16()))
            }
            CloudError::ApiError { status, .. } | CloudError::StorageError { status, .. } => {
                is_transient_status(*status)
            }
            _ => false,
        }
    }

    /// Whether the request failed before it reached the server
    pub fn is_connect(&self) -> bool {
        matches!(self, CloudError::Http(e) if e.is_connect())
    }
}

fn is_transient_status(status: u16) -> bool {
    status == 408 || status == 429 || status >= 500
}

pub type Result<T> = std::result::Result<T, CloudError>;
