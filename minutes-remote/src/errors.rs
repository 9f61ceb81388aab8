//! Error types for remote sources

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid remote document {id:?}: {reason}")]
    Validation { id: Option<String>, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported export version: {0}")]
    UnsupportedVersion(u32),
}

impl RemoteError {
    /// Whether retrying the request could succeed.
    ///
    /// Rate limiting and server errors are transient; auth failures and
    /// other client errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Network(_) => true,
            RemoteError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;
