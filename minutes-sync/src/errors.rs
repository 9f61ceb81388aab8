//! Error types for sync operations

use thiserror::Error;

use minutes_remote::RemoteError;
use minutes_vault::VaultError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote API error (status {status}): {message}")]
    RemoteApi {
        status: u16,
        retryable: bool,
        message: String,
    },

    #[error("Validation error for {id:?}: {reason}")]
    Validation { id: Option<String>, reason: String },

    #[error("File system error: {0}")]
    FileSystem(#[from] VaultError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Sync state corrupted: {0}")]
    StateCorrupted(String),

    #[error("No transaction is open")]
    NoTransaction,

    #[error("Transaction {0} is already open")]
    TransactionOpen(String),

    #[error("A sync run is already in progress")]
    Busy,

    #[error("Sync was cancelled")]
    Cancelled,

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl SyncError {
    /// Whether the owning component may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network(_) => true,
            SyncError::RemoteApi { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

impl From<RemoteError> for SyncError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Network(msg) => SyncError::Network(msg),
            RemoteError::Api { status, message } => SyncError::RemoteApi {
                status,
                retryable: status == 429 || status >= 500,
                message,
            },
            RemoteError::Validation { id, reason } => SyncError::Validation { id, reason },
            RemoteError::Io(e) => SyncError::Io(e),
            RemoteError::Serialization(e) => SyncError::Serialization(e),
            RemoteError::UnsupportedVersion(v) => SyncError::Validation {
                id: None,
                reason: format!("unsupported export version {v}"),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
