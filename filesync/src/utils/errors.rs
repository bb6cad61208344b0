//! Error types for the sync engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported protocol: {0} (expected SFTP, FTP, FTPS-IMPLICIT or FTPS-EXPLICIT)")]
    UnsupportedProtocol(String),

    #[error("Host key mismatch for {host}: presented key {fingerprint} differs from the trusted one, possible man-in-the-middle attack")]
    HostKeyMismatch { host: String, fingerprint: String },

    #[error("Host {0} is not trusted, operation cancelled")]
    HostRejected(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Transfer error ({path}): {message}")]
    Transfer { path: String, message: String },

    #[error("Traversal error: {0}")]
    Traversal(#[from] walkdir::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Prompt error: {0}")]
    Prompt(String),
}

impl SyncError {
    pub fn transfer(path: impl Into<String>, message: impl ToString) -> Self {
        SyncError::Transfer {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
