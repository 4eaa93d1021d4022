//! Error types for kinsync-core

use thiserror::Error;

/// Result type alias using kinsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in kinsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Talking to the merge server failed
    #[error(transparent)]
    Remote(#[from] crate::sync::RemoteError),
}
