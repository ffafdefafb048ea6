//! Error types for the token authorizer

use std::io;

use thiserror::Error;

/// Result type alias for the token authorizer
pub type Result<T> = std::result::Result<T, Error>;

/// Token authorizer errors
///
/// None of these ever reach a gateway caller: the authorizer collapses every
/// store error into a `Deny` verdict. They surface only at startup and in logs.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Token store could not be reached or rejected the request
    #[error("Token store unavailable: {0}")]
    StoreUnavailable(String),

    /// Token store call exceeded its time budget
    #[error("Token store timeout after {0:?}")]
    StoreTimeout(std::time::Duration),

    /// Stored record is missing required attributes
    #[error("Corrupt token record: {0}")]
    CorruptRecord(String),

    /// AWS credentials could not be obtained or refreshed
    #[error("Credentials error: {0}")]
    Credentials(String),

    /// `lastUsed` update failed after a successful lookup
    #[error("Token update failed: {0}")]
    UpdateFailed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error is a transient store condition (timeout, network,
    /// throttling) rather than bad data.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_)
                | Self::StoreTimeout(_)
                | Self::Credentials(_)
                | Self::Http(_)
                | Self::Io(_)
        )
    }
}
