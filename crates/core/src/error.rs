//! Unified error types for vitrine.
//!
//! Only the fetch-failure class ever reaches a display-layer caller; the
//! remaining variants are absorbed by the engine and degrade capability.

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

/// Unified error types for the image cache.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., empty URL list).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Invalid URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// Network retrieval failed.
    #[error("FETCH_FAILED: {0}")]
    Fetch(String),

    /// Fetch timeout.
    #[error("FETCH_TIMEOUT: {0}")]
    FetchTimeout(String),

    /// Fetch response too large.
    #[error("FETCH_TOO_LARGE: {0}")]
    FetchTooLarge(String),

    /// HTTP error response.
    #[error("HTTP_ERROR: {0}")]
    HttpError(String),

    /// Fetched bytes could not be decoded or re-encoded as an image.
    #[error("ENCODE_FAILED: {0}")]
    Encode(String),

    /// Blob or metadata write failed.
    #[error("PERSIST_FAILED: {0}")]
    Persist(String),

    /// Filesystem error in the blob tier.
    #[error("CACHE_ERROR: io: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted metadata record could not be decoded.
    #[error("DECODE_FAULT: {key}: {reason}")]
    Decode { key: String, reason: String },

    /// Cold-start precheck failed.
    #[error("INTEGRITY_FAULT: {0}")]
    IntegrityFault(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// Invalid content key format.
    #[error("CACHE_ERROR: invalid key format")]
    InvalidKey,
}

impl Error {
    /// Whether this error belongs to the class surfaced to callers of `fetch`.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            Error::Fetch(_)
                | Error::FetchTimeout(_)
                | Error::FetchTooLarge(_)
                | Error::HttpError(_)
                | Error::InvalidUrl(_)
                | Error::Encode(_)
        )
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let (code, message) = match &err {
            Error::InvalidInput(msg) => (-32602, msg.clone()),
            Error::InvalidUrl(msg) => (-32003, msg.clone()),
            Error::Fetch(msg) => (-32000, msg.clone()),
            Error::FetchTimeout(msg) => (-32006, msg.clone()),
            Error::FetchTooLarge(msg) => (-32007, msg.clone()),
            Error::HttpError(msg) => (-32008, msg.clone()),
            Error::Encode(msg) => (-32009, msg.clone()),
            Error::Persist(msg) => (-32002, msg.clone()),
            Error::Io(e) => (-32002, e.to_string()),
            Error::Decode { .. } => (-32002, err.to_string()),
            Error::IntegrityFault(msg) => (-32002, msg.clone()),
            Error::Database(e) => (-32002, e.to_string()),
            Error::MigrationFailed(msg) => (-32002, msg.clone()),
            Error::InvalidKey => (-32002, "Invalid key format".to_string()),
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}
