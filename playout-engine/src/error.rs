//! Error types for playout-engine
//!
//! The first four variants are the playout failure taxonomy; the rest are
//! ambient failures (database, HTTP, config, plumbing).

use playout_common::events::ErrorKind;
use thiserror::Error;

/// Main error type for the playout engine
#[derive(Error, Debug)]
pub enum Error {
    /// Stream missing or unreachable. Recovered by skipping to the next track.
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// Runtime refused playback until a user gesture. Never auto-skipped.
    #[error("Playback blocked: {0}")]
    PlaybackBlocked(String),

    /// Queue index out of range. Rejected locally, no remote call made.
    #[error("Queue operation out of range: index {index} (queue length {len})")]
    QueueOperationOutOfRange { index: usize, len: usize },

    /// Emergency playlist keeps failing. Needs an operator.
    #[error("Fallback exhausted: {0}")]
    FallbackExhausted(String),

    /// Configuration file loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Outbound HTTP errors (availability probes)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Common library errors
    #[error(transparent)]
    Common(#[from] playout_common::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Engine task is gone (shutdown or panic)
    #[error("Playout engine unavailable: {0}")]
    ChannelClosed(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Telemetry classification, for the variants that have one
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::ResourceUnavailable(_) => Some(ErrorKind::ResourceUnavailable),
            Error::PlaybackBlocked(_) => Some(ErrorKind::PlaybackBlocked),
            Error::QueueOperationOutOfRange { .. } => Some(ErrorKind::QueueOperationOutOfRange),
            Error::FallbackExhausted(_) => Some(ErrorKind::FallbackExhausted),
            _ => None,
        }
    }
}

/// Convenience Result type using playout-engine Error
pub type Result<T> = std::result::Result<T, Error>;
