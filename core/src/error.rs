//! Error types for the request adapter.
//!
//! # Design
//! Engine failures arrive as [`EngineError`]. A refused connection becomes
//! `ConnectionFailed` with the engine error kept as its source; every other
//! engine failure is passed through untouched in `Engine`. Timeouts are not
//! engine errors at all: they come back as a flag on the completion and only
//! fail the call in synchronous mode.

use crate::engine::{EngineError, EngineErrorKind};

/// Errors returned by [`RequestAdapter`](crate::RequestAdapter) calls.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The engine could not connect to the target (or proxy).
    #[error("connection failed: {source}")]
    ConnectionFailed {
        #[source]
        source: EngineError,
    },

    /// The engine reported a timeout while the caller was waiting on it.
    #[error("request timed out")]
    Timeout,

    /// Any other engine failure, unchanged.
    #[error(transparent)]
    Engine(EngineError),

    /// A stream body could not be read.
    #[error("failed to read request body: {0}")]
    Body(#[from] std::io::Error),

    /// An option on the environment cannot be handed to the engine.
    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// An options document could not be deserialized.
    #[error("invalid options document: {0}")]
    Config(#[from] serde_json::Error),

    /// The manager finished running without firing this request's callback.
    #[error("parallel manager finished without completing the request")]
    Unfinished,
}

impl From<EngineError> for AdapterError {
    fn from(err: EngineError) -> Self {
        match err.kind() {
            EngineErrorKind::ConnectionRefused => AdapterError::ConnectionFailed { source: err },
            EngineErrorKind::Other => AdapterError::Engine(err),
        }
    }
}

/// A specialized Result type for adapter operations.
pub type Result<T> = std::result::Result<T, AdapterError>;
