//! Error types for the preload registry and its engines.

use thiserror::Error;

/// Errors returned synchronously by registry operations.
///
/// Open failures are not here: they happen on the worker thread and are only
/// visible as [`Status::Error`](super::session::Status::Error) plus one notification.
#[derive(Debug, Error)]
pub enum PreloadError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("no preload slot available for {0}")]
    NoCapacity(String),
    #[error("no preload session for {0}")]
    NotFound(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Failures reported by a [`MediaEngine`](super::engine::MediaEngine).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot open {locator}: {reason}")]
    Open { locator: String, reason: String },
    #[error("unsupported locator: {0}")]
    Unsupported(String),
    #[error("cancelled")]
    Cancelled,
    #[error("context creation failed: {0}")]
    Context(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
