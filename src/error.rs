//! Error types for toolrelay

use thiserror::Error;

/// Result type alias for toolrelay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in toolrelay.
///
/// Only `Configuration` is fatal. Tool and argument failures are recovered
/// inside a round, and backend failures end a turn with an `error` event at
/// worst. Hitting the round limit is not an error at all.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    #[error("Backend invocation error: {0}")]
    BackendInvocation(String),

    #[error("Argument parse error: {0}")]
    ArgumentParse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}
