//! Error types for minidb

use thiserror::Error;

use crate::dispatch::OperationKind;
use crate::duration::DurationError;
use crate::engine::EngineError;

/// Result type for minidb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the store and duration APIs
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The engine failed to open or upgrade the database
    #[error("connection error: {0}")]
    Connection(EngineError),

    /// Dispatch against a collection that was never created or was torn down
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    /// The engine rejected a specific call or its transaction
    #[error("{kind} failed: {source}")]
    Operation {
        kind: OperationKind,
        source: EngineError,
    },

    /// Malformed duration input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn operation(kind: OperationKind, source: EngineError) -> Self {
        Error::Operation { kind, source }
    }

    /// Engine error carried by this error, if any.
    pub fn engine_error(&self) -> Option<&EngineError> {
        match self {
            Error::Connection(e) => Some(e),
            Error::Operation { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<DurationError> for Error {
    fn from(err: DurationError) -> Self {
        Error::InvalidInput(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}
