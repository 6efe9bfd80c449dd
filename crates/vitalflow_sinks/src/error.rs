//! Error types for payload stores and output sinks.

use std::path::PathBuf;
use thiserror::Error;

/// Object store result type.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Sink result type.
pub type SinkResult<T> = std::result::Result<T, SinkError>;

/// Errors returned by an [`ObjectStore`](crate::ObjectStore).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Invalid storage locator '{0}'")]
    InvalidLocator(String),

    /// Empty key, absolute path or parent traversal
    #[error("Invalid object key '{0}'")]
    InvalidKey(String),

    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Store unreachable or refused the operation
    #[error("Object store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn not_found(bucket: &str, key: &str) -> Self {
        Self::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors returned by artifact output and quarantine.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Metadata write failed and the payload copy was removed again
    #[error("Quarantine of {locator} rolled back: {source}")]
    QuarantineRolledBack {
        locator: String,
        #[source]
        source: StoreError,
    },

    #[error("{0}")]
    Message(String),
}

impl SinkError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}
