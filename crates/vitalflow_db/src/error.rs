//! Error types for the dedup store layer.

use thiserror::Error;

/// Dedup store result type.
pub type Result<T> = std::result::Result<T, DbError>;

/// Dedup store errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLx error (connection, query, etc.)
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// IO error (creating the database directory)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Illegal status transition
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Unparseable or unsupported store URL
    #[error("Invalid dedup store URL: {0}")]
    InvalidUrl(String),

    /// Backend exists but was compiled out
    #[error("Dedup backend {backend} not compiled in. Rebuild with the '{feature}' feature.")]
    NotCompiled { backend: String, feature: String },
}

impl DbError {
    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create an invalid URL error.
    pub fn invalid_url(msg: impl Into<String>) -> Self {
        Self::InvalidUrl(msg.into())
    }
}
