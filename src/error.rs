//! Error types for the Ouroboros feedback-loop system
//!
//! This module provides comprehensive error handling using thiserror for
//! structured error definitions and anyhow for error propagation.
//!
//! The taxonomy distinguishes how each failure affects a batch run:
//! - [`OuroborosError::Connectivity`] aborts the run (store or snapshot
//!   directory unreachable, I/O timeout)
//! - [`OuroborosError::Validation`] skips the single offending item
//! - [`OuroborosError::Conflict`] is a no-op (the item was already resolved)
//! - [`OuroborosError::Configuration`] is fatal at startup

use thiserror::Error;

/// Main error type for Ouroboros operations
#[derive(Error, Debug)]
pub enum OuroborosError {
    /// Store or snapshot source unreachable; aborts the whole run
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Malformed record (e.g. missing repo identifier); the item is skipped
    #[error("Validation error: {0}")]
    Validation(String),

    /// Attempt to link an already-resolved prediction; treated as a no-op
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Missing or invalid configuration; fatal at startup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// External trainer invocation failed
    #[error("Trainer error: {0}")]
    Trainer(String),

    /// Prediction not found
    #[error("Prediction not found: {0}")]
    PredictionNotFound(String),

    /// Invalid prediction ID format
    #[error("Invalid prediction ID: {0}")]
    InvalidId(#[from] uuid::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl OuroborosError {
    /// Whether this error must abort the current batch run.
    ///
    /// Per-item errors (validation, conflict) aggregate into the run
    /// summary instead; everything else propagates to the caller.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            OuroborosError::Validation(_) | OuroborosError::Conflict(_)
        )
    }
}

/// Result type alias for Ouroboros operations
pub type Result<T> = std::result::Result<T, OuroborosError>;

/// Convert anyhow::Error to OuroborosError
impl From<anyhow::Error> for OuroborosError {
    fn from(err: anyhow::Error) -> Self {
        OuroborosError::Other(err.to_string())
    }
}

/// Database driver errors surface through the Database variant
impl From<libsql::Error> for OuroborosError {
    fn from(err: libsql::Error) -> Self {
        OuroborosError::Database(err.to_string())
    }
}
