//! Store error type.

use thiserror::Error;

/// Errors raised by job-store operations.
///
/// Callers at the orchestration boundary convert these into boolean
/// outcomes so a persistence failure never crashes the daemon loop.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No row with the given job id.
    #[error("job not found: {0}")]
    NotFound(String),

    /// Underlying database failure; the enclosing transaction was rolled
    /// back.
    #[error("job store database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Descriptor (de)serialization failed.
    #[error("job store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted state string did not match the status enum.
    #[error("invalid persisted job state: {0}")]
    InvalidState(String),
}
