//! Queue error type.

use thiserror::Error;

/// Errors raised by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue was closed while the caller was parked (or before the
    /// call). Treated as a loop-exit signal by the daemon.
    #[error("queue closed")]
    Closed,

    /// Filesystem-backed storage failed.
    #[error("queue storage error: {0}")]
    Io(#[from] std::io::Error),

    /// Item (de)serialization failed.
    #[error("queue serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The external transactional backing failed.
    #[error("queue database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Could not find a free item filename after the bounded retry loop.
    #[error("item name collision in {dir} after {attempts} attempts")]
    NameCollision { dir: String, attempts: u32 },
}

impl QueueError {
    /// Whether this error is the closed-queue loop-exit signal.
    pub fn is_closed(&self) -> bool {
        matches!(self, QueueError::Closed)
    }
}
