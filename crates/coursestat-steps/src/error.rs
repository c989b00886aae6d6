//! Statistics collaborator errors.

use thiserror::Error;

/// Errors raised by the statistics repository and calculators.
#[derive(Debug, Error)]
pub enum StatsError {
    #[error("statistics database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("no responses recorded for course {0}")]
    NoResponses(i64),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
