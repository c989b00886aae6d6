//! Engine error type.

use thiserror::Error;

use coursestat_queue::QueueError;
use coursestat_store::StoreError;
use coursestat_worker::WorkerError;

/// Errors raised while providing or running jobs.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("input formatting failed: {0}")]
    InputFormat(String),

    #[error("result persistence failed: {0}")]
    Persistence(String),

    #[error("invalid job configuration: {0}")]
    InvalidConfig(String),

    #[error("request could not be parsed: {0}")]
    BadRequest(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Whether this error is the closed-queue loop-exit signal.
    pub fn is_queue_closed(&self) -> bool {
        matches!(self, EngineError::Queue(QueueError::Closed))
    }

    /// Retry hint carried by a step failure, if any.
    pub fn retry_hint(&self) -> (bool, Option<u64>) {
        match self {
            EngineError::Worker(WorkerError::StepFailed {
                can_retry,
                retry_delay_ms,
                ..
            }) => (*can_retry, *retry_delay_ms),
            _ => (false, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_closed_detection() {
        let err = EngineError::Queue(QueueError::Closed);
        assert!(err.is_queue_closed());
        assert!(!EngineError::InvalidConfig("x".to_string()).is_queue_closed());
    }

    #[test]
    fn test_retry_hint_from_step_failure() {
        let err = EngineError::Worker(WorkerError::StepFailed {
            index: 1,
            step_type: "irt_calculation".to_string(),
            reason: "scoring service unavailable".to_string(),
            can_retry: true,
            retry_delay_ms: Some(2_000),
        });
        assert_eq!(err.retry_hint(), (true, Some(2_000)));
        assert_eq!(
            EngineError::Persistence("x".to_string()).retry_hint(),
            (false, None)
        );
    }
}
