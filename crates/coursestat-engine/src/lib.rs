//! Job lifecycle engine: provider and runner.
//!
//! The [`JobProvider`] claims work items, persists their lifecycle rows,
//! and guarantees forward progress through a timeout watchdog that
//! re-submits unacknowledged jobs. A [`JobRunner`] drives one job
//! end-to-end per concurrency slot: provide, format input, execute the
//! pipeline, persist the result, report completion.

mod error;
mod provider;
mod runner;

use async_trait::async_trait;
use serde_json::Value;

use coursestat_types::{JobConfiguration, JobRequest};

pub use error::EngineError;
pub use provider::{ExtendOutcome, FailureDisposition, JobProvider, ProviderConfig};
pub use runner::{JobRunner, RunnerContext, RunnerHandle};

/// Input-extraction collaborator: turns a job configuration into the
/// pipeline's initial payload.
#[async_trait]
pub trait InputFormatter: Send + Sync {
    async fn format_job_input(&self, config: &JobConfiguration) -> Result<Value, EngineError>;
}

/// Result-persistence collaborator. Returns `false` when the result could
/// not be persisted; internals (writes, format) are its own concern.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn persist_result(
        &self,
        result: &Value,
        config: &JobConfiguration,
    ) -> Result<bool, EngineError>;
}

/// Expands an incoming request into a full job configuration.
///
/// The parser assigns the job id, so callers can key completion listeners
/// before the configuration reaches the work queue.
#[async_trait]
pub trait RequestParser: Send + Sync {
    async fn parse(&self, request: &JobRequest) -> Result<JobConfiguration, EngineError>;
}
