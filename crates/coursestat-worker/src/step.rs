//! Step contract.

use async_trait::async_trait;
use thiserror::Error;

use coursestat_types::{InputSlot, StepDescriptor, StepOutcome};

use crate::WorkerError;

/// Errors a step implementation may surface instead of an explicit
/// [`StepOutcome::Failure`]. The worker catches these and converts them
/// into execution failures.
#[derive(Debug, Error)]
pub enum StepError {
    /// Required input was missing or unusable (e.g. no prior result).
    #[error("step precondition failed: {0}")]
    Precondition(String),

    /// An external collaborator (database, scoring service, subprocess)
    /// failed.
    #[error("collaborator failure: {0}")]
    Collaborator(String),

    /// The step's typed configuration could not be interpreted.
    #[error("invalid step configuration: {0}")]
    Config(String),
}

/// One unit of pipeline work with a bounded time budget and a three-way
/// outcome.
///
/// Implementations may fail fast by returning `Err` — the worker converts
/// that into an execution failure — or report any of the three outcomes
/// explicitly. An empty `prior` slice means "no usable input yet" and must
/// be treated as a precondition failure, not a crash.
#[async_trait]
pub trait Step: Send + Sync {
    /// The descriptor this step was built from.
    fn descriptor(&self) -> &StepDescriptor;

    /// Execute against the prior results, most recent first.
    async fn run(&self, prior: &[InputSlot]) -> Result<StepOutcome, StepError>;
}

/// Builds step instances from descriptors.
///
/// Implemented by the step registry; constructed explicitly at startup
/// composition rather than through self-registration.
pub trait StepFactory: Send + Sync {
    fn build(&self, descriptor: &StepDescriptor) -> Result<Box<dyn Step>, WorkerError>;
}
