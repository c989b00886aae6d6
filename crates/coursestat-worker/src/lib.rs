//! Pipeline execution engine.
//!
//! A [`PipelineWorker`] runs an ordered list of [`Step`]s, threading a
//! time-decaying window of prior results ([`coursestat_types::InputSlot`]s)
//! into each invocation. Steps report one of three outcomes; failures and
//! cancellations halt the pipeline, successes advance it.

mod step;
mod worker;

pub use step::{Step, StepError, StepFactory};
pub use worker::{PipelineWorker, StepProgress, WorkerError, DEFAULT_RESULT_TTL};
