//! Shared data model for the coursestat orchestration daemon.
//!
//! This crate defines the types every other coursestat crate speaks:
//! job configurations and their step descriptors, the three-way step
//! outcome contract, TTL-tagged pipeline input slots, queue descriptors,
//! persisted job rows, and the daemon settings.

mod config;
mod job;
mod queue;

pub use config::{ScanInterval, Settings, SettingsError, WatchdogSettings};
pub use job::{
    BlockingMode, InputSlot, JobCompletion, JobConfiguration, JobOutcome, JobRequest, JobRow,
    JobState, StepDescriptor, StepOutcome, TTL_UNBOUNDED,
};
pub use queue::QueueDescriptor;
