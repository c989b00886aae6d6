//! Course-statistics daemon library.
//!
//! Exposes the CLI surface, the command implementations, and the
//! orchestrator so integration tests can assemble a daemon against
//! in-memory collaborators.

mod cli;
mod commands;
mod daemon;
mod listeners;

pub use cli::{Cli, Commands};
pub use commands::{show_status, start_daemon, stop_daemon, submit_request};
pub use daemon::{Daemon, DaemonError, INCOMING_QUEUE, WORK_QUEUE};
pub use listeners::CompletionListeners;
