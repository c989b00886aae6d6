//! Course Statistics Daemon
//!
//! Background orchestrator for educational-statistics batch jobs.
//!
//! # Usage
//!
//! ```bash
//! coursestat-daemon start [--foreground] [--database-url URL] [--concurrency N]
//! coursestat-daemon stop
//! coursestat-daemon status
//! coursestat-daemon submit <ID_COURSE> [--force] [--periodical]
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/coursestat/config.toml)
//! 3. Environment variables (COURSESTAT_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use coursestat_daemon::{
    show_status, start_daemon, stop_daemon, submit_request, Cli, Commands,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            foreground,
            database_url,
            concurrency,
        } => {
            start_daemon(
                cli.config.as_deref(),
                foreground,
                database_url.as_deref(),
                concurrency,
                cli.log_level.as_deref(),
            )
            .await?;
        }
        Commands::Stop => {
            stop_daemon()?;
        }
        Commands::Status => {
            show_status()?;
        }
        Commands::Submit {
            id_course,
            force,
            periodical,
        } => {
            submit_request(cli.config.as_deref(), id_course, force, periodical).await?;
        }
    }

    Ok(())
}
