//! CLI argument parsing for the course-statistics daemon.

use clap::{Parser, Subcommand};

/// Course Statistics Daemon
///
/// Background orchestrator for educational-statistics batch jobs.
#[derive(Parser, Debug)]
#[command(name = "coursestat-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/coursestat/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Daemon commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the daemon
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(short, long)]
        foreground: bool,

        /// Override database URL
        #[arg(long)]
        database_url: Option<String>,

        /// Override the number of concurrent calculations
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Stop the running daemon
    Stop,

    /// Show daemon status
    Status,

    /// Submit a calculation request to the incoming queue
    Submit {
        /// Course to calculate statistics for
        id_course: i64,

        /// Recalculate even when statistics are current
        #[arg(short, long)]
        force: bool,

        /// Regenerate this job on the refresh schedule
        #[arg(short, long)]
        periodical: bool,
    },
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
