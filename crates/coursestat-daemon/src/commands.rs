//! Command implementations for the course-statistics daemon.
//!
//! Handles:
//! - start: Load config, connect collaborators, run the orchestrator
//! - stop: Signal running daemon to stop (via PID file)
//! - status: Check if daemon is running
//! - submit: Enqueue a calculation request

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use coursestat_queue::open_queue;
use coursestat_types::{JobRequest, Settings};

use crate::daemon::{Daemon, INCOMING_QUEUE};

/// Get the PID file path
fn pid_file_path() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| {
            #[cfg(unix)]
            {
                dirs.runtime_dir()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| dirs.cache_dir().to_path_buf())
            }
            #[cfg(not(unix))]
            {
                dirs.cache_dir().to_path_buf()
            }
        })
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("coursestat")
        .join("daemon.pid")
}

/// Write PID to file
fn write_pid_file() -> Result<()> {
    let pid_path = pid_file_path();
    if let Some(parent) = pid_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&pid_path, std::process::id().to_string())?;
    info!("Wrote PID file: {:?}", pid_path);
    Ok(())
}

/// Remove PID file
fn remove_pid_file() {
    let pid_path = pid_file_path();
    if pid_path.exists() {
        if let Err(e) = fs::remove_file(&pid_path) {
            warn!("Failed to remove PID file: {}", e);
        } else {
            info!("Removed PID file");
        }
    }
}

/// Read PID from file
fn read_pid_file() -> Option<u32> {
    let pid_path = pid_file_path();
    fs::read_to_string(&pid_path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

/// Check if a process is running
#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    // On Unix, sending signal 0 checks if process exists
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    true
}

fn load_settings(
    config_path: Option<&str>,
    database_url: Option<&str>,
    concurrency: Option<usize>,
    log_level: Option<&str>,
) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(url) = database_url {
        settings.database_url = url.to_string();
    }
    if let Some(concurrency) = concurrency {
        settings.max_concurrent_calculations = concurrency;
    }
    if let Some(level) = log_level {
        settings.log_level = level.to_string();
    }
    settings.validate()?;
    Ok(settings)
}

fn init_tracing(settings: &Settings) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Start the daemon.
///
/// 1. Load configuration (defaults -> file -> env -> CLI)
/// 2. Connect the job store and statistics repository
/// 3. Run the orchestrator
/// 4. Drain on SIGINT/SIGTERM; a second signal forces the exit
pub async fn start_daemon(
    config_path: Option<&str>,
    foreground: bool,
    database_url: Option<&str>,
    concurrency: Option<usize>,
    log_level: Option<&str>,
) -> Result<()> {
    let settings = load_settings(config_path, database_url, concurrency, log_level)?;
    init_tracing(&settings)?;

    info!("Course statistics daemon starting...");
    info!("Configuration:");
    info!("  Database URL: {}", settings.database_url);
    info!("  Job type: {}", settings.job_type);
    info!("  Concurrency: {}", settings.max_concurrent_calculations);
    info!("  Log level: {}", settings.log_level);

    if !foreground {
        warn!("Background mode not yet implemented, running in foreground");
        warn!("Use a process manager (systemd, launchd) for background operation");
    }

    let daemon = Daemon::connect(settings)
        .await
        .context("Failed to connect daemon collaborators")?
        .with_abrupt_handler(remove_pid_file);

    write_pid_file()?;

    let shutdown = CancellationToken::new();
    let force = CancellationToken::new();
    tokio::spawn(signal_handler(shutdown.clone(), force.clone()));

    let result = daemon.run(shutdown, force).await;

    remove_pid_file();
    result.map_err(|e| anyhow::anyhow!("Daemon error: {}", e))
}

/// First SIGINT/SIGTERM drains, the second forces.
async fn signal_handler(shutdown: CancellationToken, force: CancellationToken) {
    wait_for_signal().await;
    info!("Shutdown signal received, draining...");
    shutdown.cancel();

    wait_for_signal().await;
    warn!("Second signal received, forcing shutdown");
    force.cancel();
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Stop the running daemon by sending SIGTERM.
pub fn stop_daemon() -> Result<()> {
    let pid = read_pid_file().context("No PID file found - daemon may not be running")?;

    if !is_process_running(pid) {
        remove_pid_file();
        anyhow::bail!("Daemon not running (stale PID file removed)");
    }

    info!("Stopping daemon (PID {})", pid);

    #[cfg(unix)]
    {
        unsafe {
            if libc::kill(pid as i32, libc::SIGTERM) != 0 {
                anyhow::bail!("Failed to send SIGTERM to daemon");
            }
        }
        println!("Sent SIGTERM to daemon (PID {})", pid);
    }

    #[cfg(not(unix))]
    {
        anyhow::bail!("Stop command not yet implemented on this platform");
    }

    Ok(())
}

/// Show daemon status.
pub fn show_status() -> Result<()> {
    let pid_path = pid_file_path();

    match read_pid_file() {
        Some(pid) if is_process_running(pid) => {
            println!("Course statistics daemon is running (PID {})", pid);
            println!("PID file: {:?}", pid_path);
            Ok(())
        }
        Some(pid) => {
            println!(
                "Course statistics daemon is NOT running (stale PID {} in {:?})",
                pid, pid_path
            );
            Ok(())
        }
        None => {
            println!("Course statistics daemon is NOT running (no PID file)");
            Ok(())
        }
    }
}

/// Enqueue a calculation request on the incoming queue.
pub async fn submit_request(
    config_path: Option<&str>,
    id_course: i64,
    force: bool,
    periodical: bool,
) -> Result<()> {
    let settings = Settings::load(config_path).context("Failed to load configuration")?;
    let queue = open_queue::<JobRequest>(&settings.incoming_queue, INCOMING_QUEUE)
        .await
        .context("Failed to open incoming queue")?;

    let request = JobRequest::new(json!({
        "id_course": id_course,
        "force_calculation": force,
        "periodical": periodical,
    }))
    .with_kind("course_statistics");
    queue.enqueue(request).await.context("Failed to enqueue request")?;

    println!("Submitted calculation request for course {}", id_course);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_file_path() {
        let path = pid_file_path();
        assert!(path.ends_with("daemon.pid"));
        assert!(path.to_string_lossy().contains("coursestat"));
    }

    #[test]
    fn test_current_process_is_running() {
        assert!(is_process_running(std::process::id()));
    }
}
