//! Daemon settings.
//!
//! Layered loading: built-in defaults -> config file -> `COURSESTAT_*`
//! environment variables. CLI flags are applied on top by the daemon binary.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::QueueDescriptor;

/// Errors raised while loading or validating settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Underlying config source failed to load or deserialize.
    #[error("configuration error: {0}")]
    Load(#[from] config::ConfigError),

    /// A settings value failed validation.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Composite scan interval (days/hours/minutes/seconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ScanInterval {
    #[serde(default)]
    pub days: u64,
    #[serde(default)]
    pub hours: u64,
    #[serde(default)]
    pub minutes: u64,
    #[serde(default)]
    pub seconds: u64,
}

impl ScanInterval {
    pub fn from_secs(seconds: u64) -> Self {
        Self {
            seconds,
            ..Self::default()
        }
    }

    /// Collapse the composite fields into one duration.
    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(
            self.days * 86_400 + self.hours * 3_600 + self.minutes * 60 + self.seconds,
        )
    }

    pub fn is_zero(&self) -> bool {
        self.as_duration().is_zero()
    }
}

/// Tunables for the provider's timeout watchdog.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WatchdogSettings {
    /// How many automatic re-submissions are attempted before giving up.
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,

    /// Each re-armed watchdog runs for the previous duration divided by this.
    #[serde(default = "default_backoff_divisor")]
    pub backoff_divisor: u32,
}

fn default_retry_budget() -> u32 {
    3
}

fn default_backoff_divisor() -> u32 {
    2
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            retry_budget: default_retry_budget(),
            backoff_divisor: default_backoff_divisor(),
        }
    }
}

/// Main daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level filter (e.g. "info", "coursestat=debug").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Postgres connection string for the job store.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Job type identifier used for persisted rows and sweep queries.
    #[serde(default = "default_job_type")]
    pub job_type: String,

    /// Upper bound applied to any job's declared timeout.
    #[serde(default = "default_max_job_timeout_ms")]
    pub max_job_timeout_ms: u64,

    /// Number of concurrent job runner loops.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_calculations: usize,

    /// Interval between result-staleness (periodical refresh) sweeps.
    #[serde(default = "default_refresh_scan")]
    pub refresh_scan: ScanInterval,

    /// Interval between recalculation (rerun-requested) sweeps.
    #[serde(default = "default_recalculation_scan")]
    pub recalculation_scan: ScanInterval,

    /// Watchdog retry tunables.
    #[serde(default)]
    pub watchdog: WatchdogSettings,

    /// Backing for the incoming request queue.
    #[serde(default = "default_incoming_queue")]
    pub incoming_queue: QueueDescriptor,

    /// Backing for the work queue.
    #[serde(default = "default_work_queue")]
    pub work_queue: QueueDescriptor,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_database_url() -> String {
    "postgres://localhost/coursestat".to_string()
}

fn default_job_type() -> String {
    "course_statistics".to_string()
}

fn default_max_job_timeout_ms() -> u64 {
    3_600_000
}

fn default_max_concurrent() -> usize {
    2
}

fn default_refresh_scan() -> ScanInterval {
    ScanInterval {
        days: 1,
        ..ScanInterval::default()
    }
}

fn default_recalculation_scan() -> ScanInterval {
    ScanInterval {
        hours: 1,
        ..ScanInterval::default()
    }
}

fn data_dir() -> PathBuf {
    ProjectDirs::from("", "", "coursestat")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("/var/lib/coursestat"))
}

fn default_incoming_queue() -> QueueDescriptor {
    QueueDescriptor::File {
        location: data_dir().join("incoming.queue").display().to_string(),
    }
}

fn default_work_queue() -> QueueDescriptor {
    QueueDescriptor::File {
        location: data_dir().join("work.queue").display().to_string(),
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            database_url: default_database_url(),
            job_type: default_job_type(),
            max_job_timeout_ms: default_max_job_timeout_ms(),
            max_concurrent_calculations: default_max_concurrent(),
            refresh_scan: default_refresh_scan(),
            recalculation_scan: default_recalculation_scan(),
            watchdog: WatchdogSettings::default(),
            incoming_queue: default_incoming_queue(),
            work_queue: default_work_queue(),
        }
    }
}

impl Settings {
    /// Default config file path (`~/.config/coursestat/config.toml`).
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "coursestat")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load settings from defaults, an optional TOML file, and environment.
    ///
    /// When `config_path` is `None` the default path is used if it exists.
    /// Environment variables use the `COURSESTAT_` prefix with `__` as the
    /// nesting separator, e.g. `COURSESTAT_WATCHDOG__RETRY_BUDGET=5`.
    pub fn load(config_path: Option<&str>) -> Result<Self, SettingsError> {
        let mut builder = Config::builder();

        match config_path {
            Some(path) => {
                builder = builder.add_source(File::with_name(path));
            }
            None => {
                if let Some(path) = Self::default_config_path() {
                    builder =
                        builder.add_source(File::from(path).required(false));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("COURSESTAT").separator("__"),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject configurations the daemon cannot run with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.max_concurrent_calculations == 0 {
            return Err(SettingsError::Invalid(
                "max_concurrent_calculations must be >= 1".to_string(),
            ));
        }
        if self.max_job_timeout_ms == 0 {
            return Err(SettingsError::Invalid(
                "max_job_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.refresh_scan.is_zero() {
            return Err(SettingsError::Invalid(
                "refresh_scan interval must be > 0".to_string(),
            ));
        }
        if self.recalculation_scan.is_zero() {
            return Err(SettingsError::Invalid(
                "recalculation_scan interval must be > 0".to_string(),
            ));
        }
        if self.watchdog.retry_budget == 0 {
            return Err(SettingsError::Invalid(
                "watchdog.retry_budget must be >= 1".to_string(),
            ));
        }
        if self.watchdog.backoff_divisor == 0 {
            return Err(SettingsError::Invalid(
                "watchdog.backoff_divisor must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}
