//! Job, step, and outcome types.
//!
//! A job is an ordered pipeline of steps. Each step reports exactly one of
//! three outcomes: success (with a payload), a clean chain cancellation, or
//! a failure. Step results stay visible to later steps for a bounded number
//! of transitions, tracked by TTL-tagged input slots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// TTL sentinel meaning "visible until the end of the pipeline".
pub const TTL_UNBOUNDED: i32 = -1;

/// How strictly a job waits for its sub-phases before reporting completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlockingMode {
    /// Wait for every sub-phase to settle before completing.
    #[default]
    Strict,
    /// Report completion as soon as the main pipeline finishes.
    Lenient,
}

/// Descriptor for one step of a job pipeline.
///
/// The descriptor identifies the step type (resolved through the step
/// registry at execution time) and carries the step's typed configuration,
/// time budget, and result visibility window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDescriptor {
    /// Step type identifier, resolved via the step registry.
    pub step_type: String,

    /// Step-specific configuration, interpreted by the step implementation.
    #[serde(default)]
    pub config: Value,

    /// Time budget for one invocation of this step.
    pub timeout_ms: u64,

    /// Whether a failure of this step should be treated as critical.
    #[serde(default)]
    pub is_critical: bool,

    /// How many subsequent steps may still see this step's result.
    ///
    /// `-1` means unbounded; any other present value must be `> 0`
    /// (enforced at execution time). Absent means the result is visible
    /// only to the immediately next step.
    #[serde(default)]
    pub result_ttl_steps: Option<i32>,
}

impl StepDescriptor {
    /// Create a descriptor with the given type and timeout, no config.
    pub fn new(step_type: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            step_type: step_type.into(),
            config: Value::Null,
            timeout_ms,
            is_critical: false,
            result_ttl_steps: None,
        }
    }

    /// Attach a step configuration.
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    /// Declare the result visibility window.
    pub fn with_result_ttl(mut self, ttl: i32) -> Self {
        self.result_ttl_steps = Some(ttl);
        self
    }

    /// Mark the step as critical.
    pub fn critical(mut self) -> Self {
        self.is_critical = true;
        self
    }
}

/// A fully expanded job: identity, time budget, and the ordered step list.
///
/// Created by the request parser (or reconstructed from a persisted
/// descriptor for periodic/rerun sweeps) and immutable once handed to a
/// worker, except for step-list assembly while it is being built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfiguration {
    /// Unique job id (ULID).
    pub job_id: String,

    /// Human-readable job name.
    pub name: String,

    /// Overall time budget before the provider's watchdog fires.
    pub job_timeout_ms: u64,

    /// Whether this job is regenerated and re-run on a fixed schedule.
    #[serde(default)]
    pub periodical: bool,

    /// How strictly to wait for sub-phases.
    #[serde(default)]
    pub blocking: BlockingMode,

    /// Ordered pipeline of steps.
    pub steps: Vec<StepDescriptor>,

    /// Configuration for the input extractor.
    #[serde(default)]
    pub input_config: Value,

    /// Configuration for the result persistor.
    #[serde(default)]
    pub persistence_config: Value,
}

impl JobConfiguration {
    /// Create a configuration with a fresh ULID job id and no steps.
    pub fn new(name: impl Into<String>, job_timeout_ms: u64) -> Self {
        Self {
            job_id: ulid::Ulid::new().to_string(),
            name: name.into(),
            job_timeout_ms,
            periodical: false,
            blocking: BlockingMode::default(),
            steps: Vec::new(),
            input_config: Value::Null,
            persistence_config: Value::Null,
        }
    }

    /// Append a step descriptor to the pipeline.
    pub fn with_step(mut self, step: StepDescriptor) -> Self {
        self.steps.push(step);
        self
    }
}

/// The three-way outcome contract of a step invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    /// Step produced a result payload.
    Success {
        payload: Value,
        /// Overrides the descriptor's `result_ttl_steps` when present.
        #[serde(default)]
        ttl: Option<i32>,
    },
    /// Step decided the rest of the pipeline is unnecessary. Not an error.
    CancelChain { reason: String },
    /// Step failed; halts the pipeline and surfaces as an execution failure.
    Failure {
        reason: String,
        #[serde(default)]
        can_retry: bool,
        #[serde(default)]
        retry_delay_ms: Option<u64>,
    },
}

/// A prior step's result payload tagged with its remaining visibility.
///
/// The worker keeps an ordered list of these, most recent first, and decays
/// `remaining` by one on every step transition. Slots with
/// [`TTL_UNBOUNDED`] never decay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSlot {
    pub payload: Value,
    pub remaining: i32,
}

impl InputSlot {
    /// Slot visible for exactly `remaining` more steps.
    pub fn new(payload: Value, remaining: i32) -> Self {
        Self { payload, remaining }
    }

    /// Slot visible through the end of the pipeline.
    pub fn unbounded(payload: Value) -> Self {
        Self {
            payload,
            remaining: TTL_UNBOUNDED,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.remaining == TTL_UNBOUNDED
    }
}

/// An incoming work request, before expansion into a [`JobConfiguration`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    /// Optional request kind tag for parser dispatch.
    #[serde(default)]
    pub kind: Option<String>,

    /// Request payload, e.g. `{ "id_course": 7, "force_calculation": false }`.
    pub payload: Value,
}

impl JobRequest {
    pub fn new(payload: Value) -> Self {
        Self {
            kind: None,
            payload,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }
}

/// Persisted job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    NotStarted,
    Running,
    Finished,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::NotStarted => "NOT_STARTED",
            JobState::Running => "RUNNING",
            JobState::Finished => "FINISHED",
            JobState::Failed => "FAILED",
        }
    }

    /// Parse the persisted representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NOT_STARTED" => Some(JobState::NotStarted),
            "RUNNING" => Some(JobState::Running),
            "FINISHED" => Some(JobState::Finished),
            "FAILED" => Some(JobState::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted job row the orchestration core depends on.
///
/// `descriptor` holds the serialized [`JobConfiguration`], sufficient to
/// fully reconstruct the job for periodic and rerun sweeps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRow {
    pub job_id: String,
    pub job_type: String,
    pub name: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub state: JobState,
    pub status_message: Option<String>,
    pub descriptor: Value,
    pub periodical: bool,
    pub rerun_requested: bool,
}

impl JobRow {
    /// Build a `RUNNING` row for a freshly provided job.
    pub fn running(
        config: &JobConfiguration,
        job_type: impl Into<String>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            job_id: config.job_id.clone(),
            job_type: job_type.into(),
            name: config.name.clone(),
            started_at: Some(Utc::now()),
            finished_at: None,
            state: JobState::Running,
            status_message: None,
            descriptor: serde_json::to_value(config)?,
            periodical: config.periodical,
            rerun_requested: false,
        })
    }

    /// Reconstruct the job configuration from the serialized descriptor.
    pub fn configuration(&self) -> Result<JobConfiguration, serde_json::Error> {
        serde_json::from_value(self.descriptor.clone())
    }
}

/// Terminal outcome of one job run, reported to completion listeners.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Pipeline ran all steps; `result` is the final payload if the last
    /// step succeeded and a result was persisted.
    Finished { result: Option<Value> },
    /// A step cancelled the chain; the job ran to completion without error.
    Cancelled { reason: String },
    /// Execution or persistence failed.
    Failed { message: String, can_retry: bool },
}

impl JobOutcome {
    /// Whether the job ran to completion without being marked failed.
    pub fn is_clean(&self) -> bool {
        !matches!(self, JobOutcome::Failed { .. })
    }
}

/// Completion notification sent from a runner to the daemon.
#[derive(Debug, Clone)]
pub struct JobCompletion {
    pub job_id: String,
    pub outcome: JobOutcome,
}
