//! Job provider: lifecycle rows and the timeout watchdog.
//!
//! The provider owns a private map of active jobs. Invariant: at most one
//! live watchdog per job id; an entry is removed exactly when the job
//! finishes, permanently fails, or exhausts its reset budget. The
//! database stays the source of truth: status rows are updated before the
//! in-memory entry is cleared, so a persistence failure leaves the
//! watchdog armed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use coursestat_queue::JobQueue;
use coursestat_store::JobStore;
use coursestat_types::{JobConfiguration, JobRow, Settings};

use crate::EngineError;

/// Provider tunables.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Job type recorded on persisted rows.
    pub job_type: String,
    /// Upper bound applied to any job's declared timeout.
    pub max_job_timeout_ms: u64,
    /// Automatic re-submissions before the watchdog gives up.
    pub retry_budget: u32,
    /// Each re-armed watchdog runs for the previous duration divided by
    /// this.
    pub backoff_divisor: u32,
}

impl ProviderConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            job_type: settings.job_type.clone(),
            max_job_timeout_ms: settings.max_job_timeout_ms,
            retry_budget: settings.watchdog.retry_budget,
            backoff_divisor: settings.watchdog.backoff_divisor,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            job_type: "course_statistics".to_string(),
            max_job_timeout_ms: 3_600_000,
            retry_budget: 3,
            backoff_divisor: 2,
        }
    }
}

/// Outcome of a watchdog extension request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendOutcome {
    /// Watchdog re-armed with the new duration.
    Extended,
    /// The requested duration was unusable (zero or above the cap).
    Failed,
    /// No live watchdog for this id (already finished or failed).
    Inactive,
}

/// How a failed job should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Record the failure and drop the job.
    Permanent,
    /// Record the failure and re-submit the original work item, after an
    /// optional delay.
    Retry { delay_ms: Option<u64> },
}

struct ActiveJob {
    work_item: JobConfiguration,
    watchdog: JoinHandle<()>,
    attempts_left: u32,
    timeout_ms: u64,
}

/// Produces job configurations from the work queue and tracks their
/// lifecycle until completion or timeout.
pub struct JobProvider {
    queue: Arc<dyn JobQueue<JobConfiguration>>,
    store: Arc<dyn JobStore>,
    config: ProviderConfig,
    active: Mutex<HashMap<String, ActiveJob>>,
}

impl JobProvider {
    pub fn new(
        queue: Arc<dyn JobQueue<JobConfiguration>>,
        store: Arc<dyn JobStore>,
        config: ProviderConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            store,
            config,
            active: Mutex::new(HashMap::new()),
        })
    }

    /// Claim the next work item: dequeue, persist a `RUNNING` row, arm the
    /// watchdog, and hand the configuration to the caller.
    pub async fn provide_job(self: &Arc<Self>) -> Result<JobConfiguration, EngineError> {
        let config = self.queue.dequeue().await?;
        if config.steps.is_empty() {
            return Err(EngineError::InvalidConfig(format!(
                "job {} has no steps",
                config.job_id
            )));
        }

        let timeout_ms = config
            .job_timeout_ms
            .min(self.config.max_job_timeout_ms)
            .max(1);
        let persisted = match JobRow::running(&config, &self.config.job_type) {
            Ok(row) => self.store.insert_running(row).await.map_err(EngineError::from),
            Err(e) => Err(EngineError::from(e)),
        };
        if let Err(e) = persisted {
            // The item was already claimed off the queue; hand it back so
            // a transient store failure does not lose the job.
            let job_id = config.job_id.clone();
            if let Err(requeue) = self.queue.enqueue(config).await {
                warn!(
                    job = %job_id,
                    error = %requeue,
                    "failed to return unclaimed work item to the queue"
                );
            }
            return Err(e);
        }

        let watchdog = self.arm_watchdog(config.job_id.clone(), timeout_ms);
        let entry = ActiveJob {
            work_item: config.clone(),
            watchdog,
            attempts_left: self.config.retry_budget,
            timeout_ms,
        };
        if let Some(old) = self
            .active
            .lock()
            .unwrap()
            .insert(config.job_id.clone(), entry)
        {
            // A reset re-provided the same id; only one watchdog may live.
            old.watchdog.abort();
        }

        info!(job = %config.job_id, name = %config.name, timeout_ms, "job provided");
        Ok(config)
    }

    /// Re-arm the watchdog for a still-running job.
    pub fn extend_job(self: &Arc<Self>, job_id: &str, extend_for_ms: u64) -> ExtendOutcome {
        if extend_for_ms == 0 || extend_for_ms > self.config.max_job_timeout_ms {
            return ExtendOutcome::Failed;
        }
        let mut active = self.active.lock().unwrap();
        match active.get_mut(job_id) {
            None => ExtendOutcome::Inactive,
            Some(entry) => {
                entry.watchdog.abort();
                entry.timeout_ms = extend_for_ms;
                entry.watchdog = self.arm_watchdog(job_id.to_string(), extend_for_ms);
                debug!(job = %job_id, extend_for_ms, "watchdog extended");
                ExtendOutcome::Extended
            }
        }
    }

    /// Persist a `FINISHED` status and clear the watchdog.
    ///
    /// Reports `false` on persistence failure without propagating; the
    /// watchdog stays armed in that case so the job is not lost.
    pub async fn finish_job(&self, job_id: &str, message: &str) -> bool {
        match self.store.mark_finished(job_id, message).await {
            Ok(()) => {
                self.clear_active(job_id);
                true
            }
            Err(e) => {
                warn!(job = %job_id, error = %e, "failed to persist finished status");
                false
            }
        }
    }

    /// Persist a `FAILED` status and clear the watchdog. With
    /// [`FailureDisposition::Retry`], the original work item is
    /// re-submitted after the optional delay.
    pub async fn fail_job(
        self: &Arc<Self>,
        job_id: &str,
        disposition: FailureDisposition,
        message: &str,
    ) -> bool {
        if let Err(e) = self.store.mark_failed(job_id, message).await {
            warn!(job = %job_id, error = %e, "failed to persist failed status");
            return false;
        }
        let entry = {
            let mut active = self.active.lock().unwrap();
            active.remove(job_id)
        };
        let Some(entry) = entry else {
            return true;
        };
        entry.watchdog.abort();

        if let FailureDisposition::Retry { delay_ms } = disposition {
            let queue = self.queue.clone();
            let work_item = entry.work_item;
            let job_id = job_id.to_string();
            tokio::spawn(async move {
                if let Some(delay) = delay_ms {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                info!(job = %job_id, "re-submitting failed job for retry");
                if let Err(e) = queue.enqueue(work_item).await {
                    warn!(job = %job_id, error = %e, "retry re-submission failed");
                }
            });
        }
        true
    }

    /// Number of jobs with a live watchdog.
    pub fn active_jobs(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    fn clear_active(&self, job_id: &str) {
        if let Some(entry) = self.active.lock().unwrap().remove(job_id) {
            entry.watchdog.abort();
        }
    }

    fn arm_watchdog(self: &Arc<Self>, job_id: String, timeout_ms: u64) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            if let Some(provider) = weak.upgrade() {
                provider.watchdog_fired(job_id).await;
            }
        })
    }

    /// Neither `finish_job` nor `fail_job` arrived in time: re-submit the
    /// original work item, or mark the job failed once the budget is
    /// spent.
    async fn watchdog_fired(self: Arc<Self>, job_id: String) {
        let entry = {
            let mut active = self.active.lock().unwrap();
            active.remove(&job_id)
        };
        // Completed concurrently with the timer firing.
        let Some(mut entry) = entry else { return };

        if entry.attempts_left == 0 {
            warn!(job = %job_id, "watchdog reset budget exhausted, marking job failed");
            if let Err(e) = self
                .store
                .mark_failed(&job_id, "job timed out; watchdog reset budget exhausted")
                .await
            {
                warn!(job = %job_id, error = %e, "failed to persist watchdog failure");
            }
            return;
        }

        info!(
            job = %job_id,
            attempts_left = entry.attempts_left,
            "job timed out, re-submitting work item"
        );
        if let Err(e) = self.queue.enqueue(entry.work_item.clone()).await {
            warn!(job = %job_id, error = %e, "watchdog re-submission failed");
        }

        // Re-arm shorter so a lost re-submission is noticed sooner.
        let next_timeout = (entry.timeout_ms / u64::from(self.config.backoff_divisor)).max(1);
        entry.attempts_left -= 1;
        entry.timeout_ms = next_timeout;
        entry.watchdog = self.arm_watchdog(job_id.clone(), next_timeout);
        self.active.lock().unwrap().insert(job_id, entry);
    }
}
