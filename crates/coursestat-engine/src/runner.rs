//! Job runner: one task per concurrency slot.
//!
//! Each runner loops on the provider, drives a claimed job through its
//! pipeline, persists the result, and reports the completion. Runners are
//! the only place job execution errors are translated into lifecycle
//! calls; the worker itself never touches the store or queue.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use coursestat_types::{JobCompletion, JobConfiguration, JobOutcome};
use coursestat_worker::{PipelineWorker, Step, StepFactory, StepProgress};

use crate::{
    EngineError, FailureDisposition, InputFormatter, JobProvider, ResultSink,
};

/// Shared collaborators every runner needs.
#[derive(Clone)]
pub struct RunnerContext {
    pub provider: Arc<JobProvider>,
    pub factory: Arc<dyn StepFactory>,
    pub formatter: Arc<dyn InputFormatter>,
    pub sink: Arc<dyn ResultSink>,
    pub completions: mpsc::UnboundedSender<JobCompletion>,
}

/// Handle to a spawned runner task.
pub struct RunnerHandle {
    id: usize,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl RunnerHandle {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Ask the runner to stop once its current job (if any) completes.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Stop and wait for the runner task to exit.
    pub async fn stop_and_wait(self) {
        self.shutdown.cancel();
        let _ = self.task.await;
    }

    /// Kill the runner task without waiting for its current job.
    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Drives jobs from the provider until the work queue closes or shutdown
/// is requested.
pub struct JobRunner {
    id: usize,
    context: RunnerContext,
}

impl JobRunner {
    /// Spawn runner task `id`. The returned handle stops the runner; the
    /// runner also exits on its own when the work queue closes.
    pub fn spawn(id: usize, context: RunnerContext) -> RunnerHandle {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let runner = JobRunner { id, context };
        let task = tokio::spawn(async move { runner.run(token).await });
        RunnerHandle { id, shutdown, task }
    }

    async fn run(self, shutdown: CancellationToken) {
        info!(runner = self.id, "runner started");
        loop {
            let config = tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(runner = self.id, "runner shutdown requested");
                    break;
                }
                result = self.context.provider.provide_job() => match result {
                    Ok(config) => config,
                    Err(e) if e.is_queue_closed() => {
                        debug!(runner = self.id, "work queue closed, runner exiting");
                        break;
                    }
                    Err(e) => {
                        warn!(runner = self.id, error = %e, "failed to provide job");
                        continue;
                    }
                },
            };

            // A claimed job always runs to completion, even mid-shutdown.
            let job_id = config.job_id.clone();
            let outcome = self.execute(config).await;
            let _ = self.context.completions.send(JobCompletion {
                job_id,
                outcome,
            });
        }
        info!(runner = self.id, "runner stopped");
    }

    /// Run one job and settle its lifecycle row. Never returns an error:
    /// every path ends in a [`JobOutcome`] for the completion listeners.
    async fn execute(&self, config: JobConfiguration) -> JobOutcome {
        let job_id = config.job_id.clone();
        info!(runner = self.id, job = %job_id, name = %config.name, "executing job");

        match self.execute_inner(&config).await {
            Ok(JobOutcome::Cancelled { reason }) => {
                // Clean completion, not a failure.
                let message = format!("cancelled: {reason}");
                if self.context.provider.finish_job(&job_id, &message).await {
                    JobOutcome::Cancelled { reason }
                } else {
                    JobOutcome::Failed {
                        message: "completion status could not be persisted".to_string(),
                        can_retry: false,
                    }
                }
            }
            Ok(outcome) => {
                if self.context.provider.finish_job(&job_id, "finished").await {
                    outcome
                } else {
                    JobOutcome::Failed {
                        message: "completion status could not be persisted".to_string(),
                        can_retry: false,
                    }
                }
            }
            Err(e) => {
                let (can_retry, retry_delay_ms) = e.retry_hint();
                let disposition = if can_retry {
                    FailureDisposition::Retry { delay_ms: retry_delay_ms }
                } else {
                    FailureDisposition::Permanent
                };
                let message = e.to_string();
                warn!(runner = self.id, job = %job_id, error = %message, "job failed");
                self.context
                    .provider
                    .fail_job(&job_id, disposition, &message)
                    .await;
                JobOutcome::Failed { message, can_retry }
            }
        }
    }

    async fn execute_inner(&self, config: &JobConfiguration) -> Result<JobOutcome, EngineError> {
        let input = self.context.formatter.format_job_input(config).await?;

        let steps: Vec<Box<dyn Step>> = config
            .steps
            .iter()
            .map(|descriptor| self.context.factory.build(descriptor))
            .collect::<Result<_, _>>()?;

        let mut worker = PipelineWorker::new(steps, input);
        let mut progress = worker.start_execution().await?;
        loop {
            match progress {
                StepProgress::Cancelled { reason } => {
                    return Ok(JobOutcome::Cancelled { reason });
                }
                StepProgress::Finished => break,
                StepProgress::Advanced => {
                    progress = worker.execute_next_step().await?;
                }
            }
        }

        let result = worker.execution_result().cloned();
        if let Some(ref payload) = result {
            let persisted = self.context.sink.persist_result(payload, config).await?;
            if !persisted {
                return Err(EngineError::Persistence(
                    "result sink declined to persist".to_string(),
                ));
            }
        }
        Ok(JobOutcome::Finished { result })
    }
}
