//! The pipeline worker state machine.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use coursestat_types::{InputSlot, StepOutcome, TTL_UNBOUNDED};

use crate::Step;

/// Result visibility when a step declares no TTL: the result is visible
/// to exactly the immediately next step.
pub const DEFAULT_RESULT_TTL: i32 = 1;

/// Errors surfaced by pipeline execution.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("pipeline has no steps")]
    EmptyPipeline,

    #[error("execution already started")]
    AlreadyStarted,

    #[error("no next step to execute")]
    NoNextStep,

    /// TTL invariant violation: a declared TTL must be `-1` or `> 0`.
    #[error("invalid result TTL {ttl} at step {index}")]
    InvalidTtl { index: usize, ttl: i32 },

    #[error("step {index} ({step_type}) timed out after {timeout_ms} ms")]
    StepTimeout {
        index: usize,
        step_type: String,
        timeout_ms: u64,
    },

    #[error("step {index} ({step_type}) failed: {reason}")]
    StepFailed {
        index: usize,
        step_type: String,
        reason: String,
        can_retry: bool,
        retry_delay_ms: Option<u64>,
    },

    /// No factory registered for a descriptor's step type.
    #[error("unknown step type: {0}")]
    UnknownStepType(String),
}

impl WorkerError {
    /// Whether the failure asked for a retry.
    pub fn can_retry(&self) -> bool {
        matches!(self, WorkerError::StepFailed { can_retry: true, .. })
    }
}

/// Progress report from one step transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepProgress {
    /// The step succeeded and more steps remain.
    Advanced,
    /// The step succeeded and it was the last one.
    Finished,
    /// The step cancelled the chain; not an error.
    Cancelled { reason: String },
}

/// Executes a job's steps strictly in order.
///
/// State machine over the step index: each transition runs one step,
/// decays the TTL window, and either advances or halts. The worker never
/// retries internally — retry is the runner/provider's responsibility.
pub struct PipelineWorker {
    steps: Vec<Box<dyn Step>>,
    slots: Vec<InputSlot>,
    index: usize,
    halted: bool,
    completed: bool,
    last_payload: Option<Value>,
}

impl PipelineWorker {
    /// Create a worker over `steps` with the formatted job input as the
    /// only prior result. The input slot is unbounded so every step can
    /// reach the job input.
    pub fn new(steps: Vec<Box<dyn Step>>, initial_input: Value) -> Self {
        Self {
            steps,
            slots: vec![InputSlot::unbounded(initial_input)],
            index: 0,
            halted: false,
            completed: false,
            last_payload: None,
        }
    }

    /// Run the first step.
    pub async fn start_execution(&mut self) -> Result<StepProgress, WorkerError> {
        if self.index != 0 {
            return Err(WorkerError::AlreadyStarted);
        }
        if self.steps.is_empty() {
            return Err(WorkerError::EmptyPipeline);
        }
        self.execute_next_step().await
    }

    /// Whether another step remains and the pipeline has not halted.
    pub fn has_next_step(&self) -> bool {
        !self.halted && self.index < self.steps.len()
    }

    /// The final payload, exposed only when the last executed step
    /// succeeded and no steps remain.
    pub fn execution_result(&self) -> Option<&Value> {
        if self.completed {
            self.last_payload.as_ref()
        } else {
            None
        }
    }

    /// Current view of the TTL window, most recent result first.
    pub fn input_slots(&self) -> &[InputSlot] {
        &self.slots
    }

    /// Run the step at the current index and advance.
    pub async fn execute_next_step(&mut self) -> Result<StepProgress, WorkerError> {
        if self.halted || self.index >= self.steps.len() {
            return Err(WorkerError::NoNextStep);
        }
        let index = self.index;
        let descriptor = self.steps[index].descriptor().clone();
        let step_type = descriptor.step_type.clone();

        if let Some(ttl) = descriptor.result_ttl_steps {
            if ttl != TTL_UNBOUNDED && ttl <= 0 {
                self.halted = true;
                return Err(WorkerError::InvalidTtl { index, ttl });
            }
        }

        debug!(step = %step_type, index, "executing step");
        let budget = Duration::from_millis(descriptor.timeout_ms);
        let started = std::time::Instant::now();
        let run = timeout(budget, self.steps[index].run(&self.slots)).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        // Advance and decay on any outcome.
        self.index += 1;
        self.decay_slots();

        match run {
            Err(_) => {
                self.halted = true;
                warn!(step = %step_type, index, timeout_ms = descriptor.timeout_ms, "step timed out");
                Err(WorkerError::StepTimeout {
                    index,
                    step_type,
                    timeout_ms: descriptor.timeout_ms,
                })
            }
            Ok(Err(e)) => {
                self.halted = true;
                warn!(step = %step_type, index, error = %e, "step raised an error");
                Err(WorkerError::StepFailed {
                    index,
                    step_type,
                    reason: e.to_string(),
                    can_retry: false,
                    retry_delay_ms: None,
                })
            }
            Ok(Ok(StepOutcome::Success { payload, ttl })) => {
                let declared = ttl
                    .or(descriptor.result_ttl_steps)
                    .unwrap_or(DEFAULT_RESULT_TTL);
                if declared != TTL_UNBOUNDED && declared <= 0 {
                    self.halted = true;
                    return Err(WorkerError::InvalidTtl {
                        index,
                        ttl: declared,
                    });
                }
                debug!(step = %step_type, index, duration_ms, "step succeeded");
                self.slots.insert(0, InputSlot::new(payload.clone(), declared));
                self.last_payload = Some(payload);
                if self.index >= self.steps.len() {
                    self.completed = true;
                    Ok(StepProgress::Finished)
                } else {
                    Ok(StepProgress::Advanced)
                }
            }
            Ok(Ok(StepOutcome::CancelChain { reason })) => {
                self.halted = true;
                info!(step = %step_type, index, reason = %reason, "chain cancelled");
                Ok(StepProgress::Cancelled { reason })
            }
            Ok(Ok(StepOutcome::Failure {
                reason,
                can_retry,
                retry_delay_ms,
            })) => {
                self.halted = true;
                warn!(step = %step_type, index, reason = %reason, "step reported failure");
                Err(WorkerError::StepFailed {
                    index,
                    step_type,
                    reason,
                    can_retry,
                    retry_delay_ms,
                })
            }
        }
    }

    fn decay_slots(&mut self) {
        for slot in &mut self.slots {
            if !slot.is_unbounded() {
                slot.remaining -= 1;
            }
        }
        self.slots.retain(|slot| slot.is_unbounded() || slot.remaining > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use coursestat_types::StepDescriptor;

    use crate::{Step, StepError};

    /// Step that returns a fixed outcome and records the payloads it saw.
    struct ScriptedStep {
        descriptor: StepDescriptor,
        outcome: Option<StepOutcome>,
        error: Option<String>,
        delay_ms: u64,
        seen: Arc<Mutex<Vec<Vec<Value>>>>,
    }

    impl ScriptedStep {
        fn success(name: &str, payload: Value, ttl: Option<i32>) -> (Box<dyn Step>, Recorder) {
            let mut descriptor = StepDescriptor::new(name, 1_000);
            descriptor.result_ttl_steps = ttl;
            Self::build(descriptor, Some(StepOutcome::Success { payload, ttl: None }), None, 0)
        }

        fn outcome(name: &str, outcome: StepOutcome) -> (Box<dyn Step>, Recorder) {
            Self::build(StepDescriptor::new(name, 1_000), Some(outcome), None, 0)
        }

        fn erroring(name: &str, message: &str) -> (Box<dyn Step>, Recorder) {
            Self::build(
                StepDescriptor::new(name, 1_000),
                None,
                Some(message.to_string()),
                0,
            )
        }

        fn slow(name: &str, timeout_ms: u64, delay_ms: u64) -> (Box<dyn Step>, Recorder) {
            Self::build(
                StepDescriptor::new(name, timeout_ms),
                Some(StepOutcome::Success {
                    payload: json!("late"),
                    ttl: None,
                }),
                None,
                delay_ms,
            )
        }

        fn build(
            descriptor: StepDescriptor,
            outcome: Option<StepOutcome>,
            error: Option<String>,
            delay_ms: u64,
        ) -> (Box<dyn Step>, Recorder) {
            let seen = Arc::new(Mutex::new(Vec::new()));
            let step = Box::new(ScriptedStep {
                descriptor,
                outcome,
                error,
                delay_ms,
                seen: seen.clone(),
            });
            (step, Recorder(seen))
        }
    }

    struct Recorder(Arc<Mutex<Vec<Vec<Value>>>>);

    impl Recorder {
        fn invocations(&self) -> usize {
            self.0.lock().unwrap().len()
        }

        fn saw(&self, payload: &Value) -> bool {
            self.0
                .lock()
                .unwrap()
                .iter()
                .any(|prior| prior.contains(payload))
        }
    }

    #[async_trait]
    impl Step for ScriptedStep {
        fn descriptor(&self) -> &StepDescriptor {
            &self.descriptor
        }

        async fn run(&self, prior: &[InputSlot]) -> Result<StepOutcome, StepError> {
            self.seen
                .lock()
                .unwrap()
                .push(prior.iter().map(|slot| slot.payload.clone()).collect());
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if let Some(message) = &self.error {
                return Err(StepError::Collaborator(message.clone()));
            }
            Ok(self.outcome.clone().unwrap())
        }
    }

    async fn drain(worker: &mut PipelineWorker) -> Result<StepProgress, WorkerError> {
        let mut progress = worker.start_execution().await?;
        while worker.has_next_step() {
            progress = worker.execute_next_step().await?;
        }
        Ok(progress)
    }

    #[tokio::test]
    async fn test_ttl_one_visible_to_exactly_next_step() {
        let (a, _) = ScriptedStep::success("a", json!("a-result"), Some(1));
        let (b, b_rec) = ScriptedStep::success("b", json!("b-result"), None);
        let (c, c_rec) = ScriptedStep::success("c", json!("c-result"), None);

        let mut worker = PipelineWorker::new(vec![a, b, c], json!("input"));
        drain(&mut worker).await.unwrap();

        assert!(b_rec.saw(&json!("a-result")));
        assert!(!c_rec.saw(&json!("a-result")));
    }

    #[tokio::test]
    async fn test_ttl_two_expires_after_two_steps() {
        let (a, _) = ScriptedStep::success("a", json!("a-result"), Some(2));
        let (b, b_rec) = ScriptedStep::success("b", json!("b-result"), None);
        let (c, c_rec) = ScriptedStep::success("c", json!("c-result"), None);
        let (d, d_rec) = ScriptedStep::success("d", json!("d-result"), None);

        let mut worker = PipelineWorker::new(vec![a, b, c, d], json!("input"));
        drain(&mut worker).await.unwrap();

        assert!(b_rec.saw(&json!("a-result")));
        assert!(c_rec.saw(&json!("a-result")));
        assert!(!d_rec.saw(&json!("a-result")));
    }

    #[tokio::test]
    async fn test_unbounded_ttl_visible_through_the_end() {
        let (a, _) = ScriptedStep::success("a", json!("forever"), Some(TTL_UNBOUNDED));
        let (b, _) = ScriptedStep::success("b", json!("b"), None);
        let (c, _) = ScriptedStep::success("c", json!("c"), None);
        let (d, d_rec) = ScriptedStep::success("d", json!("d"), None);

        let mut worker = PipelineWorker::new(vec![a, b, c, d], json!("input"));
        drain(&mut worker).await.unwrap();

        assert!(d_rec.saw(&json!("forever")));
        // The initial input is unbounded as well.
        assert!(d_rec.saw(&json!("input")));
    }

    #[tokio::test]
    async fn test_default_ttl_is_one_step() {
        let (a, _) = ScriptedStep::success("a", json!("default-ttl"), None);
        let (b, b_rec) = ScriptedStep::success("b", json!("b"), None);
        let (c, c_rec) = ScriptedStep::success("c", json!("c"), None);

        let mut worker = PipelineWorker::new(vec![a, b, c], json!("input"));
        drain(&mut worker).await.unwrap();

        assert!(b_rec.saw(&json!("default-ttl")));
        assert!(!c_rec.saw(&json!("default-ttl")));
    }

    #[tokio::test]
    async fn test_cancel_chain_halts_without_error() {
        let (a, _) = ScriptedStep::outcome(
            "staleness",
            StepOutcome::CancelChain {
                reason: "already calculated".to_string(),
            },
        );
        let (b, b_rec) = ScriptedStep::success("calc", json!("never"), None);

        let mut worker = PipelineWorker::new(vec![a, b], json!("input"));
        let progress = worker.start_execution().await.unwrap();

        assert_eq!(
            progress,
            StepProgress::Cancelled {
                reason: "already calculated".to_string()
            }
        );
        assert!(!worker.has_next_step());
        assert_eq!(b_rec.invocations(), 0);
        assert!(worker.execution_result().is_none());
    }

    #[tokio::test]
    async fn test_failure_halts_and_is_an_execution_failure() {
        let (a, _) = ScriptedStep::outcome(
            "calc",
            StepOutcome::Failure {
                reason: "scoring service down".to_string(),
                can_retry: true,
                retry_delay_ms: Some(5_000),
            },
        );
        let (b, b_rec) = ScriptedStep::success("analysis", json!("never"), None);

        let mut worker = PipelineWorker::new(vec![a, b], json!("input"));
        let err = worker.start_execution().await.unwrap_err();

        match err {
            WorkerError::StepFailed {
                reason,
                can_retry,
                retry_delay_ms,
                ..
            } => {
                assert_eq!(reason, "scoring service down");
                assert!(can_retry);
                assert_eq!(retry_delay_ms, Some(5_000));
            }
            other => panic!("expected StepFailed, got {:?}", other),
        }
        assert!(!worker.has_next_step());
        assert_eq!(b_rec.invocations(), 0);
    }

    #[tokio::test]
    async fn test_step_error_becomes_execution_failure() {
        let (a, _) = ScriptedStep::erroring("calc", "connection refused");
        let mut worker = PipelineWorker::new(vec![a], json!("input"));

        let err = worker.start_execution().await.unwrap_err();
        match err {
            WorkerError::StepFailed {
                reason, can_retry, ..
            } => {
                assert!(reason.contains("connection refused"));
                assert!(!can_retry);
            }
            other => panic!("expected StepFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_step_timeout_is_an_execution_failure() {
        let (a, _) = ScriptedStep::slow("slow", 20, 500);
        let mut worker = PipelineWorker::new(vec![a], json!("input"));

        let err = worker.start_execution().await.unwrap_err();
        assert!(matches!(err, WorkerError::StepTimeout { timeout_ms: 20, .. }));
        assert!(!worker.has_next_step());
    }

    #[tokio::test]
    async fn test_invalid_ttl_is_fatal() {
        let (a, a_rec) = ScriptedStep::success("a", json!("x"), Some(0));
        let mut worker = PipelineWorker::new(vec![a], json!("input"));

        let err = worker.start_execution().await.unwrap_err();
        assert!(matches!(err, WorkerError::InvalidTtl { ttl: 0, .. }));
        // The invariant is checked before the step runs.
        assert_eq!(a_rec.invocations(), 0);
    }

    #[tokio::test]
    async fn test_execution_result_only_after_full_success() {
        let (a, _) = ScriptedStep::success("a", json!("mid"), None);
        let (b, _) = ScriptedStep::success("b", json!({"classified": true}), None);

        let mut worker = PipelineWorker::new(vec![a, b], json!("input"));
        worker.start_execution().await.unwrap();
        assert!(worker.execution_result().is_none());
        assert!(worker.has_next_step());

        let progress = worker.execute_next_step().await.unwrap();
        assert_eq!(progress, StepProgress::Finished);
        assert!(!worker.has_next_step());
        assert_eq!(worker.execution_result(), Some(&json!({"classified": true})));
    }

    #[tokio::test]
    async fn test_empty_pipeline_rejected() {
        let mut worker = PipelineWorker::new(Vec::new(), json!("input"));
        assert!(matches!(
            worker.start_execution().await,
            Err(WorkerError::EmptyPipeline)
        ));
    }

    #[tokio::test]
    async fn test_start_twice_rejected() {
        let (a, _) = ScriptedStep::success("a", json!("x"), None);
        let (b, _) = ScriptedStep::success("b", json!("y"), None);
        let mut worker = PipelineWorker::new(vec![a, b], json!("input"));

        worker.start_execution().await.unwrap();
        assert!(matches!(
            worker.start_execution().await,
            Err(WorkerError::AlreadyStarted)
        ));
    }
}
