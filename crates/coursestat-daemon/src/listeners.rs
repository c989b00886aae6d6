//! Completion listeners.
//!
//! Runners report every terminal outcome over one mpsc channel. The
//! dispatch task resolves the listener registered for that job id, if
//! any, and logs the outcome either way. Listeners are registered before
//! the job configuration reaches the work queue, so a completion can
//! never race past an unregistered listener.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use coursestat_types::{JobCompletion, JobOutcome};

/// One-shot listeners keyed by job id.
#[derive(Default)]
pub struct CompletionListeners {
    waiting: Mutex<HashMap<String, oneshot::Sender<JobOutcome>>>,
}

impl CompletionListeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in one job's outcome. A second registration for
    /// the same id replaces the first.
    pub fn register(&self, job_id: impl Into<String>) -> oneshot::Receiver<JobOutcome> {
        let (tx, rx) = oneshot::channel();
        self.waiting.lock().unwrap().insert(job_id.into(), tx);
        rx
    }

    /// Number of unresolved listeners.
    pub fn pending(&self) -> usize {
        self.waiting.lock().unwrap().len()
    }

    fn resolve(&self, completion: JobCompletion) {
        match completion.outcome {
            JobOutcome::Failed {
                ref message,
                can_retry,
            } => {
                warn!(job = %completion.job_id, %message, can_retry, "job failed");
            }
            JobOutcome::Cancelled { ref reason } => {
                info!(job = %completion.job_id, %reason, "job cancelled its chain");
            }
            JobOutcome::Finished { .. } => {
                info!(job = %completion.job_id, "job finished");
            }
        }

        let listener = self.waiting.lock().unwrap().remove(&completion.job_id);
        match listener {
            Some(tx) => {
                // Listener may have given up waiting; that's fine.
                let _ = tx.send(completion.outcome);
            }
            None => debug!(job = %completion.job_id, "no listener for completion"),
        }
    }

    /// Consume the completion channel until every runner has dropped its
    /// sender.
    pub async fn dispatch(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<JobCompletion>) {
        while let Some(completion) = rx.recv().await {
            self.resolve(completion);
        }
        debug!("completion channel closed");
    }
}
