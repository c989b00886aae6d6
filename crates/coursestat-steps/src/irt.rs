//! Item parameter estimation step.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use coursestat_types::{InputSlot, StepDescriptor, StepOutcome};
use coursestat_worker::{Step, StepError};

use crate::slots;
use crate::{IrtScorer, StatsError, StatsRepository};

/// Loads the course's response matrix and estimates per-item parameters
/// through the configured scorer. The result stays visible to both
/// analysis steps behind it, so the descriptor carries an explicit TTL.
pub struct IrtCalculationStep {
    descriptor: StepDescriptor,
    repository: Arc<dyn StatsRepository>,
    scorer: Arc<dyn IrtScorer>,
}

impl IrtCalculationStep {
    pub fn new(
        descriptor: StepDescriptor,
        repository: Arc<dyn StatsRepository>,
        scorer: Arc<dyn IrtScorer>,
    ) -> Self {
        Self {
            descriptor,
            repository,
            scorer,
        }
    }
}

#[async_trait]
impl Step for IrtCalculationStep {
    fn descriptor(&self) -> &StepDescriptor {
        &self.descriptor
    }

    async fn run(&self, prior: &[InputSlot]) -> Result<StepOutcome, StepError> {
        let id_course = slots::course_id(prior)?;
        let matrix = self
            .repository
            .load_responses(id_course)
            .await
            .map_err(|e| StepError::Collaborator(e.to_string()))?;

        let parameters = match self.scorer.estimate(&matrix) {
            Ok(parameters) => parameters,
            Err(StatsError::NoResponses(_)) => {
                // Responses vanished between the staleness check and here.
                return Ok(StepOutcome::Failure {
                    reason: format!("no responses available for course {id_course}"),
                    can_retry: true,
                    retry_delay_ms: Some(60_000),
                });
            }
            Err(e) => return Err(StepError::Collaborator(e.to_string())),
        };

        debug!(id_course, items = parameters.len(), "item parameters estimated");
        Ok(StepOutcome::Success {
            payload: json!({
                "id_course": id_course,
                "items": parameters,
            }),
            ttl: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    use crate::{ItemResponse, LogisticIrtScorer, MemoryStatsRepository};

    fn step(repo: Arc<MemoryStatsRepository>) -> IrtCalculationStep {
        IrtCalculationStep::new(
            StepDescriptor::new("irt_calculation", 30_000).with_result_ttl(2),
            repo,
            Arc::new(LogisticIrtScorer),
        )
    }

    #[tokio::test]
    async fn test_estimates_parameters_for_each_item() {
        let repo = Arc::new(MemoryStatsRepository::new());
        repo.seed_responses(
            7,
            vec![
                ItemResponse {
                    user_id: 1,
                    item_id: "a".to_string(),
                    correct: true,
                },
                ItemResponse {
                    user_id: 1,
                    item_id: "b".to_string(),
                    correct: false,
                },
                ItemResponse {
                    user_id: 2,
                    item_id: "a".to_string(),
                    correct: true,
                },
                ItemResponse {
                    user_id: 2,
                    item_id: "b".to_string(),
                    correct: true,
                },
            ],
            Utc::now(),
        );

        let prior = vec![InputSlot::unbounded(json!({"id_course": 7}))];
        match step(repo).run(&prior).await.unwrap() {
            StepOutcome::Success { payload, .. } => {
                assert_eq!(payload["id_course"], 7);
                assert_eq!(payload["items"].as_array().unwrap().len(), 2);
                assert!(payload["items"][0]["difficulty"].is_number());
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_matrix_is_retryable_failure() {
        let repo = Arc::new(MemoryStatsRepository::new());
        let prior = vec![InputSlot::unbounded(json!({"id_course": 7}))];
        match step(repo).run(&prior).await.unwrap() {
            StepOutcome::Failure {
                can_retry,
                retry_delay_ms,
                ..
            } => {
                assert!(can_retry);
                assert_eq!(retry_delay_ms, Some(60_000));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
