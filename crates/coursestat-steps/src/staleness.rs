//! Staleness check: skip the calculation when nothing changed.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use coursestat_types::{InputSlot, StepDescriptor, StepOutcome};
use coursestat_worker::{Step, StepError};

use crate::slots;
use crate::StatsRepository;

/// First step of every course-statistics pipeline.
///
/// Compares the last calculation time against the newest recorded
/// response. When the stored statistics are still current (and the
/// request did not force a recalculation), the step cancels the chain —
/// a clean completion, not a failure.
pub struct StalenessCheckStep {
    descriptor: StepDescriptor,
    repository: Arc<dyn StatsRepository>,
}

impl StalenessCheckStep {
    pub fn new(descriptor: StepDescriptor, repository: Arc<dyn StatsRepository>) -> Self {
        Self {
            descriptor,
            repository,
        }
    }

    fn forced(&self) -> bool {
        self.descriptor
            .config
            .get("force_calculation")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

#[async_trait]
impl Step for StalenessCheckStep {
    fn descriptor(&self) -> &StepDescriptor {
        &self.descriptor
    }

    async fn run(&self, prior: &[InputSlot]) -> Result<StepOutcome, StepError> {
        let id_course = slots::course_id(prior)?;
        let forced = self.forced();

        let latest_response = self
            .repository
            .latest_response_at(id_course)
            .await
            .map_err(|e| StepError::Collaborator(e.to_string()))?;
        let Some(latest_response) = latest_response else {
            return Ok(StepOutcome::CancelChain {
                reason: format!("no responses recorded for course {id_course}"),
            });
        };

        if !forced {
            let calculated = self
                .repository
                .last_calculated_at(id_course)
                .await
                .map_err(|e| StepError::Collaborator(e.to_string()))?;
            if let Some(calculated) = calculated {
                if latest_response <= calculated {
                    debug!(id_course, "statistics still current");
                    return Ok(StepOutcome::CancelChain {
                        reason: "already calculated".to_string(),
                    });
                }
            }
        }

        Ok(StepOutcome::Success {
            payload: json!({
                "id_course": id_course,
                "force_calculation": forced,
            }),
            ttl: None,
        })
    }
}
