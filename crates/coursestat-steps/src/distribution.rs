//! Score distribution analysis and final result assembly.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use coursestat_types::{InputSlot, StepDescriptor, StepOutcome};
use coursestat_worker::{Step, StepError};

use crate::slots;
use crate::StatsRepository;

/// Last step of the pipeline: computes the total-score distribution and
/// folds the still-visible item parameters and difficulty bands into the
/// final statistics document the sink persists.
pub struct DistributionAnalysisStep {
    descriptor: StepDescriptor,
    repository: Arc<dyn StatsRepository>,
}

impl DistributionAnalysisStep {
    pub fn new(descriptor: StepDescriptor, repository: Arc<dyn StatsRepository>) -> Self {
        Self {
            descriptor,
            repository,
        }
    }
}

fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

#[async_trait]
impl Step for DistributionAnalysisStep {
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
        if matrix.is_empty() {
            return Err(StepError::Precondition(format!(
                "no responses available for course {id_course}"
            )));
        }

        let item_count = matrix.item_ids().len();
        let totals = matrix.total_scores();
        // Retakes can record several correct rows for one user/item pair;
        // cap each total at the item count so it stays an attainable score.
        let mut scores: Vec<f64> = totals
            .values()
            .map(|s| f64::from(*s).min(item_count as f64))
            .collect();
        scores.sort_by(|a, b| a.total_cmp(b));

        let participants = scores.len();
        let mean = scores.iter().sum::<f64>() / participants as f64;
        let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>()
            / participants as f64;

        // One bucket per attainable total score, 0 through item_count.
        let mut histogram = vec![0u32; item_count + 1];
        for score in &scores {
            histogram[*score as usize] += 1;
        }

        let item_parameters = slots::find_field(prior, "items").cloned().unwrap_or(Value::Null);
        let bands = slots::find_field(prior, "bands").cloned().unwrap_or(Value::Null);
        let band_counts = slots::find_field(prior, "band_counts")
            .cloned()
            .unwrap_or(Value::Null);

        Ok(StepOutcome::Success {
            payload: json!({
                "id_course": id_course,
                "calculated_at": Utc::now(),
                "item_parameters": item_parameters,
                "difficulty": {
                    "bands": bands,
                    "band_counts": band_counts,
                },
                "score_distribution": {
                    "participants": participants,
                    "max_score": item_count,
                    "histogram": histogram,
                    "mean": mean,
                    "median": median(&scores),
                    "stddev": variance.sqrt(),
                },
            }),
            ttl: None,
        })
    }
}
