//! Difficulty banding over the estimated item parameters.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use coursestat_types::{InputSlot, StepDescriptor, StepOutcome};
use coursestat_worker::{Step, StepError};

use crate::slots;
use crate::{DifficultyBand, DifficultyClassifier, ItemParameters};

/// Buckets every item into a difficulty band. Consumes the item
/// parameters left in the result window by the estimation step.
pub struct DifficultyAnalysisStep {
    descriptor: StepDescriptor,
    classifier: Arc<dyn DifficultyClassifier>,
}

impl DifficultyAnalysisStep {
    pub fn new(descriptor: StepDescriptor, classifier: Arc<dyn DifficultyClassifier>) -> Self {
        Self {
            descriptor,
            classifier,
        }
    }
}

#[async_trait]
impl Step for DifficultyAnalysisStep {
    fn descriptor(&self) -> &StepDescriptor {
        &self.descriptor
    }

    async fn run(&self, prior: &[InputSlot]) -> Result<StepOutcome, StepError> {
        let id_course = slots::course_id(prior)?;
        let items = slots::find_field(prior, "items").ok_or_else(|| {
            StepError::Precondition("no item parameters in prior results".to_string())
        })?;
        let items: Vec<ItemParameters> = serde_json::from_value(items.clone())
            .map_err(|e| StepError::Precondition(format!("unreadable item parameters: {e}")))?;

        let mut bands = BTreeMap::new();
        let mut counts: BTreeMap<&str, u32> = BTreeMap::new();
        for band in [
            DifficultyBand::Easy,
            DifficultyBand::Moderate,
            DifficultyBand::Hard,
        ] {
            counts.insert(band.as_str(), 0);
        }
        for item in &items {
            let band = self.classifier.classify(item);
            bands.insert(item.item_id.clone(), band.as_str());
            *counts.entry(band.as_str()).or_default() += 1;
        }

        Ok(StepOutcome::Success {
            payload: json!({
                "id_course": id_course,
                "bands": bands,
                "band_counts": counts,
            }),
            ttl: None,
        })
    }
}
