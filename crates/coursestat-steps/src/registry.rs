//! Step registry.
//!
//! Wired explicitly at daemon startup; steps do not self-register. The
//! registry owns the shared collaborators and hands each built step the
//! ones it needs.

use std::sync::Arc;

use coursestat_types::StepDescriptor;
use coursestat_worker::{Step, StepFactory, WorkerError};

use crate::{
    DifficultyAnalysisStep, DifficultyClassifier, DistributionAnalysisStep, IrtCalculationStep,
    IrtScorer, LogisticIrtScorer, StalenessCheckStep, StatsRepository, ThresholdClassifier,
};

pub const STEP_STALENESS_CHECK: &str = "staleness_check";
pub const STEP_IRT_CALCULATION: &str = "irt_calculation";
pub const STEP_DIFFICULTY_ANALYSIS: &str = "difficulty_analysis";
pub const STEP_DISTRIBUTION_ANALYSIS: &str = "distribution_analysis";

/// Builds course-statistics steps from descriptors.
pub struct StepRegistry {
    repository: Arc<dyn StatsRepository>,
    scorer: Arc<dyn IrtScorer>,
    classifier: Arc<dyn DifficultyClassifier>,
}

impl StepRegistry {
    /// Registry with the default scorer and classifier.
    pub fn new(repository: Arc<dyn StatsRepository>) -> Self {
        Self {
            repository,
            scorer: Arc::new(LogisticIrtScorer),
            classifier: Arc::new(ThresholdClassifier::default()),
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn IrtScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn DifficultyClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Every step type this registry can build.
    pub fn manifest() -> &'static [&'static str] {
        &[
            STEP_STALENESS_CHECK,
            STEP_IRT_CALCULATION,
            STEP_DIFFICULTY_ANALYSIS,
            STEP_DISTRIBUTION_ANALYSIS,
        ]
    }
}

impl StepFactory for StepRegistry {
    fn build(&self, descriptor: &StepDescriptor) -> Result<Box<dyn Step>, WorkerError> {
        match descriptor.step_type.as_str() {
            STEP_STALENESS_CHECK => Ok(Box::new(StalenessCheckStep::new(
                descriptor.clone(),
                self.repository.clone(),
            ))),
            STEP_IRT_CALCULATION => Ok(Box::new(IrtCalculationStep::new(
                descriptor.clone(),
                self.repository.clone(),
                self.scorer.clone(),
            ))),
            STEP_DIFFICULTY_ANALYSIS => Ok(Box::new(DifficultyAnalysisStep::new(
                descriptor.clone(),
                self.classifier.clone(),
            ))),
            STEP_DISTRIBUTION_ANALYSIS => Ok(Box::new(DistributionAnalysisStep::new(
                descriptor.clone(),
                self.repository.clone(),
            ))),
            other => Err(WorkerError::UnknownStepType(other.to_string())),
        }
    }
}
