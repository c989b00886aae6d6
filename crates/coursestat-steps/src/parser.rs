//! Request parsing: incoming payloads into full job configurations.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use coursestat_engine::{EngineError, RequestParser};
use coursestat_types::{JobConfiguration, JobRequest, StepDescriptor};

use crate::registry::{
    STEP_DIFFICULTY_ANALYSIS, STEP_DISTRIBUTION_ANALYSIS, STEP_IRT_CALCULATION,
    STEP_STALENESS_CHECK,
};

#[derive(Debug, Deserialize)]
struct CourseStatsRequest {
    id_course: i64,
    #[serde(default)]
    force_calculation: bool,
    #[serde(default)]
    periodical: bool,
}

/// Expands `{ "id_course": .. }` requests into the four-step
/// course-statistics pipeline. Assigns the job id, so callers can key
/// completion listeners before the configuration reaches the work queue.
pub struct CourseStatsParser {
    job_timeout_ms: u64,
}

impl CourseStatsParser {
    pub fn new(job_timeout_ms: u64) -> Self {
        Self { job_timeout_ms }
    }

    /// Build the pipeline directly from the course parameters; shared by
    /// the parser and the periodic sweeps, which regenerate configurations
    /// from persisted descriptors.
    pub fn build_configuration(
        &self,
        id_course: i64,
        force_calculation: bool,
        periodical: bool,
    ) -> JobConfiguration {
        let mut config = JobConfiguration::new(
            format!("course statistics #{id_course}"),
            self.job_timeout_ms,
        )
        .with_step(
            StepDescriptor::new(STEP_STALENESS_CHECK, 30_000)
                .with_config(json!({"force_calculation": force_calculation})),
        )
        .with_step(
            StepDescriptor::new(STEP_IRT_CALCULATION, 120_000)
                // Visible to both analysis steps behind it.
                .with_result_ttl(2)
                .critical(),
        )
        .with_step(StepDescriptor::new(STEP_DIFFICULTY_ANALYSIS, 60_000).critical())
        .with_step(StepDescriptor::new(STEP_DISTRIBUTION_ANALYSIS, 60_000).critical());

        config.periodical = periodical;
        config.input_config = json!({
            "id_course": id_course,
            "force_calculation": force_calculation,
        });
        config.persistence_config = json!({"id_course": id_course});
        config
    }
}

#[async_trait]
impl RequestParser for CourseStatsParser {
    async fn parse(&self, request: &JobRequest) -> Result<JobConfiguration, EngineError> {
        if let Some(kind) = &request.kind {
            if kind != "course_statistics" {
                return Err(EngineError::BadRequest(format!(
                    "unsupported request kind: {kind}"
                )));
            }
        }
        let parsed: CourseStatsRequest = serde_json::from_value(request.payload.clone())
            .map_err(|e| EngineError::BadRequest(e.to_string()))?;
        if parsed.id_course <= 0 {
            return Err(EngineError::BadRequest(format!(
                "id_course must be positive, got {}",
                parsed.id_course
            )));
        }
        Ok(self.build_configuration(
            parsed.id_course,
            parsed.force_calculation,
            parsed.periodical,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursestat_types::TTL_UNBOUNDED;

    // No generated descriptor may carry a zero or negative bounded TTL.
    fn ttl_is_valid(ttl: i32) -> bool {
        ttl == TTL_UNBOUNDED || ttl > 0
    }

    fn parser() -> CourseStatsParser {
        CourseStatsParser::new(600_000)
    }

    #[tokio::test]
    async fn test_parse_expands_four_step_pipeline() {
        let request = JobRequest::new(json!({"id_course": 7, "force_calculation": false}));
        let config = parser().parse(&request).await.unwrap();

        assert_eq!(config.name, "course statistics #7");
        assert_eq!(config.job_timeout_ms, 600_000);
        assert!(!config.periodical);
        let types: Vec<&str> = config.steps.iter().map(|s| s.step_type.as_str()).collect();
        assert_eq!(
            types,
            vec![
                "staleness_check",
                "irt_calculation",
                "difficulty_analysis",
                "distribution_analysis",
            ]
        );
        assert_eq!(config.steps[0].config["force_calculation"], false);
        assert_eq!(config.steps[1].result_ttl_steps, Some(2));
        assert!(config.steps[1].is_critical);
        assert_eq!(config.input_config["id_course"], 7);
        assert!(config.steps.iter().all(|s| s
            .result_ttl_steps
            .map_or(true, ttl_is_valid)));
    }

    #[tokio::test]
    async fn test_parse_assigns_fresh_ids() {
        let request = JobRequest::new(json!({"id_course": 7}));
        let a = parser().parse(&request).await.unwrap();
        let b = parser().parse(&request).await.unwrap();
        assert_ne!(a.job_id, b.job_id);
    }

    #[tokio::test]
    async fn test_parse_honors_kind_tag() {
        let tagged = JobRequest::new(json!({"id_course": 7})).with_kind("course_statistics");
        assert!(parser().parse(&tagged).await.is_ok());

        let wrong = JobRequest::new(json!({"id_course": 7})).with_kind("grade_export");
        assert!(matches!(
            parser().parse(&wrong).await,
            Err(EngineError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_parse_rejects_bad_payloads() {
        let missing = JobRequest::new(json!({"force_calculation": true}));
        assert!(matches!(
            parser().parse(&missing).await,
            Err(EngineError::BadRequest(_))
        ));

        let negative = JobRequest::new(json!({"id_course": -3}));
        assert!(matches!(
            parser().parse(&negative).await,
            Err(EngineError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_parse_periodical_flag() {
        let request = JobRequest::new(json!({"id_course": 7, "periodical": true}));
        let config = parser().parse(&request).await.unwrap();
        assert!(config.periodical);
    }
}
